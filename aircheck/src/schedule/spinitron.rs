//! Spinitron-style schedule API client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{RawShow, ScheduleError, ScheduleSource};
use crate::domain::Spin;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Rough songs-per-hour estimate used to size spin requests.
const SPINS_PER_HOUR: i64 = 10;
/// The provider caps a single spins page at this many rows.
const MAX_SPINS_PER_REQUEST: i64 = 200;

#[derive(Debug, Deserialize)]
struct ItemsEnvelope<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct SpinRow {
    start: DateTime<Utc>,
    #[serde(default)]
    song: Option<String>,
    #[serde(default)]
    artist: Option<String>,
}

/// HTTP client for the Spinitron schedule API.
pub struct SpinitronClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SpinitronClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, resource: &str, count: i64) -> String {
        format!(
            "{}/{}?access-token={}&count={}",
            self.base_url, resource, self.api_key, count
        )
    }

    async fn get_items<T: serde::de::DeserializeOwned>(
        &self,
        resource: &str,
        count: i64,
    ) -> Result<Vec<T>, ScheduleError> {
        let url = self.endpoint(resource, count);
        debug!(%resource, count, "requesting schedule data");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ScheduleError::RemoteUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScheduleError::RemoteUnavailable(format!(
                "{} returned status {}",
                resource, status
            )));
        }

        let envelope: ItemsEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ScheduleError::Malformed(e.to_string()))?;
        Ok(envelope.items)
    }
}

#[async_trait]
impl ScheduleSource for SpinitronClient {
    async fn fetch_upcoming(&self, limit: usize) -> Result<Vec<RawShow>, ScheduleError> {
        let mut shows: Vec<RawShow> = self.get_items("shows", limit as i64).await?;
        // The provider already orders by start, but make it a guarantee.
        shows.sort_by_key(|s| s.start);
        debug!(count = shows.len(), "retrieved upcoming shows");
        Ok(shows)
    }

    async fn fetch_spins(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Spin>, ScheduleError> {
        let hours = ((end - start).num_hours()).max(1);
        let count = (hours * SPINS_PER_HOUR + 10).min(MAX_SPINS_PER_REQUEST);

        let rows: Vec<SpinRow> = self.get_items("spins", count).await?;
        // Provider returns newest first; keep only the show window, oldest first.
        let mut spins: Vec<Spin> = rows
            .into_iter()
            .filter(|r| r.start >= start && r.start <= end)
            .map(|r| Spin {
                song: r.song.unwrap_or_else(|| "Unknown Song".to_string()),
                artist: r.artist.unwrap_or_else(|| "Unknown Artist".to_string()),
            })
            .collect();
        spins.reverse();
        Ok(spins)
    }
}
