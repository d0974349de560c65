//! Schedule acquisition: the remote source seam and the planner that turns
//! raw provider records into concrete timeslots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::Spin;

pub mod planner;
pub mod spinitron;

pub use planner::{plan, render_schedule_table};
pub use spinitron::SpinitronClient;

/// Errors from the schedule provider.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Network failure, non-success status, or timeout.
    #[error("schedule provider unavailable: {0}")]
    RemoteUnavailable(String),
    /// The provider answered with a body we could not interpret.
    #[error("malformed schedule payload: {0}")]
    Malformed(String),
}

/// One show record as the provider returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawShow {
    pub id: u64,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub recipient_emails: Vec<String>,
}

/// Remote schedule provider seam.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Fetch the next `limit` upcoming slots, ordered by start ascending.
    async fn fetch_upcoming(&self, limit: usize) -> Result<Vec<RawShow>, ScheduleError>;

    /// Songs played between `start` and `end`, chronological.
    ///
    /// Optional; sources without spin data return nothing.
    async fn fetch_spins(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Spin>, ScheduleError> {
        let _ = (start, end);
        Ok(Vec::new())
    }
}
