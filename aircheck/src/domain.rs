//! Core entities shared across the pipeline.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::utils::filename::sanitize_stem;

/// One scheduled show occurrence, immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeslot {
    /// Schedule provider's id for this occurrence.
    pub id: u64,
    pub show_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Host addresses to notify; deduplicated, stable order.
    pub recipients: BTreeSet<String>,
}

impl Timeslot {
    /// Filename for this slot's recording, e.g. `MorningShow_2026-08-30.mp3`.
    ///
    /// Falls back to the slot id when the title sanitizes to nothing.
    pub fn output_file_name(&self) -> String {
        let stem = sanitize_stem(&self.show_name).unwrap_or_else(|| self.id.to_string());
        format!("{}_{}.mp3", stem, self.start.format("%Y-%m-%d"))
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// The recorded file produced by a completed capture.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub timeslot_id: u64,
    pub show_name: String,
    pub local_path: PathBuf,
    /// Set by the publisher once the upload succeeds.
    pub remote_url: Option<String>,
}

/// One song played during a show, as reported by the schedule provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spin {
    pub song: String,
    pub artist: String,
}
