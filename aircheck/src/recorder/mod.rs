//! Recording supervision: one capture process per active timeslot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capture_engine::{CaptureEngine, CaptureError, CaptureProcess, CaptureSpec};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::domain::{Artifact, Timeslot};

/// The runtime handle for one in-progress capture.
struct RecordingJob {
    timeslot: Timeslot,
    process: Box<dyn CaptureProcess>,
    output_path: PathBuf,
}

/// Owns every active capture; at most one job per timeslot id.
pub struct RecordingSupervisor {
    engine: Arc<dyn CaptureEngine>,
    stream_url: String,
    output_dir: PathBuf,
    jobs: HashMap<u64, RecordingJob>,
}

impl RecordingSupervisor {
    pub fn new(engine: Arc<dyn CaptureEngine>, stream_url: String, output_dir: PathBuf) -> Self {
        Self {
            engine,
            stream_url,
            output_dir,
            jobs: HashMap::new(),
        }
    }

    /// Launch a capture for `timeslot`.
    ///
    /// A second start for the same slot is refused; the first capture keeps
    /// running. A spawn failure is terminal for the slot: its airtime has
    /// already begun, so a retried launch would only yield a truncated file.
    pub async fn start(&mut self, timeslot: &Timeslot) -> Result<(), CaptureError> {
        if self.jobs.contains_key(&timeslot.id) {
            warn!(
                timeslot_id = timeslot.id,
                show = %timeslot.show_name,
                "capture already active for this slot"
            );
            return Ok(());
        }

        let output_path = self.output_dir.join(timeslot.output_file_name());
        let spec = CaptureSpec::new(self.stream_url.clone(), output_path.clone());

        let process = self.engine.spawn(&spec).await.inspect_err(|e| {
            error!(
                timeslot_id = timeslot.id,
                show = %timeslot.show_name,
                error = %e,
                "failed to start capture, abandoning slot"
            );
        })?;

        info!(
            timeslot_id = timeslot.id,
            show = %timeslot.show_name,
            output = %output_path.display(),
            "capture started"
        );

        self.jobs.insert(
            timeslot.id,
            RecordingJob {
                timeslot: timeslot.clone(),
                process,
                output_path,
            },
        );
        Ok(())
    }

    /// Stop the capture for `timeslot_id` and return the finished artifact.
    ///
    /// The job is consumed either way: success hands the artifact on, failure
    /// is logged by the caller and the slot abandoned.
    pub async fn stop(&mut self, timeslot_id: u64, grace: Duration) -> Result<Artifact, CaptureError> {
        let job = self
            .jobs
            .remove(&timeslot_id)
            .ok_or_else(|| CaptureError::Io(std::io::Error::other(
                format!("no active capture for timeslot {timeslot_id}"),
            )))?;

        let local_path = job.process.stop(grace).await.inspect_err(|e| {
            error!(
                timeslot_id,
                show = %job.timeslot.show_name,
                error = %e,
                "capture produced no usable output"
            );
        })?;

        info!(
            timeslot_id,
            show = %job.timeslot.show_name,
            output = %local_path.display(),
            "capture finished"
        );

        debug_assert_eq!(local_path, job.output_path);
        Ok(Artifact {
            timeslot_id,
            show_name: job.timeslot.show_name,
            local_path,
            remote_url: None,
        })
    }

    /// Stop everything, e.g. on shutdown. Returns whatever survived together
    /// with its timeslot so the caller can still publish and notify.
    pub async fn stop_all(&mut self, grace: Duration) -> Vec<(Timeslot, Artifact)> {
        let ids: Vec<u64> = self.jobs.keys().copied().collect();
        let mut finished = Vec::new();
        for id in ids {
            let timeslot = self.jobs[&id].timeslot.clone();
            match self.stop(id, grace).await {
                Ok(artifact) => finished.push((timeslot, artifact)),
                Err(e) => warn!(timeslot_id = id, error = %e, "capture lost during shutdown"),
            }
        }
        finished
    }

    /// Ids of active jobs whose slot has ended by `now`.
    pub fn due_stops(&self, now: DateTime<Utc>) -> Vec<u64> {
        self.jobs
            .values()
            .filter(|job| job.timeslot.end <= now)
            .map(|job| job.timeslot.id)
            .collect()
    }

    pub fn is_recording(&self, timeslot_id: u64) -> bool {
        self.jobs.contains_key(&timeslot_id)
    }

    pub fn active_count(&self) -> usize {
        self.jobs.len()
    }

    /// Timeslot for an active job, if any.
    pub fn timeslot(&self, timeslot_id: u64) -> Option<&Timeslot> {
        self.jobs.get(&timeslot_id).map(|job| &job.timeslot)
    }
}
