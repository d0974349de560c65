//! The process-wide control loop.
//!
//! Every poll interval the loop refreshes the plan if due, starts captures
//! whose slot has begun, stops captures whose slot has ended, and hands each
//! finished artifact to a background publish-then-notify task. Those tasks
//! never touch the loop's state; they report back over a channel
//! (single-writer discipline for the pending and active sets).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::domain::{Artifact, Timeslot};
use crate::notify::{AlertKind, DeliveryReport, Notifier};
use crate::publish::ArtifactPublisher;
use crate::recorder::RecordingSupervisor;
use crate::retry::{RetryConfig, retry_async};
use crate::schedule::{ScheduleSource, plan, render_schedule_table};

/// How long a finished slot's id stays known, guarding against the provider
/// re-listing a show that was already handled.
const KNOWN_ID_RETENTION: chrono::Duration = chrono::Duration::hours(24);

/// Wall-clock bound on waiting for background uploads during shutdown.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Loop cadence and dispatch thresholds.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    /// Due slots with less remaining airtime than this are abandoned.
    pub min_remaining: chrono::Duration,
    /// Grace period before a capture process is killed.
    pub stop_grace: Duration,
    /// Upcoming shows requested per refresh.
    pub fetch_count: usize,
    /// Schedule category that must never be recorded.
    pub excluded_category: String,
    /// Backoff for schedule fetches.
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(3600),
            min_remaining: chrono::Duration::minutes(5),
            stop_grace: Duration::from_secs(30),
            fetch_count: 24,
            excluded_category: "Automation".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Outcome of one show's publish/notify pipeline.
#[derive(Debug)]
pub struct PipelineReport {
    pub timeslot_id: u64,
    pub show_name: String,
    /// `None` means the upload failed and the local file was retained.
    pub remote_url: Option<String>,
    pub deliveries: Vec<DeliveryReport>,
}

/// The scheduler loop. Owns the pending-slot set and the supervisor.
pub struct SchedulerLoop {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    source: Arc<dyn ScheduleSource>,
    supervisor: RecordingSupervisor,
    publisher: Arc<dyn ArtifactPublisher>,
    notifier: Arc<Notifier>,
    /// Planned slots not yet started, sorted by start time.
    pending: Vec<Timeslot>,
    /// Every id we have planned, with its end time for eventual pruning.
    known: HashMap<u64, DateTime<Utc>>,
    last_refresh: Option<DateTime<Utc>>,
    /// Set once an admin alert went out for the current fetch outage;
    /// cleared by the next successful refresh.
    fetch_alerted: bool,
    report_tx: mpsc::UnboundedSender<PipelineReport>,
    report_rx: mpsc::UnboundedReceiver<PipelineReport>,
    in_flight: usize,
}

impl SchedulerLoop {
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        source: Arc<dyn ScheduleSource>,
        supervisor: RecordingSupervisor,
        publisher: Arc<dyn ArtifactPublisher>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        Self {
            config,
            clock,
            source,
            supervisor,
            publisher,
            notifier,
            pending: Vec::new(),
            known: HashMap::new(),
            last_refresh: None,
            fetch_alerted: false,
            report_tx,
            report_rx,
            in_flight: 0,
        }
    }

    /// Run until `cancel` fires, then stop in-flight captures cleanly and
    /// drain outstanding uploads.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            refresh_secs = self.config.refresh_interval.as_secs(),
            "scheduler loop started"
        );

        loop {
            self.cycle().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(self.config.poll_interval) => {}
            }
        }

        self.shutdown().await;
    }

    /// One IDLE → REFRESH → DISPATCH pass.
    async fn cycle(&mut self) {
        self.drain_reports();

        let now = self.clock.now();
        if self.refresh_due(now) {
            self.refresh(now).await;
        }
        self.dispatch(now).await;

        self.known
            .retain(|_, end| *end + KNOWN_ID_RETENTION > now);
    }

    fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_refresh {
            None => true,
            Some(at) => {
                now - at >= chrono::Duration::from_std(self.config.refresh_interval)
                    .unwrap_or_else(|_| chrono::Duration::hours(1))
            }
        }
    }

    /// Fetch the upcoming schedule and merge new slots into the pending set.
    async fn refresh(&mut self, now: DateTime<Utc>) {
        let source = Arc::clone(&self.source);
        let fetch_count = self.config.fetch_count;

        let fetched = retry_async(
            &self.config.retry,
            self.clock.as_ref(),
            "schedule fetch",
            || source.fetch_upcoming(fetch_count),
        )
        .await;

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                // Keep the existing plan; the next cycle tries again.
                warn!(error = %e, "schedule refresh failed, keeping current plan");
                if !self.fetch_alerted {
                    self.fetch_alerted = true;
                    self.notifier
                        .alert_admin(AlertKind::ScheduleFetch, &e.to_string())
                        .await;
                }
                return;
            }
        };
        self.fetch_alerted = false;

        let known_ids: HashSet<u64> = self.known.keys().copied().collect();
        let new_slots = plan(raw, &known_ids, now, &self.config.excluded_category);

        if new_slots.is_empty() {
            debug!("no new shows to plan");
        } else {
            info!(count = new_slots.len(), "planned new shows");
            info!("upcoming recordings:\n{}", render_schedule_table(&new_slots));
            for slot in new_slots {
                self.known.insert(slot.id, slot.end);
                self.pending.push(slot);
            }
            self.pending.sort_by_key(|s| s.start);
        }

        self.last_refresh = Some(now);
    }

    /// Start due captures, stop elapsed ones, hand artifacts downstream.
    async fn dispatch(&mut self, now: DateTime<Utc>) {
        // Slots that expired while still pending are gone for good.
        self.pending.retain(|slot| {
            if slot.end <= now {
                warn!(
                    timeslot_id = slot.id,
                    show = %slot.show_name,
                    "slot ended before capture could start, discarding"
                );
                false
            } else {
                true
            }
        });

        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|slot| slot.start <= now);
        self.pending = rest;

        for slot in due {
            if slot.end - now < self.config.min_remaining {
                warn!(
                    timeslot_id = slot.id,
                    show = %slot.show_name,
                    remaining_secs = (slot.end - now).num_seconds(),
                    "not enough airtime left, abandoning slot"
                );
                continue;
            }
            // A launch failure was already logged by the supervisor; the
            // slot's airtime is burning, so all that remains is to tell the
            // admin.
            if let Err(e) = self.supervisor.start(&slot).await {
                self.notifier
                    .alert_admin(
                        AlertKind::CaptureLaunch,
                        &format!("{}: {e}", slot.show_name),
                    )
                    .await;
            }
        }

        for id in self.supervisor.due_stops(now) {
            let timeslot = self.supervisor.timeslot(id).cloned();
            match self.supervisor.stop(id, self.config.stop_grace).await {
                Ok(artifact) => {
                    if let Some(slot) = timeslot {
                        self.spawn_pipeline(slot, artifact);
                    }
                }
                Err(e) => {
                    error!(timeslot_id = id, stage = "capture", error = %e, "recording abandoned");
                }
            }
        }
    }

    /// Publish and notify on a background task; results come back over the
    /// report channel instead of touching loop state.
    fn spawn_pipeline(&mut self, slot: Timeslot, artifact: Artifact) {
        let publisher = Arc::clone(&self.publisher);
        let notifier = Arc::clone(&self.notifier);
        let source = Arc::clone(&self.source);
        let tx = self.report_tx.clone();

        self.in_flight += 1;
        tokio::spawn(async move {
            let report = run_pipeline(publisher, notifier, source, slot, artifact).await;
            let _ = tx.send(report);
        });
    }

    fn drain_reports(&mut self) {
        while let Ok(report) = self.report_rx.try_recv() {
            self.in_flight = self.in_flight.saturating_sub(1);
            log_report(&report);
        }
    }

    async fn shutdown(&mut self) {
        info!(
            active = self.supervisor.active_count(),
            "shutting down, stopping in-flight captures"
        );

        for (slot, artifact) in self.supervisor.stop_all(self.config.stop_grace).await {
            self.spawn_pipeline(slot, artifact);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while self.in_flight > 0 {
            match tokio::time::timeout_at(deadline, self.report_rx.recv()).await {
                Ok(Some(report)) => {
                    self.in_flight -= 1;
                    log_report(&report);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        outstanding = self.in_flight,
                        "drain timeout reached, abandoning background uploads"
                    );
                    break;
                }
            }
        }

        info!("scheduler loop stopped");
    }
}

async fn run_pipeline(
    publisher: Arc<dyn ArtifactPublisher>,
    notifier: Arc<Notifier>,
    source: Arc<dyn ScheduleSource>,
    slot: Timeslot,
    mut artifact: Artifact,
) -> PipelineReport {
    let url = match publisher.publish(&mut artifact).await {
        Ok(url) => url,
        Err(e) => {
            error!(
                timeslot_id = slot.id,
                show = %slot.show_name,
                stage = "publish",
                error = %e,
                file = %artifact.local_path.display(),
                "upload failed, local file retained for manual recovery"
            );
            notifier
                .alert_admin(AlertKind::Upload, &format!("{}: {e}", slot.show_name))
                .await;
            return PipelineReport {
                timeslot_id: slot.id,
                show_name: slot.show_name,
                remote_url: None,
                deliveries: Vec::new(),
            };
        }
    };

    let spins = match source.fetch_spins(slot.start, slot.end).await {
        Ok(spins) => spins,
        Err(e) => {
            warn!(
                timeslot_id = slot.id,
                error = %e,
                "could not fetch song list, notifying without it"
            );
            Vec::new()
        }
    };

    let deliveries = notifier.notify(&slot, &url, &spins).await;

    PipelineReport {
        timeslot_id: slot.id,
        show_name: slot.show_name,
        remote_url: Some(url),
        deliveries,
    }
}

fn log_report(report: &PipelineReport) {
    match &report.remote_url {
        Some(url) => {
            let failed: Vec<&str> = report
                .deliveries
                .iter()
                .filter(|d| !d.delivered)
                .map(|d| d.recipient.as_str())
                .collect();
            if failed.is_empty() {
                info!(
                    timeslot_id = report.timeslot_id,
                    show = %report.show_name,
                    %url,
                    notified = report.deliveries.len(),
                    "show fully processed"
                );
            } else {
                warn!(
                    timeslot_id = report.timeslot_id,
                    show = %report.show_name,
                    %url,
                    stage = "notify",
                    ?failed,
                    "show uploaded but some notifications failed"
                );
            }
        }
        None => {
            // The publish failure itself was logged with context already.
            debug!(
                timeslot_id = report.timeslot_id,
                show = %report.show_name,
                "pipeline finished without an upload"
            );
        }
    }
}
