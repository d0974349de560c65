//! End-to-end scheduler loop tests against stubbed collaborators.
//!
//! The manual clock drives the loop through a whole show lifecycle without
//! real delays: plan, capture start, capture stop, upload, notification.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use capture_engine::{CaptureEngine, CaptureError, CaptureProcess, CaptureSpec};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use aircheck::clock::{Clock, ManualClock};
use aircheck::domain::Artifact;
use aircheck::notify::{Mailer, Notifier, NotifyError, OutgoingEmail};
use aircheck::publish::{ArtifactPublisher, PublishError};
use aircheck::recorder::RecordingSupervisor;
use aircheck::retry::RetryConfig;
use aircheck::schedule::{RawShow, ScheduleError, ScheduleSource};
use aircheck::scheduler::{SchedulerConfig, SchedulerLoop};

struct StubSource {
    shows: Vec<RawShow>,
}

#[async_trait]
impl ScheduleSource for StubSource {
    async fn fetch_upcoming(&self, _limit: usize) -> Result<Vec<RawShow>, ScheduleError> {
        Ok(self.shows.clone())
    }
}

#[derive(Default)]
struct StubEngine {
    started: AtomicUsize,
    stopped: Arc<AtomicUsize>,
}

struct StubProcess {
    output_path: PathBuf,
    stopped: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureProcess for StubProcess {
    async fn stop(self: Box<Self>, _grace: Duration) -> Result<PathBuf, CaptureError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(self.output_path)
    }
}

#[async_trait]
impl CaptureEngine for StubEngine {
    async fn spawn(&self, spec: &CaptureSpec) -> Result<Box<dyn CaptureProcess>, CaptureError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        std::fs::write(&spec.output_path, b"audio")?;
        Ok(Box::new(StubProcess {
            output_path: spec.output_path.clone(),
            stopped: self.stopped.clone(),
        }))
    }

    fn is_available(&self) -> bool {
        true
    }

    fn version(&self) -> Option<String> {
        Some("stub".to_string())
    }
}

struct StubPublisher {
    attempts: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl ArtifactPublisher for StubPublisher {
    async fn publish(&self, artifact: &mut Artifact) -> Result<String, PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PublishError::UploadFailed("bucket unreachable".to_string()));
        }
        let url = format!(
            "https://archive.example/{}",
            artifact.local_path.file_name().unwrap().to_string_lossy()
        );
        artifact.remote_url = Some(url.clone());
        Ok(url)
    }
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutgoingEmail) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}

fn show(id: u64, now: DateTime<Utc>, start_s: i64, end_s: i64) -> RawShow {
    RawShow {
        id,
        title: format!("Show {id}"),
        start: now + chrono::Duration::seconds(start_s),
        end: now + chrono::Duration::seconds(end_s),
        category: Some("Music".to_string()),
        recipient_emails: vec![format!("dj{id}@example.org")],
    }
}

struct Harness {
    clock: ManualClock,
    engine: Arc<StubEngine>,
    publisher: Arc<StubPublisher>,
    mailer: Arc<RecordingMailer>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

fn start_harness(shows: Vec<RawShow>, clock: ManualClock, publish_fails: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(StubEngine::default());
    let publisher = Arc::new(StubPublisher {
        attempts: AtomicUsize::new(0),
        fail: publish_fails,
    });
    let mailer = Arc::new(RecordingMailer::default());

    let supervisor = RecordingSupervisor::new(
        engine.clone(),
        "https://stream.example/live".to_string(),
        dir.path().to_path_buf(),
    );
    let notifier = Arc::new(Notifier::new(mailer.clone(), "Test FM", None));

    let config = SchedulerConfig {
        poll_interval: Duration::from_secs(1),
        refresh_interval: Duration::from_secs(3600),
        min_remaining: chrono::Duration::zero(),
        stop_grace: Duration::from_millis(10),
        retry: RetryConfig::immediate(1),
        ..Default::default()
    };

    let mut scheduler = SchedulerLoop::new(
        config,
        Arc::new(clock.clone()),
        Arc::new(StubSource { shows }),
        supervisor,
        publisher.clone(),
        notifier,
    );

    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move { scheduler.run(loop_cancel).await });

    Harness {
        clock,
        engine,
        publisher,
        mailer,
        cancel,
        handle,
        _dir: dir,
    }
}

/// Advance the mock clock one second at a time, yielding real time between
/// steps so the loop can run its cycles.
async fn step_seconds(clock: &ManualClock, seconds: u64) {
    for _ in 0..seconds {
        tokio::time::sleep(Duration::from_millis(40)).await;
        clock.advance(Duration::from_secs(1));
    }
    tokio::time::sleep(Duration::from_millis(40)).await;
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn full_show_lifecycle() {
    let clock = ManualClock::new(Utc::now());
    let now = clock.now();
    // One show starting in 2s and ending in 4s.
    let harness = start_harness(vec![show(1, now, 2, 4)], clock.clone(), false);

    // Within one poll of second 2 the capture must be running.
    step_seconds(&harness.clock, 3).await;
    wait_until("capture started", || {
        harness.engine.started.load(Ordering::SeqCst) == 1
    })
    .await;
    assert_eq!(harness.engine.stopped.load(Ordering::SeqCst), 0);

    // Past second 4 the capture stops and the pipeline runs exactly once.
    step_seconds(&harness.clock, 3).await;
    wait_until("capture stopped", || {
        harness.engine.stopped.load(Ordering::SeqCst) == 1
    })
    .await;
    wait_until("published once", || {
        harness.publisher.attempts.load(Ordering::SeqCst) == 1
    })
    .await;
    wait_until("notified once", || {
        harness.mailer.sent.lock().unwrap().len() == 1
    })
    .await;

    let sent = harness.mailer.sent.lock().unwrap();
    assert_eq!(sent[0].to, "dj1@example.org");
    assert!(sent[0].body.contains("https://archive.example/"));
    drop(sent);

    // Nothing fires twice on further cycles.
    step_seconds(&harness.clock, 3).await;
    assert_eq!(harness.engine.started.load(Ordering::SeqCst), 1);
    assert_eq!(harness.publisher.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.mailer.sent.lock().unwrap().len(), 1);

    harness.cancel.cancel();
    harness.clock.advance(Duration::from_secs(1));
    tokio::time::timeout(Duration::from_secs(5), harness.handle)
        .await
        .expect("loop should stop after cancel")
        .unwrap();
}

#[tokio::test]
async fn failed_upload_never_notifies() {
    let clock = ManualClock::new(Utc::now());
    let now = clock.now();
    let harness = start_harness(vec![show(1, now, 1, 2)], clock.clone(), true);

    step_seconds(&harness.clock, 4).await;
    wait_until("publish attempted", || {
        harness.publisher.attempts.load(Ordering::SeqCst) >= 1
    })
    .await;

    // Give the pipeline a moment; no notification may ever go out.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.mailer.sent.lock().unwrap().is_empty());

    harness.cancel.cancel();
    harness.clock.advance(Duration::from_secs(1));
    tokio::time::timeout(Duration::from_secs(5), harness.handle)
        .await
        .expect("loop should stop after cancel")
        .unwrap();
}

#[tokio::test]
async fn overlapping_shows_both_recorded() {
    let clock = ManualClock::new(Utc::now());
    let now = clock.now();
    // Back-to-back with a one-second overlap.
    let harness = start_harness(
        vec![show(1, now, 1, 4), show(2, now, 3, 6)],
        clock.clone(),
        false,
    );

    step_seconds(&harness.clock, 4).await;
    wait_until("both captures started", || {
        harness.engine.started.load(Ordering::SeqCst) == 2
    })
    .await;

    step_seconds(&harness.clock, 4).await;
    wait_until("both captures stopped", || {
        harness.engine.stopped.load(Ordering::SeqCst) == 2
    })
    .await;
    wait_until("both published", || {
        harness.publisher.attempts.load(Ordering::SeqCst) == 2
    })
    .await;
    wait_until("both notified", || {
        harness.mailer.sent.lock().unwrap().len() == 2
    })
    .await;

    harness.cancel.cancel();
    harness.clock.advance(Duration::from_secs(1));
    tokio::time::timeout(Duration::from_secs(5), harness.handle)
        .await
        .expect("loop should stop after cancel")
        .unwrap();
}
