use std::sync::Arc;

use anyhow::Context;
use capture_engine::{CaptureEngine, FfmpegCapture, FfmpegConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aircheck::clock::SystemClock;
use aircheck::config::Config;
use aircheck::notify::{Notifier, SmtpMailer};
use aircheck::publish::S3Publisher;
use aircheck::recorder::RecordingSupervisor;
use aircheck::schedule::SpinitronClient;
use aircheck::scheduler::{SchedulerConfig, SchedulerLoop};
use aircheck::{logging, publish::ArtifactPublisher, schedule::ScheduleSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Invalid configuration is the one fatal startup error.
    let config = Config::load().context("startup configuration")?;
    let _log_guard = logging::init(&config.logging);

    info!(version = env!("CARGO_PKG_VERSION"), "aircheck starting");

    tokio::fs::create_dir_all(&config.stream.output_dir)
        .await
        .with_context(|| {
            format!(
                "creating output directory {}",
                config.stream.output_dir.display()
            )
        })?;

    let clock = Arc::new(SystemClock);

    let source: Arc<dyn ScheduleSource> = Arc::new(SpinitronClient::new(
        config.api.base_url.clone(),
        config.api.key.clone(),
    ));

    let engine = Arc::new(FfmpegCapture::with_config(FfmpegConfig {
        binary_path: config.stream.ffmpeg_binary.clone(),
        ..Default::default()
    }));
    match engine.version() {
        Some(version) => info!(%version, "capture engine ready"),
        None => warn!(
            binary = %config.stream.ffmpeg_binary,
            "ffmpeg not found; captures will fail until it is installed"
        ),
    }

    let supervisor = RecordingSupervisor::new(
        engine,
        config.stream.url.clone(),
        config.stream.output_dir.clone(),
    );

    let publisher: Arc<dyn ArtifactPublisher> = Arc::new(S3Publisher::new(
        config.storage.bucket.clone(),
        config.storage.region.clone(),
        config.retry.clone(),
        clock.clone(),
    ));

    let mailer = Arc::new(SmtpMailer::new(
        &config.email.smtp_host,
        config.email.smtp_port,
        &config.email.address,
        &config.email.password,
    )?);
    let notifier = Arc::new(Notifier::new(
        mailer,
        config.email.station_name.clone(),
        config.email.fallback_address.clone(),
    ));

    let scheduler_config = SchedulerConfig {
        poll_interval: config.scheduler.poll_interval(),
        refresh_interval: config.scheduler.refresh_interval(),
        min_remaining: config.scheduler.min_remaining(),
        stop_grace: config.scheduler.stop_grace(),
        fetch_count: config.api.fetch_count,
        excluded_category: config.api.excluded_category.clone(),
        retry: config.retry.clone(),
    };

    let mut scheduler = SchedulerLoop::new(
        scheduler_config,
        clock,
        source,
        supervisor,
        publisher,
        notifier,
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    scheduler.run(cancel).await;

    info!("aircheck stopped");
    Ok(())
}

/// Cancel the loop on SIGINT/SIGTERM; the loop drains before exiting.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "cannot install SIGTERM handler");
                    let _ = tokio::signal::ctrl_c().await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt, shutting down"),
                _ = sigterm.recv() => info!("received terminate, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt, shutting down");
        }
        cancel.cancel();
    });
}
