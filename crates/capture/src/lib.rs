//! Supervised external capture processes.
//!
//! A [`CaptureEngine`] knows how to launch one recorder process against a
//! stream URL; the returned [`CaptureProcess`] is the handle used to stop it
//! again. Stopping is always graceful first (bounded grace period), then a
//! hard kill, and the output file is validated before it is handed back.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod ffmpeg;

pub use ffmpeg::{FfmpegCapture, FfmpegConfig};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Errors produced while launching or finishing a capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The recorder binary could not be spawned at all.
    #[error("failed to launch capture process: {0}")]
    LaunchFailed(#[source] std::io::Error),
    /// The process ran but left no usable output behind.
    #[error("capture output missing or empty: {}", .0.display())]
    IncompleteCapture(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// What to capture and where to put it.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    /// Stream URL handed to the recorder.
    pub stream_url: String,
    /// Absolute output file path.
    pub output_path: PathBuf,
}

impl CaptureSpec {
    pub fn new(stream_url: impl Into<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            stream_url: stream_url.into(),
            output_path: output_path.into(),
        }
    }
}

/// A running capture that can be stopped exactly once.
#[async_trait]
pub trait CaptureProcess: Send {
    /// Ask the process to finish, waiting up to `grace` before killing it.
    ///
    /// Returns the validated output path. A missing or zero-length output
    /// file is reported as [`CaptureError::IncompleteCapture`].
    async fn stop(self: Box<Self>, grace: Duration) -> Result<PathBuf, CaptureError>;
}

/// Capability interface for launching capture processes.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Spawn a recorder for `spec`.
    async fn spawn(&self, spec: &CaptureSpec) -> Result<Box<dyn CaptureProcess>, CaptureError>;

    /// Whether the underlying binary was found at construction.
    fn is_available(&self) -> bool;

    /// Version string of the underlying binary, if detected.
    fn version(&self) -> Option<String>;
}

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}
