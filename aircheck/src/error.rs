//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Per-stage errors live next to their modules; this enum is the aggregate
/// used at the loop boundary and in `main`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("schedule error: {0}")]
    Schedule(#[from] crate::schedule::ScheduleError),

    #[error("capture error: {0}")]
    Capture(#[from] capture_engine::CaptureError),

    #[error("publish error: {0}")]
    Publish(#[from] crate::publish::PublishError),

    #[error("notify error: {0}")]
    Notify(#[from] crate::notify::NotifyError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
