//! aircheck library crate.
//!
//! Exposes the daemon's building blocks so integration tests can drive the
//! scheduler loop against stubbed collaborators.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notify;
pub mod publish;
pub mod recorder;
pub mod retry;
pub mod schedule;
pub mod scheduler;
pub mod utils;

pub use error::{Error, Result};
