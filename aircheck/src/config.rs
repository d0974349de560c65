//! Configuration loading and validation.
//!
//! Settings come from a TOML file (path in `AIRCHECK_CONFIG`, default
//! `config.toml`); the two secrets can be overridden from the environment so
//! they never have to live on disk. Invalid configuration is the one fatal
//! startup error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryConfig;
use crate::utils::email::is_valid_address;
use crate::{Error, Result};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "AIRCHECK_CONFIG";
/// Environment override for the schedule API key.
pub const API_KEY_ENV: &str = "AIRCHECK_API_KEY";
/// Environment override for the SMTP password.
pub const EMAIL_PASSWORD_ENV: &str = "AIRCHECK_EMAIL_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiSettings,
    pub stream: StreamSettings,
    pub storage: StorageSettings,
    pub email: EmailSettings,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Schedule API access.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(default)]
    pub key: String,
    /// How many upcoming shows to request per refresh.
    #[serde(default = "default_fetch_count")]
    pub fetch_count: usize,
    /// Schedule category that must never be recorded.
    #[serde(default = "default_excluded_category")]
    pub excluded_category: String,
}

/// What to record and where to keep local files.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    pub url: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// ffmpeg binary, overridable for exotic installs.
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: String,
}

/// Object storage target.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
}

/// SMTP delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub address: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_station_name")]
    pub station_name: String,
    /// Where mail for hosts with a broken public address goes instead.
    #[serde(default)]
    pub fallback_address: Option<String>,
}

/// Loop cadence and process-stop behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub poll_interval_secs: u64,
    pub refresh_interval_secs: u64,
    /// Slots with less remaining airtime than this are abandoned, not started.
    pub min_remaining_secs: u64,
    /// Grace period before a capture process is killed.
    pub stop_grace_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            refresh_interval_secs: 3600,
            min_remaining_secs: 300,
            stop_grace_secs: 30,
        }
    }
}

impl SchedulerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn min_remaining(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.min_remaining_secs as i64)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// Log filtering and optional file output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub directive: Option<String>,
    /// Directory for daily-rotated log files; console only when unset.
    pub dir: Option<PathBuf>,
}

fn default_fetch_count() -> usize {
    24
}

fn default_excluded_category() -> String {
    "Automation".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("recordings")
}

fn default_ffmpeg_binary() -> String {
    "ffmpeg".to_string()
}

fn default_region() -> String {
    "us-west-1".to_string()
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_station_name() -> String {
    "the station".to_string()
}

impl Config {
    /// Load from the configured path, apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| Error::config(format!("cannot parse {}: {e}", path.display())))?;

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.api.key = key;
        }
        if let Ok(password) = std::env::var(EMAIL_PASSWORD_ENV) {
            config.email.password = password;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.key.is_empty() {
            return Err(Error::config(format!(
                "schedule API key is empty; set [api].key or {API_KEY_ENV}"
            )));
        }
        if self.api.base_url.is_empty() {
            return Err(Error::config("[api].base_url is empty"));
        }
        if self.stream.url.is_empty() {
            return Err(Error::config("[stream].url is empty"));
        }
        if self.storage.bucket.is_empty() {
            return Err(Error::config("[storage].bucket is empty"));
        }
        if !is_valid_address(&self.email.address) {
            return Err(Error::config(format!(
                "invalid sender address: {:?}",
                self.email.address
            )));
        }
        if self.email.password.is_empty() {
            return Err(Error::config(format!(
                "email password is empty; set [email].password or {EMAIL_PASSWORD_ENV}"
            )));
        }
        if let Some(fallback) = &self.email.fallback_address
            && !is_valid_address(fallback)
        {
            return Err(Error::config(format!(
                "invalid fallback address: {fallback:?}"
            )));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(Error::config("[scheduler].poll_interval_secs must be > 0"));
        }
        Ok(())
    }
}
