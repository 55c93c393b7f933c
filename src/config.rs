use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tool settings. Every field has a default; a settings file only needs the
/// fields it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    /// Path to the GAM executable; searched for when unset.
    #[serde(default)]
    pub gam_path: Option<PathBuf>,
    /// Timeout for single-target commands.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Timeout for enumerations (`print users`, mailbox-wide operations).
    #[serde(default = "default_list_timeout")]
    pub list_timeout_secs: u64,
    /// Timeout for scanning one user's Drive.
    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,
    /// Retries after the first attempt on rate-limit, quota, or timeout.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Exponential backoff base in seconds.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    /// How often the progress surface drains the event queue.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Error log file, truncated at startup.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Organization domain used by the Drive sharing scan.
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_command_timeout() -> u64 {
    30
}

fn default_list_timeout() -> u64 {
    60
}

fn default_scan_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_poll_interval() -> u64 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gam_path: None,
            command_timeout_secs: default_command_timeout(),
            list_timeout_secs: default_list_timeout(),
            scan_timeout_secs: default_scan_timeout(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            poll_interval_ms: default_poll_interval(),
            log_file: None,
            domain: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open settings file: {}", path.display()))?;
        let settings: Settings = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("invalid settings file: {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 || self.list_timeout_secs == 0 || self.scan_timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        if self.backoff_factor == 0 {
            anyhow::bail!("backoff_factor must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_factor)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
