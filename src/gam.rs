//! Locating, checking, and invoking the GAM executable.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::command::{CommandError, CommandOutput, CommandRunner, GamRunner};
use crate::retry::{RetryPolicy, Sleeper, ThreadSleeper, transient_signal};

pub const VERSION_TIMEOUT: Duration = Duration::from_secs(10);
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum GamCheckError {
    #[error("GAM is not installed or not found in PATH. Please install GAM7 from: https://github.com/GAM-team/GAM")]
    NotInstalled,
    #[error("GAM command failed. Please ensure GAM is installed and in your PATH.")]
    CommandFailed,
    #[error("Please upgrade to GAM7. Visit: https://github.com/GAM-team/GAM")]
    WrongVersion,
    #[error("GAM version check timed out. Please check your GAM installation.")]
    TimedOut,
    #[error("Error checking GAM version: {0}")]
    Other(CommandError),
    #[error("GAM is not authenticated. Please run 'gam oauth create' or visit: https://github.com/GAM-team/GAM/wiki/Authorization")]
    NotAuthenticated,
    #[error("GAM authentication check failed: {0}")]
    AuthFailed(String),
    #[error("GAM authentication check timed out. Please check your network connection.")]
    AuthTimedOut,
    #[error("Error checking GAM authentication: {0}")]
    AuthOther(CommandError),
}

/// Find GAM: explicit path first, then `PATH`, then common install locations.
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let names: &[&str] = if cfg!(windows) { &["gam.exe", "gam"] } else { &["gam"] };
    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            for name in names {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    common_locations().into_iter().find(|p| is_executable(p))
}

fn common_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(home) = dirs::home_dir() {
        locations.push(home.join("bin/gam7/gam"));
        locations.push(home.join("bin/gam"));
        locations.push(home.join(".local/bin/gam"));
        locations.push(home.join("bin/gam7/gam.exe"));
    }
    locations.extend(
        [
            "/usr/local/bin/gam",
            "/usr/bin/gam",
            "C:\\GAM\\gam.exe",
            "C:\\Program Files\\GAM\\gam.exe",
            "C:\\Program Files (x86)\\GAM\\gam.exe",
        ]
        .into_iter()
        .map(PathBuf::from),
    );
    locations
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// True when `gam version` output identifies GAM 7.
pub fn is_gam7(output: &str) -> bool {
    if output.contains("GAM7") {
        return true;
    }
    let lower = output.to_lowercase();
    lower.match_indices("gam").any(|(idx, _)| {
        let rest = &lower[idx + 3..];
        let trimmed = rest.trim_start();
        trimmed.len() < rest.len()
            && trimmed.starts_with('7')
            && trimmed[1..].starts_with('.')
            && trimmed[2..].starts_with(|c: char| c.is_ascii_digit())
    })
}

/// GAM invoker shared by actions, cache fetches, and scans.
#[derive(Clone)]
pub struct Gam {
    runner: Arc<dyn CommandRunner>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Gam {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Use the real executable at `program`.
    pub fn at(program: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(GamRunner::new(program)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// One attempt, no retry.
    pub fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, CommandError> {
        self.runner.run(args, timeout)
    }

    /// Retry on rate-limit, quota, and timeout signals.
    pub fn run_with_retry(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, CommandError> {
        self.retry.run(
            self.sleeper.as_ref(),
            || self.runner.run(args, timeout),
            |result| match result {
                Ok(output) if !output.success() => transient_signal(&output.stderr).map(str::to_string),
                Ok(_) => None,
                Err(CommandError::Timeout(_)) => Some("timeout".to_string()),
                Err(_) => None,
            },
        )
    }

    /// Run `gam version` and confirm GAM 7 is installed.
    pub fn check_version(&self) -> Result<String, GamCheckError> {
        let output = match self.run(&["version".to_string()], VERSION_TIMEOUT) {
            Ok(output) => output,
            Err(CommandError::NotFound(_)) => return Err(GamCheckError::NotInstalled),
            Err(CommandError::Timeout(_)) => return Err(GamCheckError::TimedOut),
            Err(e) => return Err(GamCheckError::Other(e)),
        };
        if !output.success() {
            return Err(GamCheckError::CommandFailed);
        }
        let combined = format!("{}{}", output.stdout, output.stderr);
        if is_gam7(&combined) {
            Ok(combined.lines().next().unwrap_or_default().trim().to_string())
        } else {
            Err(GamCheckError::WrongVersion)
        }
    }
}

impl Gam {
    /// Run `gam info domain` to confirm GAM holds working credentials.
    pub fn check_auth(&self) -> Result<(), GamCheckError> {
        let output = match self.run(&owned_args(&["info", "domain"]), AUTH_TIMEOUT) {
            Ok(output) => output,
            Err(CommandError::NotFound(_)) => return Err(GamCheckError::NotInstalled),
            Err(CommandError::Timeout(_)) => return Err(GamCheckError::AuthTimedOut),
            Err(e) => return Err(GamCheckError::AuthOther(e)),
        };
        if output.success() {
            return Ok(());
        }
        let combined = format!("{}{}", output.stdout, output.stderr);
        if mentions_any(&combined.to_lowercase(), &["oauth", "authentication", "credentials"]) {
            Err(GamCheckError::NotAuthenticated)
        } else {
            Err(GamCheckError::AuthFailed(crate::command::truncate(&combined, 200)))
        }
    }
}

fn owned_args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn mentions_any(text: &str, keys: &[&str]) -> bool {
    keys.iter().any(|k| text.contains(*k))
}

/// Translate raw GAM error text into a user-facing message and optional help link.
pub fn friendly_error(raw: &str) -> (String, Option<&'static str>) {
    let lower = raw.to_lowercase();

    if mentions_any(&lower, &["oauth", "credentials", "authentication", "not authorized"]) {
        return (
            "GAM is not authenticated. Please run \"gam oauth create\".".to_string(),
            Some("https://github.com/GAM-team/GAM/wiki/Authorization"),
        );
    }
    if mentions_any(&lower, &["insufficient", "permission denied"]) {
        return (
            "Insufficient permissions. Check admin role settings in Google Workspace.".to_string(),
            Some("https://support.google.com/a/answer/2405986"),
        );
    }
    if mentions_any(&lower, &["rate limit", "quota exceeded"]) {
        return (
            "Rate limit exceeded. Please wait a few minutes and try again.".to_string(),
            Some("https://developers.google.com/admin-sdk/directory/v1/limits"),
        );
    }
    if mentions_any(&lower, &["not found", "does not exist"]) {
        return (
            "Resource not found. Verify the email address or ID is correct.".to_string(),
            None,
        );
    }
    if mentions_any(&lower, &["invalid", "bad request"]) {
        return ("Invalid parameter. Check your input and try again.".to_string(), None);
    }
    (
        format!("Operation failed: {}", crate::command::truncate(raw, 200)),
        None,
    )
}
