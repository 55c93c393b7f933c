use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Sink for unexpected per-target errors.
pub trait ErrorLog: Send + Sync {
    fn log_error(&self, operation: &str, message: &str);
}

/// Routes errors through `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorLog;

impl ErrorLog for TracingErrorLog {
    fn log_error(&self, operation: &str, message: &str) {
        tracing::error!(operation, "{}", message);
    }
}

/// Install the global subscriber: stderr, plus `log_file` when given.
///
/// The log file is truncated on every run. `RUST_LOG` overrides `default_level`.
pub fn init(default_level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file: {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    // A subscriber may already be installed (tests, embedding); keep it.
    if let Err(e) = installed {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
    Ok(())
}
