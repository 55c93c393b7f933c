//! Per-target GAM invocation for catalog operations.

use std::sync::Arc;
use std::time::Duration;

use crate::command::CommandError;
use crate::executor::{Action, Outcome, Target};
use crate::gam::Gam;
use crate::logging::ErrorLog;
use crate::model::{JobTarget, Operation};

/// Longest stderr excerpt kept as a failure message.
const ERROR_TEXT_LIMIT: usize = 2000;

/// Runs one catalog operation against a target through GAM.
pub struct GamAction {
    operation: Operation,
    gam: Gam,
    timeout: Duration,
    error_log: Arc<dyn ErrorLog>,
}

impl GamAction {
    pub fn new(operation: Operation, gam: Gam, timeout: Duration, error_log: Arc<dyn ErrorLog>) -> Self {
        Self {
            operation,
            gam,
            timeout,
            error_log,
        }
    }
}

impl Action<JobTarget> for GamAction {
    fn invoke(&mut self, target: &JobTarget) -> anyhow::Result<Outcome> {
        let args = self.operation.args(target)?;
        let label = target.label();
        match self.gam.run_with_retry(&args, self.timeout) {
            Ok(output) if output.success() => Ok(Outcome::success(self.operation.success_message(target))),
            Ok(output) => {
                let error = output.error_text(ERROR_TEXT_LIMIT);
                self.error_log
                    .log_error(self.operation.name(), &format!("Failed for {}: {}", label, error));
                Ok(Outcome::failure(error))
            }
            Err(CommandError::Timeout(_)) => {
                let attempts = self.gam.retry_policy().max_retries + 1;
                let error = format!("Command timed out after {} attempts", attempts);
                self.error_log
                    .log_error(self.operation.name(), &format!("{} for {}", error, label));
                Ok(Outcome::failure(error))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self, target: &JobTarget) -> String {
        self.operation.describe(target)
    }
}
