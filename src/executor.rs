//! Bulk operation executor.
//!
//! [`BulkExecutor::execute`] returns an [`Execution`], a lazy iterator of
//! [`ProgressEvent`]s. Each target yields `processing` before its action runs,
//! so a consumer sees the marker while the (possibly slow) action is still in
//! flight. Once the iterator is exhausted, [`Execution::summary`] holds the
//! final counts.

use std::sync::Arc;

use crate::events::{BatchSummary, ProgressEvent, Status};
use crate::logging::{ErrorLog, TracingErrorLog};

/// Something a bulk operation can be applied to.
pub trait Target: Send {
    /// Label used in progress events and the failure list.
    fn label(&self) -> String;
}

impl Target for String {
    fn label(&self) -> String {
        self.clone()
    }
}

impl Target for &str {
    fn label(&self) -> String {
        (*self).to_string()
    }
}

/// Result of running an action on one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Per-target unit of work.
///
/// Returning `Err` is treated like a failed outcome whose message is the
/// error's display text; the error is also sent to the [`ErrorLog`].
pub trait Action<T> {
    fn invoke(&mut self, target: &T) -> anyhow::Result<Outcome>;

    /// Description used for `dry_run` events.
    fn describe(&self, target: &T) -> String;
}

/// Adapter turning a closure into an [`Action`].
pub struct FnAction<F> {
    f: F,
}

pub fn action_fn<T, F>(f: F) -> FnAction<F>
where
    F: FnMut(&T) -> anyhow::Result<Outcome>,
{
    FnAction { f }
}

impl<T: Target, F> Action<T> for FnAction<F>
where
    F: FnMut(&T) -> anyhow::Result<Outcome>,
{
    fn invoke(&mut self, target: &T) -> anyhow::Result<Outcome> {
        (self.f)(target)
    }

    fn describe(&self, target: &T) -> String {
        format!("process {}", target.label())
    }
}

/// Batch policy: operation name, dry-run, cancellation, error sink.
#[derive(Clone)]
pub struct BulkExecutor {
    operation: String,
    dry_run: bool,
    error_log: Arc<dyn ErrorLog>,
}

impl BulkExecutor {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            dry_run: false,
            error_log: Arc::new(TracingErrorLog),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = error_log;
        self
    }

    /// Start a batch over `targets`. `is_cancelled` is polled once per target,
    /// after its `processing` event and before its action.
    pub fn execute<'a, T, A, C>(&self, targets: &'a [T], action: A, is_cancelled: C) -> Execution<'a, T, A, C>
    where
        T: Target,
        A: Action<T>,
        C: Fn() -> bool,
    {
        Execution {
            policy: self.clone(),
            targets,
            action,
            is_cancelled,
            next: Step::Announce(0),
            summary: BatchSummary::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Emit `processing` for the target at this 0-based position.
    Announce(usize),
    /// Check cancellation, then act on the target at this position.
    Act(usize),
    Finished,
}

/// A running batch. Finite and not restartable.
pub struct Execution<'a, T, A, C> {
    policy: BulkExecutor,
    targets: &'a [T],
    action: A,
    is_cancelled: C,
    next: Step,
    summary: BatchSummary,
}

impl<'a, T, A, C> Execution<'a, T, A, C>
where
    T: Target,
    A: Action<T>,
    C: Fn() -> bool,
{
    /// Counts so far; final once the iterator returns `None`.
    pub fn summary(&self) -> &BatchSummary {
        &self.summary
    }

    pub fn is_finished(&self) -> bool {
        self.next == Step::Finished
    }

    /// Drain remaining events into `sink` and return the summary.
    pub fn run_to_end(mut self, mut sink: impl FnMut(ProgressEvent)) -> BatchSummary {
        for event in self.by_ref() {
            sink(event);
        }
        self.summary
    }

    fn act(&mut self, pos: usize) -> ProgressEvent {
        let total = self.targets.len();
        let index = pos + 1;
        let targets = self.targets;
        let target = &targets[pos];
        let label = target.label();

        if self.policy.dry_run {
            self.summary.record_success();
            let message = format!("[DRY RUN] Would {}", self.action.describe(target));
            return ProgressEvent::new(Status::DryRun, label, index, total, message);
        }

        match self.action.invoke(target) {
            Ok(outcome) if outcome.success => {
                self.summary.record_success();
                ProgressEvent::new(Status::Success, label, index, total, format!("✓ {}", outcome.message))
            }
            Ok(outcome) => {
                let message = format!("✗ {}", outcome.message);
                self.summary.record_failure(label.clone(), outcome.message);
                ProgressEvent::new(Status::Error, label, index, total, message)
            }
            Err(e) => {
                let text = e.to_string();
                self.policy
                    .error_log
                    .log_error(&self.policy.operation, &format!("Exception for {}: {}", label, text));
                let message = format!("✗ Error for {}: {}", label, crate::command::truncate(&text, 100));
                self.summary.record_failure(label.clone(), text);
                ProgressEvent::new(Status::Error, label, index, total, message)
            }
        }
    }
}

impl<'a, T, A, C> Iterator for Execution<'a, T, A, C>
where
    T: Target,
    A: Action<T>,
    C: Fn() -> bool,
{
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        let total = self.targets.len();
        match self.next {
            Step::Finished => None,
            Step::Announce(pos) if pos >= total => {
                self.next = Step::Finished;
                None
            }
            Step::Announce(pos) => {
                self.next = Step::Act(pos);
                let label = self.targets[pos].label();
                let message = format!("Processing {}... ({}/{})", label, pos + 1, total);
                Some(ProgressEvent::new(Status::Processing, label, pos + 1, total, message))
            }
            Step::Act(pos) => {
                if (self.is_cancelled)() {
                    self.next = Step::Finished;
                    self.summary.cancelled = true;
                    let label = self.targets[pos].label();
                    let message = format!(
                        "Operation cancelled by user ({} of {} processed)",
                        self.summary.attempted(),
                        total
                    );
                    return Some(ProgressEvent::new(Status::Cancelled, label, pos + 1, total, message));
                }
                self.next = Step::Announce(pos + 1);
                Some(self.act(pos))
            }
        }
    }
}
