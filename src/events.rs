use serde::{Deserialize, Serialize};

/// Status carried by a progress event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Processing,
    Success,
    Error,
    DryRun,
    Cancelled,
}

impl Status {
    /// True for the statuses that close out a single target.
    pub fn is_target_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Error | Status::DryRun)
    }
}

/// Structured event emitted once per target state transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressEvent {
    pub status: Status,
    /// Display label of the target.
    pub target: String,
    /// 1-based position in the batch.
    pub index: usize,
    pub total: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(status: Status, target: impl Into<String>, index: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            status,
            target: target.into(),
            index,
            total,
            message: message.into(),
        }
    }
}

/// Outcome counts for a finished (or cancelled) batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub success_count: usize,
    pub failure_count: usize,
    /// `(target, error_message)` in the order failures happened.
    pub errors: Vec<(String, String)>,
    /// Set when the batch stopped early on a cancellation request.
    #[serde(default)]
    pub cancelled: bool,
}

impl BatchSummary {
    /// Number of targets the executor actually attempted.
    pub fn attempted(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0 && !self.cancelled
    }

    pub(crate) fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub(crate) fn record_failure(&mut self, target: String, message: String) {
        self.failure_count += 1;
        self.errors.push((target, message));
    }
}

/// Terminal state of a relayed operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Terminal {
    Done { summary: BatchSummary },
    Cancelled { summary: BatchSummary },
    /// The driving call itself failed; the batch was abandoned.
    Error { message: String },
}

impl Terminal {
    pub fn status(&self) -> TerminalStatus {
        match self {
            Terminal::Done { .. } => TerminalStatus::Done,
            Terminal::Cancelled { .. } => TerminalStatus::Cancelled,
            Terminal::Error { .. } => TerminalStatus::Error,
        }
    }

    pub fn summary(&self) -> Option<&BatchSummary> {
        match self {
            Terminal::Done { summary } | Terminal::Cancelled { summary } => Some(summary),
            Terminal::Error { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Done,
    Cancelled,
    Error,
}
