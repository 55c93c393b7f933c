use std::io::Write;
use std::time::Duration;
use uuid::Uuid;

use crate::acl::ScanReport;
use crate::events::{ProgressEvent, Terminal};
use crate::gam::friendly_error;
use crate::journal::{JournalEntry, JournalWriter};

/// Reporter renders relayed events as human or JSON lines and mirrors them
/// into the journal.
pub struct Reporter<W: Write = std::io::Stdout> {
    out: W,
    json_mode: bool,
    operation: String,
    run_id: Uuid,
    journal: Option<JournalWriter>,
    #[cfg(feature = "cli")]
    bar: Option<indicatif::ProgressBar>,
}

impl Reporter {
    pub fn new(operation: &str, json_mode: bool) -> Self {
        Self::with_writer(std::io::stdout(), operation, json_mode)
    }
}

impl<W: Write> Reporter<W> {
    pub fn with_writer(out: W, operation: &str, json_mode: bool) -> Self {
        Self {
            out,
            json_mode,
            operation: operation.to_string(),
            run_id: Uuid::new_v4(),
            journal: None,
            #[cfg(feature = "cli")]
            bar: None,
        }
    }

    pub fn journal(mut self, journal: Option<JournalWriter>) -> Self {
        self.journal = journal;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        #[cfg(feature = "cli")]
        if let Some(bar) = &self.bar {
            bar.suspend(|| writeln!(self.out, "{}", text).ok());
            return;
        }
        if let Err(e) = writeln!(self.out, "{}", text) {
            tracing::warn!("failed to write output: {}", e);
        }
    }

    fn json_line<T: serde::Serialize>(&mut self, value: &T) {
        match serde_json::to_string(value) {
            Ok(line) => self.line(&line),
            Err(e) => tracing::warn!("failed to encode output: {}", e),
        }
    }

    fn journal_write(&mut self, entry: JournalEntry) {
        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.write(&entry) {
                tracing::warn!("journal write failed: {:#}", e);
            }
        }
    }

    /// Informational line shown before a batch starts. Suppressed in JSON mode.
    pub fn notice(&mut self, text: &str) {
        if !self.json_mode {
            self.line(text);
        }
    }

    pub fn event(&mut self, event: &ProgressEvent) {
        self.journal_write(JournalEntry::for_event(self.run_id, &self.operation, event));
        if self.json_mode {
            self.json_line(event);
            return;
        }
        #[cfg(feature = "cli")]
        self.advance_bar(event);
        self.line(&event.message);
    }

    #[cfg(feature = "cli")]
    fn advance_bar(&mut self, event: &ProgressEvent) {
        let bar = self.bar.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(event.total as u64);
            if let Ok(style) = indicatif::ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}") {
                bar.set_style(style);
            }
            bar
        });
        if event.status == crate::events::Status::Processing {
            bar.set_message(event.target.clone());
        } else if event.status.is_target_terminal() {
            bar.inc(1);
        }
    }

    /// One notification for the terminal state.
    pub fn terminal(&mut self, terminal: &Terminal) {
        self.journal_write(JournalEntry::for_terminal(self.run_id, &self.operation, terminal));
        #[cfg(feature = "cli")]
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        if self.json_mode {
            self.json_line(terminal);
            return;
        }
        for line in summary_lines(&self.operation, terminal) {
            self.line(&line);
        }
    }

    pub fn scan_report(&mut self, report: &ScanReport) {
        if self.json_mode {
            self.json_line(report);
            return;
        }
        self.line(&format!(
            "Scanned {} users, {} files: {} files shared externally ({} external permissions)",
            report.users_scanned, report.files_scanned, report.files_with_external_acls, report.external_shares_found
        ));
        for finding in &report.findings {
            let grantees: Vec<&str> = finding
                .external_permissions
                .iter()
                .map(|p| p.grantee.as_str())
                .collect();
            self.line(&format!(
                "  {} \"{}\" ({}): {}",
                finding.user,
                finding.file_name,
                finding.file_id,
                grantees.join(", ")
            ));
        }
    }
}

/// Human-readable notification text for a terminal state.
pub fn summary_lines(operation: &str, terminal: &Terminal) -> Vec<String> {
    let summary = match terminal {
        Terminal::Error { message } => return vec![format!("{} failed: {}", operation, message)],
        Terminal::Done { summary } | Terminal::Cancelled { summary } => summary,
    };
    let mut lines = Vec::new();
    let counts = format!("{} succeeded, {} failed", summary.success_count, summary.failure_count);
    lines.push(match terminal {
        Terminal::Cancelled { .. } => format!("{} cancelled: {}", operation, counts),
        _ if summary.failure_count > 0 => format!("{} finished with errors: {}", operation, counts),
        _ => format!("{} complete: {}", operation, counts),
    });
    for (target, error) in &summary.errors {
        let (message, help) = friendly_error(error);
        match help {
            Some(link) => lines.push(format!("  {}: {} (see {})", target, message, link)),
            None => lines.push(format!("  {}: {}", target, message)),
        }
    }
    lines
}

fn plural(n: u64, unit: &str) -> String {
    format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" })
}

/// Rough wall-clock estimate for `count` items at `per_item` each.
pub fn estimate_duration(count: usize, per_item: Duration) -> String {
    let total = per_item.as_secs_f64() * count as f64;
    if total < 60.0 {
        return format!("{} seconds", total as u64);
    }
    let total = total as u64;
    if total < 3600 {
        return plural(total / 60, "minute");
    }
    let (hours, minutes) = (total / 3600, (total % 3600) / 60);
    if minutes > 0 {
        format!("{}, {}", plural(hours, "hour"), plural(minutes, "minute"))
    } else {
        plural(hours, "hour")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BatchSummary, Status};
    use pretty_assertions::assert_eq;

    fn output(reporter: Reporter<Vec<u8>>) -> String {
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn estimates() {
        assert_eq!(estimate_duration(30, Duration::from_secs(1)), "30 seconds");
        assert_eq!(estimate_duration(60, Duration::from_secs(1)), "1 minute");
        assert_eq!(estimate_duration(300, Duration::from_secs(2)), "10 minutes");
        assert_eq!(estimate_duration(3600, Duration::from_secs(1)), "1 hour");
        assert_eq!(estimate_duration(5400, Duration::from_secs(1)), "1 hour, 30 minutes");
        assert_eq!(estimate_duration(0, Duration::from_secs(1)), "0 seconds");
    }

    #[test]
    fn human_lines_and_summary() {
        let mut reporter = Reporter::with_writer(Vec::new(), "Suspend User", false);
        reporter.event(&ProgressEvent::new(Status::Processing, "a@x.com", 1, 1, "Processing a@x.com... (1/1)"));
        reporter.event(&ProgressEvent::new(Status::Error, "a@x.com", 1, 1, "✗ Quota exceeded"));
        reporter.terminal(&Terminal::Done {
            summary: BatchSummary {
                success_count: 0,
                failure_count: 1,
                errors: vec![("a@x.com".into(), "Quota exceeded".into())],
                cancelled: false,
            },
        });
        let text = output(reporter);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Processing a@x.com... (1/1)");
        assert_eq!(lines[2], "Suspend User finished with errors: 0 succeeded, 1 failed");
        assert!(lines[3].starts_with("  a@x.com: Rate limit exceeded"));
        assert!(lines[3].contains("(see https://"));
    }

    #[test]
    fn json_mode_emits_one_object_per_line() {
        let mut reporter = Reporter::with_writer(Vec::new(), "Delete User", true);
        reporter.notice("Estimated time: 1 minute");
        reporter.event(&ProgressEvent::new(Status::DryRun, "a@x.com", 1, 1, "[DRY RUN] Would delete user: a@x.com"));
        reporter.terminal(&Terminal::Cancelled {
            summary: BatchSummary::default(),
        });
        let text = output(reporter);
        let values: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["status"], "dry_run");
        assert_eq!(values[1]["type"], "cancelled");
    }

    #[test]
    fn fatal_terminal_is_one_line() {
        let lines = summary_lines("Delete Group", &Terminal::Error { message: "worker panicked: x".into() });
        assert_eq!(lines, vec!["Delete Group failed: worker panicked: x".to_string()]);
    }
}
