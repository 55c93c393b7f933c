use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::events::{ProgressEvent, Terminal};

/// A single journal entry (NDJSON line). Exactly one of `event` and
/// `terminal` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    /// Shared by every line of one run.
    pub run_id: Uuid,
    pub ts: DateTime<Utc>,
    /// Operation display name.
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<ProgressEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<Terminal>,
}

impl JournalEntry {
    pub fn for_event(run_id: Uuid, operation: &str, event: &ProgressEvent) -> Self {
        Self {
            run_id,
            ts: Utc::now(),
            operation: operation.to_string(),
            event: Some(event.clone()),
            terminal: None,
        }
    }

    pub fn for_terminal(run_id: Uuid, operation: &str, terminal: &Terminal) -> Self {
        Self {
            run_id,
            ts: Utc::now(),
            operation: operation.to_string(),
            event: None,
            terminal: Some(terminal.clone()),
        }
    }
}

/// Journal writer that appends NDJSON lines.
pub struct JournalWriter {
    file: std::fs::File,
}

impl JournalWriter {
    /// Open journal file for appending.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| anyhow::anyhow!("failed to open journal {}: {}", path.display(), e))?;
        Ok(Self { file })
    }

    /// Write a journal entry.
    pub fn write(&mut self, entry: &JournalEntry) -> anyhow::Result<()> {
        let line = serde_json::to_string(entry)?;
        use std::io::Write;
        writeln!(&mut self.file, "{}", line)?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Read journal entries from a file.
pub fn read_journal(path: PathBuf) -> anyhow::Result<Vec<JournalEntry>> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<JournalEntry> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| anyhow::anyhow!("invalid journal line: {}", e)))
        .collect::<anyhow::Result<_>>()?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BatchSummary, Status};
    use tempfile::tempdir;

    #[test]
    fn appends_and_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let run_id = Uuid::new_v4();
        let event = ProgressEvent::new(Status::Success, "a@x.com", 1, 1, "✓ done");
        let terminal = Terminal::Done {
            summary: BatchSummary {
                success_count: 1,
                ..Default::default()
            },
        };

        let mut writer = JournalWriter::open(path.clone()).unwrap();
        writer.write(&JournalEntry::for_event(run_id, "Suspend User", &event)).unwrap();
        writer.write(&JournalEntry::for_terminal(run_id, "Suspend User", &terminal)).unwrap();
        drop(writer);

        let entries = read_journal(path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.run_id == run_id));
        assert_eq!(entries[0].event.as_ref(), Some(&event));
        assert_eq!(entries[1].terminal.as_ref(), Some(&terminal));
        assert!(entries[1].event.is_none());
    }

    #[test]
    fn garbage_line_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(read_journal(path).is_err());
    }
}
