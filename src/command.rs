use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Captured result of one GAM invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stderr trimmed to `limit` characters, or a placeholder when empty.
    pub fn error_text(&self, limit: usize) -> String {
        let trimmed = self.stderr.trim();
        if trimmed.is_empty() {
            "Unknown error".to_string()
        } else {
            truncate(trimmed, limit)
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("GAM executable not found: {0}")]
    NotFound(PathBuf),
    #[error("Command timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("Command execution failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs GAM with an argument list and a deadline.
pub trait CommandRunner: Send + Sync {
    fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, CommandError>;
}

/// Spawns the real GAM executable.
#[derive(Debug, Clone)]
pub struct GamRunner {
    program: PathBuf,
}

const POLL_STEP: Duration = Duration::from_millis(10);

impl GamRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CommandRunner for GamRunner {
    fn run(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, CommandError> {
        tracing::debug!(program = %self.program.display(), args = ?redacted(args), "running gam");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CommandError::NotFound(self.program.clone()),
                _ => CommandError::Io(e),
            })?;

        // Drain both pipes while waiting so a chatty child cannot block on a full pipe.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let code = match wait_with_deadline(&mut child, timeout) {
            Ok(Some(code)) => code,
            Ok(None) => {
                reap(&mut child);
                return Err(CommandError::Timeout(timeout));
            }
            Err(e) => {
                reap(&mut child);
                return Err(CommandError::Io(e));
            }
        };

        Ok(CommandOutput {
            code,
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        })
    }
}

/// Arguments safe to log: the value after `password` is masked.
fn redacted(args: &[String]) -> Vec<&str> {
    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        out.push(if mask_next { "********" } else { arg.as_str() });
        mask_next = arg.eq_ignore_ascii_case("password");
    }
    out
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// `Some(code)` once the child exits, `None` if the deadline passes first.
/// A timeout too large to represent as an instant never expires.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<Option<i32>>> {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.code()));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(None);
        }
        std::thread::sleep(POLL_STEP);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Truncate on a character boundary.
pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_text_falls_back_when_stderr_empty() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "  \n".into(),
        };
        assert_eq!(output.error_text(200), "Unknown error");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn logged_arguments_hide_passwords() {
        let args: Vec<String> = ["update", "user", "a@x.com", "password", "Secret123!"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(redacted(&args), vec!["update", "user", "a@x.com", "password", "********"]);
    }

    #[test]
    fn missing_program_reports_not_found() {
        let runner = GamRunner::new("/definitely/not/a/real/gam");
        let err = runner.run(&["version".to_string()], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CommandError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let runner = GamRunner::new("sh");
        let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
        let output = runner.run(&args, Duration::from_secs(5)).unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn huge_timeout_means_no_deadline() {
        let runner = GamRunner::new("true");
        let output = runner.run(&[], Duration::from_secs(u64::MAX)).unwrap();
        assert!(output.success());
    }

    #[cfg(unix)]
    #[test]
    fn kills_child_at_deadline() {
        let runner = GamRunner::new("sleep");
        let err = runner
            .run(&["5".to_string()], Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout(_)));
    }
}
