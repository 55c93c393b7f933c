//! Background execution with in-order event delivery.
//!
//! A [`ProgressRelay`] owns one [`OperationHandle`]. [`ProgressRelay::start`]
//! spawns a fresh worker thread that drives a job and pushes every event into
//! a FIFO channel. The interactive side calls [`ProgressRelay::poll`] on its
//! own timer; callbacks only ever run on the polling thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

use crate::events::{BatchSummary, ProgressEvent, Terminal};
use crate::executor::{Action, BulkExecutor, Target};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("An operation is already in progress.")]
    AlreadyRunning,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Per-surface operation state.
#[derive(Debug, Default)]
pub struct OperationHandle {
    running: AtomicBool,
    cancel_requested: AtomicBool,
}

impl OperationHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn try_acquire(&self) -> bool {
        let acquired = self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if acquired {
            self.cancel_requested.store(false, Ordering::SeqCst);
        }
        acquired
    }

    fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Worker-side view of the cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    handle: Arc<OperationHandle>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancel_requested()
    }
}

enum RelayMessage {
    Progress(ProgressEvent),
    Terminal(Terminal),
}

/// Worker-side producer end of the event queue.
pub struct EventSink {
    tx: Sender<RelayMessage>,
}

impl EventSink {
    pub fn emit(&self, event: ProgressEvent) {
        // The relay may have been dropped; the batch still runs to completion.
        let _ = self.tx.send(RelayMessage::Progress(event));
    }
}

struct ActiveRun<'cb> {
    rx: Receiver<RelayMessage>,
    worker: Option<JoinHandle<()>>,
    on_event: Box<dyn FnMut(&ProgressEvent) + 'cb>,
    on_terminal: Box<dyn FnOnce(&Terminal) + 'cb>,
}

pub struct ProgressRelay<'cb> {
    handle: Arc<OperationHandle>,
    poll_interval: Duration,
    active: Option<ActiveRun<'cb>>,
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl<'cb> ProgressRelay<'cb> {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            handle: Arc::new(OperationHandle::default()),
            poll_interval,
            active: None,
        }
    }

    pub fn handle(&self) -> &Arc<OperationHandle> {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Start `job` on a new worker thread.
    ///
    /// Rejected with [`RelayError::AlreadyRunning`] while another job is in
    /// flight; the running job is left untouched.
    pub fn start<J, E, F>(&mut self, job: J, on_event: E, on_terminal: F) -> Result<(), RelayError>
    where
        J: FnOnce(&EventSink, &CancelToken) -> anyhow::Result<BatchSummary> + Send + 'static,
        E: FnMut(&ProgressEvent) + 'cb,
        F: FnOnce(&Terminal) + 'cb,
    {
        if !self.handle.try_acquire() {
            tracing::warn!("An operation is already in progress.");
            return Err(RelayError::AlreadyRunning);
        }

        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken {
            handle: Arc::clone(&self.handle),
        };
        let spawned = std::thread::Builder::new()
            .name("gamrelay-worker".into())
            .spawn(move || {
                let sink = EventSink { tx: tx.clone() };
                let terminal = match panic::catch_unwind(AssertUnwindSafe(|| job(&sink, &cancel))) {
                    Ok(Ok(summary)) if summary.cancelled => Terminal::Cancelled { summary },
                    Ok(Ok(summary)) => Terminal::Done { summary },
                    Ok(Err(e)) => Terminal::Error {
                        message: format!("{:#}", e),
                    },
                    Err(payload) => Terminal::Error {
                        message: panic_message(payload.as_ref()),
                    },
                };
                let _ = tx.send(RelayMessage::Terminal(terminal));
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                self.handle.release();
                return Err(RelayError::Spawn(e));
            }
        };

        self.active = Some(ActiveRun {
            rx,
            worker: Some(worker),
            on_event: Box::new(on_event),
            on_terminal: Box::new(on_terminal),
        });
        Ok(())
    }

    /// Start a bulk batch: `executor` applied to `targets` with `action`.
    pub fn start_bulk<T, A, E, F>(
        &mut self,
        executor: BulkExecutor,
        targets: Vec<T>,
        action: A,
        on_event: E,
        on_terminal: F,
    ) -> Result<(), RelayError>
    where
        T: Target + 'static,
        A: Action<T> + Send + 'static,
        E: FnMut(&ProgressEvent) + 'cb,
        F: FnOnce(&Terminal) + 'cb,
    {
        let job = move |sink: &EventSink, cancel: &CancelToken| -> anyhow::Result<BatchSummary> {
            let run = executor.execute(&targets, action, || cancel.is_cancelled());
            Ok(run.run_to_end(|event| sink.emit(event)))
        };
        self.start(job, on_event, on_terminal)
    }

    /// Ask the running job to stop at the next target boundary.
    pub fn request_cancel(&self) -> bool {
        if self.handle.is_running() {
            self.handle.cancel_requested.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Dispatch everything queued so far. Returns the terminal state once the
    /// job has finished, after which the relay is idle again.
    pub fn poll(&mut self) -> Option<Terminal> {
        let active = self.active.as_mut()?;
        let terminal = loop {
            match active.rx.try_recv() {
                Ok(RelayMessage::Progress(event)) => (active.on_event)(&event),
                Ok(RelayMessage::Terminal(terminal)) => break terminal,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => {
                    break Terminal::Error {
                        message: "worker exited without reporting a result".to_string(),
                    };
                }
            }
        };
        Some(self.finish(terminal))
    }

    /// Poll on the configured interval until the current job ends.
    pub fn wait(&mut self) -> Option<Terminal> {
        while self.active.is_some() {
            if let Some(terminal) = self.poll() {
                return Some(terminal);
            }
            std::thread::sleep(self.poll_interval);
        }
        None
    }

    fn finish(&mut self, terminal: Terminal) -> Terminal {
        if let Some(mut active) = self.active.take() {
            if let Some(worker) = active.worker.take() {
                let _ = worker.join();
            }
            (active.on_terminal)(&terminal);
        }
        self.handle.release();
        terminal
    }
}

impl Default for ProgressRelay<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("worker panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Status, TerminalStatus};
    use crate::executor::{Outcome, action_fn};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    const FAST: Duration = Duration::from_millis(5);

    fn emails(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn relays_events_in_order_then_done() {
        let events = RefCell::new(Vec::new());
        let terminals = RefCell::new(Vec::new());
        let mut relay = ProgressRelay::new(FAST);

        relay
            .start_bulk(
                BulkExecutor::new("Test"),
                emails(&["a@x.com", "b@x.com"]),
                action_fn(|t: &String| Ok(Outcome::success(format!("did {}", t)))),
                |e| events.borrow_mut().push((e.status, e.index)),
                |t| terminals.borrow_mut().push(t.clone()),
            )
            .unwrap();
        assert!(relay.is_running());

        let terminal = relay.wait().unwrap();
        assert!(!relay.is_running());
        assert_eq!(
            *events.borrow(),
            vec![
                (Status::Processing, 1),
                (Status::Success, 1),
                (Status::Processing, 2),
                (Status::Success, 2),
            ]
        );
        assert_eq!(terminals.borrow().len(), 1);
        assert_eq!(terminal.status(), TerminalStatus::Done);
        assert_eq!(terminal.summary().unwrap().success_count, 2);
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let events = RefCell::new(Vec::new());
        let mut relay = ProgressRelay::new(FAST);

        relay
            .start(
                move |sink: &EventSink, _cancel: &CancelToken| {
                    sink.emit(ProgressEvent::new(Status::Processing, "a@x.com", 1, 1, "first"));
                    release_rx.recv().ok();
                    sink.emit(ProgressEvent::new(Status::Success, "a@x.com", 1, 1, "done"));
                    Ok(BatchSummary {
                        success_count: 1,
                        ..Default::default()
                    })
                },
                |e| events.borrow_mut().push(e.message.clone()),
                |_| {},
            )
            .unwrap();

        let rejected = relay.start(
            |_: &EventSink, _: &CancelToken| Ok(BatchSummary::default()),
            |_| panic!("rejected job must not deliver events"),
            |_| panic!("rejected job must not terminate"),
        );
        assert!(matches!(rejected, Err(RelayError::AlreadyRunning)));
        assert!(relay.is_running());

        release_tx.send(()).unwrap();
        let terminal = relay.wait().unwrap();
        assert_eq!(terminal.summary().unwrap().success_count, 1);
        assert_eq!(*events.borrow(), vec!["first".to_string(), "done".to_string()]);

        // Idle again: a new operation may start.
        relay
            .start(|_: &EventSink, _: &CancelToken| Ok(BatchSummary::default()), |_| {}, |_| {})
            .unwrap();
        assert!(relay.wait().is_some());
    }

    #[test]
    fn cancellation_is_observed_between_targets() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let mut relay = ProgressRelay::new(FAST);

        relay
            .start_bulk(
                BulkExecutor::new("Test"),
                emails(&["a@x.com", "b@x.com", "c@x.com"]),
                action_fn(move |_: &String| {
                    started_tx.send(()).ok();
                    gate_rx.recv().ok();
                    Ok(Outcome::success("ok"))
                }),
                |_| {},
                |_| {},
            )
            .unwrap();

        started_rx.recv().unwrap();
        assert!(relay.request_cancel());
        gate_tx.send(()).unwrap();

        let terminal = relay.wait().unwrap();
        assert_eq!(terminal.status(), TerminalStatus::Cancelled);
        let summary = terminal.summary().unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.attempted(), 1);
        assert!(!relay.is_running());
    }

    #[test]
    fn job_error_is_fatal_and_releases_handle() {
        let mut relay = ProgressRelay::new(FAST);
        relay
            .start(
                |_: &EventSink, _: &CancelToken| Err(anyhow::anyhow!("could not load targets")),
                |_| {},
                |_| {},
            )
            .unwrap();
        let terminal = relay.wait().unwrap();
        assert_eq!(
            terminal,
            Terminal::Error {
                message: "could not load targets".into()
            }
        );
        assert!(!relay.is_running());
    }

    #[test]
    fn worker_panic_is_reported_as_fatal() {
        let mut relay = ProgressRelay::new(FAST);
        relay
            .start(
                |_: &EventSink, _: &CancelToken| -> anyhow::Result<BatchSummary> { panic!("worker blew up") },
                |_| {},
                |_| {},
            )
            .unwrap();
        match relay.wait().unwrap() {
            Terminal::Error { message } => assert!(message.contains("worker blew up")),
            other => panic!("unexpected terminal: {:?}", other),
        }
        assert!(!relay.is_running());
    }

    #[test]
    fn cancel_without_operation_is_noop() {
        let relay = ProgressRelay::default();
        assert!(!relay.request_cancel());
        assert!(!relay.handle().is_cancel_requested());
    }
}
