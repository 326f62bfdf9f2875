//! Build status stream.
//!
//! [`StatusReporter`] wraps the bounded channel a caller consumes. Phase
//! changes and terminal states are always attempted; progress updates in
//! between are throttled to one per interval and dropped when the channel
//! is full. Progress never goes backwards.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Lifecycle of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Starting,
    Preparing,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildState::Completed | BuildState::Failed | BuildState::Cancelled
        )
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Starting => "starting",
            BuildState::Preparing => "preparing",
            BuildState::Executing => "executing",
            BuildState::Completed => "completed",
            BuildState::Failed => "failed",
            BuildState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One status update delivered to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStatus {
    pub state: BuildState,
    pub message: String,
    /// 0.0 to 100.0.
    pub progress_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

impl BuildStatus {
    pub fn new(state: BuildState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            progress_percent: 0.0,
            error: None,
            eta_seconds: None,
        }
    }

    /// JSON form for hosts that forward status across a process boundary.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Creates the bounded channel a build reports into.
pub fn status_channel(capacity: usize) -> (mpsc::Sender<BuildStatus>, mpsc::Receiver<BuildStatus>) {
    mpsc::channel(capacity.max(1))
}

struct ReporterState {
    current: BuildStatus,
    last_sent: Option<Instant>,
    dropped: u64,
}

/// Throttled, monotonic status sender.
///
/// Clones share the same state, so the background build and the task
/// awaiting it report into one stream.
#[derive(Clone)]
pub struct StatusReporter {
    tx: mpsc::Sender<BuildStatus>,
    interval: Duration,
    state: Arc<Mutex<ReporterState>>,
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("interval", &self.interval)
            .field("state", &self.state.lock().current.state)
            .finish()
    }
}

impl StatusReporter {
    pub fn new(tx: mpsc::Sender<BuildStatus>, interval: Duration) -> Self {
        Self {
            tx,
            interval,
            state: Arc::new(Mutex::new(ReporterState {
                current: BuildStatus::new(BuildState::Starting, "Starting"),
                last_sent: None,
                dropped: 0,
            })),
        }
    }

    /// Moves to a new non-terminal phase and sends it without throttling.
    pub fn phase(&self, state: BuildState, message: impl Into<String>) {
        let status = {
            let mut guard = self.state.lock();
            if guard.current.state.is_terminal() {
                return;
            }
            guard.current.state = state;
            guard.current.message = message.into();
            guard.current.eta_seconds = None;
            guard.last_sent = Some(Instant::now());
            guard.current.clone()
        };
        self.offer(status);
    }

    /// Records progress and sends it if the throttle interval has passed.
    ///
    /// Percentages lower than the last one are raised to it.
    pub fn progress(&self, message: impl Into<String>, percent: f64, eta_seconds: Option<u64>) {
        let status = {
            let mut guard = self.state.lock();
            if guard.current.state.is_terminal() {
                return;
            }
            let percent = percent.clamp(0.0, 100.0);
            guard.current.progress_percent = guard.current.progress_percent.max(percent);
            guard.current.message = message.into();
            guard.current.eta_seconds = eta_seconds;

            let now = Instant::now();
            let due = guard
                .last_sent
                .map_or(true, |sent| now.duration_since(sent) >= self.interval);
            if !due {
                return;
            }
            guard.last_sent = Some(now);
            guard.current.clone()
        };
        self.offer(status);
    }

    /// Sends the terminal status, waiting for channel capacity.
    ///
    /// Only the first terminal status is delivered.
    pub async fn finish(&self, state: BuildState, message: impl Into<String>, error: Option<String>) {
        let Some(status) = self.terminal(state, message.into(), error) else {
            return;
        };
        // A closed channel means nobody is listening any more.
        let _ = self.tx.send(status).await;
    }

    fn terminal(&self, state: BuildState, message: String, error: Option<String>) -> Option<BuildStatus> {
        let mut guard = self.state.lock();
        if guard.current.state.is_terminal() {
            return None;
        }
        guard.current.state = state;
        guard.current.message = message;
        guard.current.error = error;
        guard.current.eta_seconds = None;
        if state == BuildState::Completed {
            guard.current.progress_percent = 100.0;
        }
        if guard.dropped > 0 {
            debug!(dropped = guard.dropped, "Intermediate status updates were not delivered");
        }
        Some(guard.current.clone())
    }

    fn offer(&self, status: BuildStatus) {
        if let Err(e) = self.tx.try_send(status) {
            if matches!(e, mpsc::error::TrySendError::Full(_)) {
                self.state.lock().dropped += 1;
            }
            trace!("Status update not delivered");
        }
    }
}
