use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Result;

/// The kinds of background work a node runs. Every spawned task is tagged
/// with one so its failures are reported under a stable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// A full election round started on behalf of an incoming challenge.
    ElectionRound,
    /// Waiting out the answer window of a round, then maybe declaring.
    ElectionDeadline,
    /// Periodic leadership reassertion while this node leads.
    Heartbeat,
    /// The proof-of-work loop.
    Mining,
    /// Startup public key announcement.
    Announce,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::ElectionRound => write!(f, "election-round"),
            TaskKind::ElectionDeadline => write!(f, "election-deadline"),
            TaskKind::Heartbeat => write!(f, "heartbeat"),
            TaskKind::Mining => write!(f, "mining"),
            TaskKind::Announce => write!(f, "announce"),
        }
    }
}

/// Spawns typed background tasks that all stop when the shared token is
/// cancelled.
#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TaskSupervisor {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run `future` in the background until it finishes or shutdown begins.
    /// Errors are logged with the task kind and otherwise swallowed.
    pub fn spawn<F>(&self, kind: TaskKind, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let token = self.shutdown.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task = %kind, "Task cancelled by shutdown");
                }
                result = future => {
                    if let Err(e) = result {
                        match kind {
                            TaskKind::Announce => {
                                tracing::debug!(task = %kind, error = %e, "Background task failed");
                            }
                            _ => {
                                tracing::warn!(task = %kind, error = %e, "Background task failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Cancel every task and wait for all of them to return.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
