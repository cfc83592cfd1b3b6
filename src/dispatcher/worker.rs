//! Worker execution path and the session pool
//!
//! Each admitted task borrows one [`WorkerSession`] for its lifetime.
//! Sessions are handed out through a guard that returns them to the pool
//! on drop, so every exit path (success, failure, timeout, panic unwind)
//! releases the session.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::FailureKind;
use crate::fetcher::Fetcher;
use crate::limiter::DomainLimiter;
use crate::models::{CrawlTask, FetchPayload};

/// An exclusively-owned execution context bound to one in-flight task
#[derive(Debug)]
pub struct WorkerSession {
    /// Stable identifier within the pool
    pub id: usize,

    /// Tasks this session has executed
    pub tasks_served: u64,
}

/// Fixed-size pool of worker sessions
pub struct SessionPool {
    tx: mpsc::UnboundedSender<WorkerSession>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<WorkerSession>>,
}

impl SessionPool {
    /// Create a pool holding `size` idle sessions
    pub fn new(size: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        for id in 0..size {
            let _ = tx.send(WorkerSession { id, tasks_served: 0 });
        }
        Arc::new(Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Take a session, waiting until one is free
    pub async fn acquire(&self) -> SessionGuard {
        let session = {
            let mut rx = self.rx.lock().await;
            // The pool holds its own sender, so the channel never closes
            // while the pool is alive.
            rx.recv().await.expect("session pool channel open")
        };
        SessionGuard {
            session: Some(session),
            tx: self.tx.clone(),
        }
    }
}

/// Scoped handle returning its session to the pool on drop
pub struct SessionGuard {
    session: Option<WorkerSession>,
    tx: mpsc::UnboundedSender<WorkerSession>,
}

impl SessionGuard {
    pub fn session_mut(&mut self) -> &mut WorkerSession {
        self.session.as_mut().expect("session present until drop")
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = self.tx.send(session);
        }
    }
}

/// Completion report a worker sends back to the engine loop
#[derive(Debug)]
pub struct WorkerDone {
    pub task: CrawlTask,
    pub outcome: Result<FetchPayload, FailureKind>,
}

/// Run one admitted task to completion
///
/// Waits out the destination's rate-limit spacing, then performs the
/// fetch under the per-task timeout. The session guard releases on every
/// exit path.
pub(crate) async fn execute(
    task: CrawlTask,
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<DomainLimiter>,
    sessions: Arc<SessionPool>,
    task_timeout: Duration,
) -> WorkerDone {
    let mut guard = sessions.acquire().await;

    limiter.acquire(&task.destination).await;

    let outcome = match tokio::time::timeout(task_timeout, fetcher.fetch(&task.target)).await {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(err)) => {
            tracing::debug!(target = %task.target, error = %err, "Fetch attempt failed");
            Err(err.kind())
        }
        Err(_) => {
            tracing::debug!(target = %task.target, "Fetch attempt timed out");
            Err(FailureKind::Timeout)
        }
    };

    guard.session_mut().tasks_served += 1;

    WorkerDone { task, outcome }
}
