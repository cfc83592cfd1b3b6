// Core data structures for the baedal dispatcher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::FailureKind;

/// Lifecycle state of a crawl task
///
/// A task is in exactly one state at any time. `Succeeded` and
/// `FailedTerminal` are terminal; no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Running,
    Retrying,
    Succeeded,
    FailedTerminal,
}

impl TaskState {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::FailedTerminal => write!(f, "failed"),
        }
    }
}

/// A single fetch task moving through the dispatcher
///
/// `attempt` counts completed attempts and never decreases; it is bounded
/// by the configured retry budget. `next_allowed_time` is the earliest
/// instant a retry may be issued, derived from the destination's current
/// backoff delay when the task is re-enqueued.
#[derive(Debug, Clone)]
pub struct CrawlTask {
    /// Position in the original input sequence, also the task identifier
    pub id: usize,

    /// Target URL to fetch
    pub target: String,

    /// Rate-limiting key, normally the target's host
    pub destination: String,

    /// Completed attempts so far
    pub attempt: u32,

    /// Current lifecycle state
    pub state: TaskState,

    /// Earliest instant a retry may start, if backing off
    pub next_allowed_time: Option<Instant>,

    /// When the task was first enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl CrawlTask {
    /// Create a freshly queued task
    pub fn new(id: usize, target: String, destination: String) -> Self {
        Self {
            id,
            target,
            destination,
            attempt: 0,
            state: TaskState::Queued,
            next_allowed_time: None,
            enqueued_at: Utc::now(),
        }
    }

    /// Total attempts performed, counting the initial one
    pub fn attempts_made(&self) -> u32 {
        self.attempt + 1
    }
}

/// Successful fetch payload handed back by a fetcher
#[derive(Debug, Clone, Default)]
pub struct FetchPayload {
    /// Response body
    pub body: String,

    /// HTTP status of the final response
    pub status: u16,
}

/// Terminal outcome of a task
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The fetch succeeded; payload attached
    Succeeded(FetchPayload),
    /// The retry budget was exhausted; last observed failure attached
    Failed(FailureKind),
}

/// Per-task terminal report returned to the caller
///
/// Exactly one result is produced for every submitted task; `index`
/// matches the task's position in the original input sequence.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// Position in the original input sequence
    pub index: usize,

    /// The submitted target
    pub target: String,

    /// Rate-limiting key the task ran under
    pub destination: String,

    /// Total attempts performed
    pub attempts: u32,

    /// Terminal outcome
    pub outcome: TaskOutcome,

    /// When the task reached its terminal state
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded(_))
    }

    /// The terminal failure kind, if the task failed
    pub fn failure(&self) -> Option<FailureKind> {
        match &self.outcome {
            TaskOutcome::Succeeded(_) => None,
            TaskOutcome::Failed(kind) => Some(*kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_queued() {
        let task = CrawlTask::new(0, "https://example.com/a".into(), "example.com".into());
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.attempt, 0);
        assert_eq!(task.attempts_made(), 1);
        assert!(task.next_allowed_time.is_none());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::FailedTerminal.is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
    }

    #[test]
    fn test_result_accessors() {
        let ok = TaskResult {
            index: 0,
            target: "https://example.com".into(),
            destination: "example.com".into(),
            attempts: 1,
            outcome: TaskOutcome::Succeeded(FetchPayload {
                body: "hi".into(),
                status: 200,
            }),
            completed_at: Utc::now(),
        };
        assert!(ok.is_success());
        assert!(ok.failure().is_none());

        let failed = TaskResult {
            outcome: TaskOutcome::Failed(FailureKind::NetworkError),
            ..ok.clone()
        };
        assert!(!failed.is_success());
        assert_eq!(failed.failure(), Some(FailureKind::NetworkError));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TaskState::FailedTerminal.to_string(), "failed");
        assert_eq!(TaskState::Running.to_string(), "running");
    }
}
