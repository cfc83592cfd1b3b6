//! Live progress aggregation across running tasks
//!
//! Counters are atomic and updated on every state transition; the update
//! path never blocks admission or execution. Snapshots are derived
//! read-only views. The per-task detail table sits behind a short-lived
//! mutex that only the reporting side contends on.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::TaskState;

/// Presentation mode for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressView {
    /// Per-task current state and timing
    Detailed,
    /// Counts per state and overall rate
    Aggregated,
}

/// Per-task progress entry for the detailed view
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub id: usize,
    pub target: String,
    pub state: TaskState,
    pub attempts: u32,
    pub enqueued_at: Instant,
    pub started_at: Option<Instant>,
    pub completed_at: Option<Instant>,
}

impl TaskProgress {
    /// Wall time from first admission to completion, where known
    pub fn run_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            (Some(start), None) => Some(start.elapsed()),
            _ => None,
        }
    }
}

/// Aggregated read-only view of the live counters
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub queued: u64,
    pub running: u64,
    pub retrying: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retries_performed: u64,
    pub peak_running: u64,
    pub elapsed: Duration,
    pub captured_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Tasks that reached a terminal state
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// All tasks the monitor has seen
    pub fn total(&self) -> u64 {
        self.queued + self.running + self.retrying + self.succeeded + self.failed
    }

    /// Terminal results per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.completed() as f64 / secs
        }
    }
}

/// Observer of every task state transition
///
/// Shared by the engine and all workers; it observes, it does not gate.
pub struct ProgressMonitor {
    queued: AtomicU64,
    running: AtomicU64,
    retrying: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retries_performed: AtomicU64,
    peak_running: AtomicU64,
    started_at: Instant,
    details: Mutex<HashMap<usize, TaskProgress>>,
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self {
            queued: AtomicU64::new(0),
            running: AtomicU64::new(0),
            retrying: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retries_performed: AtomicU64::new(0),
            peak_running: AtomicU64::new(0),
            started_at: Instant::now(),
            details: Mutex::new(HashMap::new()),
        }
    }

    /// A task entered the source queue
    pub fn task_enqueued(&self, id: usize, target: &str) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut details) = self.details.lock() {
            details.insert(
                id,
                TaskProgress {
                    id,
                    target: target.to_string(),
                    state: TaskState::Queued,
                    attempts: 0,
                    enqueued_at: Instant::now(),
                    started_at: None,
                    completed_at: None,
                },
            );
        }
    }

    /// A task was admitted and started running
    pub fn task_started(&self, id: usize) {
        // The task leaves either the fresh queue or the retry backlog.
        if let Ok(mut details) = self.details.lock() {
            if let Some(entry) = details.get_mut(&id) {
                match entry.state {
                    TaskState::Retrying => {
                        self.retrying.fetch_sub(1, Ordering::Relaxed);
                    }
                    _ => {
                        self.queued.fetch_sub(1, Ordering::Relaxed);
                    }
                }
                entry.state = TaskState::Running;
                entry.started_at.get_or_insert_with(Instant::now);
            }
        }
        let now_running = self.running.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_running.fetch_max(now_running, Ordering::Relaxed);
    }

    /// A task failed and was re-enqueued for another attempt
    pub fn task_retrying(&self, id: usize, attempts: u32) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        self.retrying.fetch_add(1, Ordering::Relaxed);
        self.retries_performed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut details) = self.details.lock() {
            if let Some(entry) = details.get_mut(&id) {
                entry.state = TaskState::Retrying;
                entry.attempts = attempts;
            }
        }
    }

    /// A task finished successfully
    pub fn task_succeeded(&self, id: usize, attempts: u32) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.finish(id, TaskState::Succeeded, attempts);
    }

    /// A task exhausted its retry budget
    pub fn task_failed(&self, id: usize, attempts: u32) {
        self.running.fetch_sub(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.finish(id, TaskState::FailedTerminal, attempts);
    }

    fn finish(&self, id: usize, state: TaskState, attempts: u32) {
        if let Ok(mut details) = self.details.lock() {
            if let Some(entry) = details.get_mut(&id) {
                entry.state = state;
                entry.attempts = attempts;
                entry.completed_at = Some(Instant::now());
            }
        }
    }

    /// Aggregated view of the live counters
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            retrying: self.retrying.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries_performed: self.retries_performed.load(Ordering::Relaxed),
            peak_running: self.peak_running.load(Ordering::Relaxed),
            elapsed: self.started_at.elapsed(),
            captured_at: Utc::now(),
        }
    }

    /// Detailed view: one entry per known task, ordered by id
    pub fn detailed(&self) -> Vec<TaskProgress> {
        let mut entries: Vec<TaskProgress> = self
            .details
            .lock()
            .map(|details| details.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|entry| entry.id);
        entries
    }

    /// Render the requested view as display text
    pub fn report(&self, view: ProgressView) -> String {
        match view {
            ProgressView::Aggregated => {
                let snapshot = self.snapshot();
                format!(
                    "queued={} running={} retrying={} succeeded={} failed={} rate={:.2}/s",
                    snapshot.queued,
                    snapshot.running,
                    snapshot.retrying,
                    snapshot.succeeded,
                    snapshot.failed,
                    snapshot.rate()
                )
            }
            ProgressView::Detailed => {
                let mut out = String::new();
                for entry in self.detailed() {
                    let timing = entry
                        .run_time()
                        .map(|d| format!("{}ms", d.as_millis()))
                        .unwrap_or_else(|| "-".to_string());
                    out.push_str(&format!(
                        "#{} {} state={} attempts={} time={}\n",
                        entry.id, entry.target, entry.state, entry.attempts, timing
                    ));
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_follow_transitions() {
        let monitor = ProgressMonitor::new();

        monitor.task_enqueued(0, "https://a.example/1");
        monitor.task_enqueued(1, "https://a.example/2");
        assert_eq!(monitor.snapshot().queued, 2);

        monitor.task_started(0);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.queued, 1);
        assert_eq!(snapshot.running, 1);

        monitor.task_succeeded(0, 1);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.running, 0);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.completed(), 1);
        assert_eq!(snapshot.total(), 2);
    }

    #[test]
    fn test_retry_cycle() {
        let monitor = ProgressMonitor::new();
        monitor.task_enqueued(0, "https://a.example/1");

        monitor.task_started(0);
        monitor.task_retrying(0, 1);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.retrying, 1);
        assert_eq!(snapshot.running, 0);
        assert_eq!(snapshot.retries_performed, 1);

        // Second admission drains the retry backlog, not the fresh queue
        monitor.task_started(0);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.retrying, 0);
        assert_eq!(snapshot.running, 1);
        assert_eq!(snapshot.queued, 0);

        monitor.task_failed(0, 2);
        assert_eq!(monitor.snapshot().failed, 1);
    }

    #[test]
    fn test_peak_running_tracks_high_water_mark() {
        let monitor = ProgressMonitor::new();
        for id in 0..4 {
            monitor.task_enqueued(id, "https://a.example");
        }

        monitor.task_started(0);
        monitor.task_started(1);
        monitor.task_started(2);
        monitor.task_succeeded(0, 1);
        monitor.task_started(3);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.peak_running, 3);
        assert_eq!(snapshot.running, 2);
    }

    #[test]
    fn test_detailed_view_ordering_and_timing() {
        let monitor = ProgressMonitor::new();
        monitor.task_enqueued(1, "https://a.example/2");
        monitor.task_enqueued(0, "https://a.example/1");

        monitor.task_started(0);
        monitor.task_succeeded(0, 1);

        let entries = monitor.detailed();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[0].state, TaskState::Succeeded);
        assert!(entries[0].run_time().is_some());
        assert_eq!(entries[1].state, TaskState::Queued);
        assert!(entries[1].run_time().is_none());
    }

    #[test]
    fn test_report_modes() {
        let monitor = ProgressMonitor::new();
        monitor.task_enqueued(0, "https://a.example/1");

        let aggregated = monitor.report(ProgressView::Aggregated);
        assert!(aggregated.contains("queued=1"));

        let detailed = monitor.report(ProgressView::Detailed);
        assert!(detailed.contains("https://a.example/1"));
        assert!(detailed.contains("state=queued"));
    }
}
