//! The dispatch engine: admission loop, result collection, retry queue
//!
//! One coordinating loop owns the task source and decides when a new
//! task may start; admitted tasks run as parallel workers bounded by the
//! admission policy's permits. Workers report completions over a channel
//! that doubles as the engine's wake-up signal while it waits out memory
//! pressure or exhausted permits.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::DispatcherConfig;
use crate::dispatcher::admission::{
    AdmissionPolicy, MemoryAdaptiveAdmission, SemaphoreAdmission,
};
use crate::dispatcher::queue::TaskSource;
use crate::dispatcher::worker::{self, SessionPool, WorkerDone};
use crate::error::DispatchError;
use crate::fetcher::{destination_key, Fetcher};
use crate::limiter::DomainLimiter;
use crate::memory::MemoryMonitor;
use crate::models::{CrawlTask, TaskOutcome, TaskResult, TaskState};
use crate::progress::ProgressMonitor;

/// Completions between progress log lines
const PROGRESS_LOG_EVERY: u64 = 10;

/// Handle for cancelling a dispatch run from outside the engine
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Stop admitting new tasks immediately
    ///
    /// In-flight tasks get the configured grace period to finish and are
    /// aborted afterwards.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Lazy, finite, non-restartable sequence of task results
///
/// Yields results in completion order while the run is still executing.
pub struct TaskResultStream {
    rx: mpsc::UnboundedReceiver<TaskResult>,
}

impl TaskResultStream {
    /// Next completed result, or `None` once the run has finished
    pub async fn next(&mut self) -> Option<TaskResult> {
        self.rx.recv().await
    }
}

impl futures::Stream for TaskResultStream {
    type Item = TaskResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TaskResult>> {
        self.rx.poll_recv(cx)
    }
}

/// Dispatch engine over a fetch capability
///
/// Holds one progress monitor and one rate limiter for its lifetime;
/// construct a fresh instance per run to start counters from zero.
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatcherConfig,
    fetcher: Arc<dyn Fetcher>,
    limiter: Arc<DomainLimiter>,
    progress: Arc<ProgressMonitor>,
    policy: Arc<dyn AdmissionPolicy>,
    sessions: Arc<SessionPool>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl Dispatcher {
    /// Create an engine with the memory-adaptive admission policy backed
    /// by real system memory readings
    ///
    /// Must be called within a tokio runtime; the memory sampler runs as
    /// a background task on the engine's interval.
    pub fn new(config: DispatcherConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, DispatchError> {
        let monitor = MemoryMonitor::system(config.check_interval());
        Self::with_memory_monitor(config, fetcher, monitor)
    }

    /// Create a memory-adaptive engine over an injected monitor
    ///
    /// Lets tests and grouped runs share or simulate the memory feed.
    pub fn with_memory_monitor(
        config: DispatcherConfig,
        fetcher: Arc<dyn Fetcher>,
        monitor: MemoryMonitor,
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(DispatchError::InvalidConfig)?;
        let policy = Arc::new(MemoryAdaptiveAdmission::new(
            config.max_concurrency,
            monitor,
            config.memory_threshold,
        ));
        Ok(Self::assemble(config, fetcher, policy))
    }

    /// Create an engine with the plain semaphore policy (no memory
    /// awareness)
    pub fn semaphore_only(
        config: DispatcherConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, DispatchError> {
        config.validate().map_err(DispatchError::InvalidConfig)?;
        let policy = Arc::new(SemaphoreAdmission::new(config.max_concurrency));
        Ok(Self::assemble(config, fetcher, policy))
    }

    fn assemble(
        config: DispatcherConfig,
        fetcher: Arc<dyn Fetcher>,
        policy: Arc<dyn AdmissionPolicy>,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            limiter: Arc::new(DomainLimiter::new(&config)),
            progress: Arc::new(ProgressMonitor::new()),
            sessions: SessionPool::new(config.sessions()),
            fetcher,
            policy,
            cancel_tx: Arc::new(cancel_tx),
            config,
        }
    }

    /// Replace the rate limiter with a shared one
    ///
    /// Grouped runs pass a common limiter so a destination appearing in
    /// several groups is still paced as one destination.
    pub fn shared_limiter(mut self, limiter: Arc<DomainLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Live progress counters for this engine
    pub fn progress(&self) -> Arc<ProgressMonitor> {
        Arc::clone(&self.progress)
    }

    /// The engine's rate limiter
    pub fn limiter(&self) -> Arc<DomainLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Handle for run-level cancellation
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: Arc::clone(&self.cancel_tx),
        }
    }

    /// Run all targets to a terminal state and return their results
    ///
    /// The returned collection has one entry per submitted target,
    /// ordered to correspond to the input sequence.
    pub async fn run(&self, targets: Vec<String>) -> Vec<TaskResult> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.run_inner(targets, tx).await;

        let mut results = Vec::new();
        while let Ok(result) = rx.try_recv() {
            results.push(result);
        }
        results.sort_by_key(|result| result.index);
        results
    }

    /// Run all targets, yielding results lazily in completion order
    pub fn run_streaming(&self, targets: Vec<String>) -> TaskResultStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_inner(targets, tx).await;
        });
        TaskResultStream { rx }
    }

    /// Run independent dispatch instances per group concurrently
    ///
    /// Groups share one rate limiter and one memory monitor; concurrency
    /// limits apply per group. Destination independence holds regardless
    /// of how targets are grouped.
    pub async fn run_many(
        groups: HashMap<String, Vec<String>>,
        config: &DispatcherConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<HashMap<String, Vec<TaskResult>>, DispatchError> {
        config
            .validate()
            .map_err(DispatchError::InvalidConfig)?;

        let limiter = Arc::new(DomainLimiter::new(config));
        let monitor = MemoryMonitor::system(config.check_interval());

        let mut runs = Vec::with_capacity(groups.len());
        for (group, targets) in groups {
            let engine =
                Self::with_memory_monitor(config.clone(), Arc::clone(&fetcher), monitor.clone())?
                    .shared_limiter(Arc::clone(&limiter));
            runs.push(async move {
                let results = engine.run(targets).await;
                (group, results)
            });
        }

        Ok(futures::future::join_all(runs).await.into_iter().collect())
    }

    /// The dispatch loop
    async fn run_inner(&self, targets: Vec<String>, results: mpsc::UnboundedSender<TaskResult>) {
        let mut source = TaskSource::new();
        for (index, target) in targets.into_iter().enumerate() {
            let destination = destination_key(&target);
            self.progress.task_enqueued(index, &target);
            source.push_new(CrawlTask::new(index, target, destination));
        }

        let total = source.len();
        tracing::info!(
            total,
            max_concurrency = self.config.max_concurrency,
            "Dispatch run starting"
        );

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<WorkerDone>();
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut workers: Vec<JoinHandle<()>> = Vec::new();
        let mut in_flight: usize = 0;
        let mut completed: u64 = 0;

        loop {
            // Collect finished work without blocking.
            while let Ok(done) = done_rx.try_recv() {
                in_flight -= 1;
                completed += self.collect(done, &mut source, &results).await;
                self.log_progress(completed);
            }

            if *cancel_rx.borrow() {
                break;
            }
            if source.is_empty() && in_flight == 0 {
                break;
            }

            // Admit from the front of the source while the policy yields
            // slots.
            let mut admitted = false;
            while !source.is_empty() {
                let Some(permit) = self.policy.try_admit() else {
                    break;
                };
                let mut task = source.pop().expect("source checked non-empty");
                task.state = TaskState::Running;
                self.progress.task_started(task.id);

                let fetcher = Arc::clone(&self.fetcher);
                let limiter = Arc::clone(&self.limiter);
                let sessions = Arc::clone(&self.sessions);
                let task_timeout = self.config.task_timeout();
                let done_tx = done_tx.clone();
                workers.push(tokio::spawn(async move {
                    let done =
                        worker::execute(task, fetcher, limiter, sessions, task_timeout).await;
                    let _ = done_tx.send(done);
                    drop(permit);
                }));
                in_flight += 1;
                admitted = true;
            }
            if admitted {
                continue;
            }

            workers.retain(|handle| !handle.is_finished());

            // Nothing admissible right now: wait for a completion (memory
            // likely freed, and a permit certainly was), the sampling
            // interval, or cancellation.
            tokio::select! {
                maybe = done_rx.recv() => {
                    if let Some(done) = maybe {
                        in_flight -= 1;
                        completed += self.collect(done, &mut source, &results).await;
                        self.log_progress(completed);
                    }
                }
                _ = tokio::time::sleep(self.config.check_interval()) => {
                    if !source.is_empty() && self.policy.memory_blocked() {
                        tracing::warn!(
                            queued = source.len(),
                            in_flight,
                            "Admission paused: memory usage above threshold"
                        );
                    }
                }
                _ = cancel_rx.changed() => {}
            }
        }

        if *cancel_rx.borrow() && in_flight > 0 {
            self.drain_with_grace(&mut done_rx, &mut source, &results, &mut workers, in_flight)
                .await;
        }

        let snapshot = self.progress.snapshot();
        tracing::info!(
            total,
            succeeded = snapshot.succeeded,
            failed = snapshot.failed,
            retries = snapshot.retries_performed,
            elapsed_secs = snapshot.elapsed.as_secs(),
            "Dispatch run complete"
        );
    }

    /// Let in-flight tasks finish within the grace period, then abort
    async fn drain_with_grace(
        &self,
        done_rx: &mut mpsc::UnboundedReceiver<WorkerDone>,
        source: &mut TaskSource,
        results: &mpsc::UnboundedSender<TaskResult>,
        workers: &mut Vec<JoinHandle<()>>,
        mut in_flight: usize,
    ) {
        let deadline = Instant::now() + self.config.shutdown_grace();
        tracing::info!(in_flight, "Cancelled; draining in-flight tasks");

        while in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, done_rx.recv()).await {
                Ok(Some(done)) => {
                    in_flight -= 1;
                    self.collect(done, source, results).await;
                }
                _ => break,
            }
        }

        if in_flight > 0 {
            tracing::warn!(in_flight, "Grace period expired, aborting in-flight tasks");
            for handle in workers.iter() {
                handle.abort();
            }
        }
    }

    /// Classify one completion; returns 1 when a terminal result was
    /// emitted, 0 when the task was re-enqueued
    async fn collect(
        &self,
        done: WorkerDone,
        source: &mut TaskSource,
        results: &mpsc::UnboundedSender<TaskResult>,
    ) -> u64 {
        let mut task = done.task;

        match done.outcome {
            Ok(payload) => {
                task.state = TaskState::Succeeded;
                self.limiter.record_success(&task.destination).await;
                self.progress.task_succeeded(task.id, task.attempts_made());
                let _ = results.send(TaskResult {
                    index: task.id,
                    target: task.target,
                    destination: task.destination,
                    attempts: task.attempt + 1,
                    outcome: TaskOutcome::Succeeded(payload),
                    completed_at: Utc::now(),
                });
                1
            }
            Err(kind) => {
                self.limiter.record_failure(&task.destination, kind).await;

                if task.attempt < self.config.max_retries {
                    task.attempt += 1;
                    task.state = TaskState::Retrying;
                    let delay = self.limiter.current_delay(&task.destination).await;
                    task.next_allowed_time = Some(Instant::now() + delay);
                    self.progress.task_retrying(task.id, task.attempt);
                    tracing::debug!(
                        target = %task.target,
                        kind = %kind,
                        attempt = task.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Task re-enqueued for retry"
                    );
                    source.push_retry(task);
                    0
                } else {
                    task.state = TaskState::FailedTerminal;
                    self.progress.task_failed(task.id, task.attempts_made());
                    tracing::warn!(
                        target = %task.target,
                        kind = %kind,
                        attempts = task.attempts_made(),
                        "Task failed terminally"
                    );
                    let _ = results.send(TaskResult {
                        index: task.id,
                        target: task.target,
                        destination: task.destination,
                        attempts: task.attempt + 1,
                        outcome: TaskOutcome::Failed(kind),
                        completed_at: Utc::now(),
                    });
                    1
                }
            }
        }
    }

    fn log_progress(&self, completed: u64) {
        if completed > 0 && completed % PROGRESS_LOG_EVERY == 0 {
            let snapshot = self.progress.snapshot();
            tracing::info!(
                succeeded = snapshot.succeeded,
                failed = snapshot.failed,
                running = snapshot.running,
                queued = snapshot.queued,
                retrying = snapshot.retrying,
                rate = format!("{:.2}", snapshot.rate()),
                "Progress"
            );
        }
    }
}
