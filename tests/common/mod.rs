//! Common test utilities

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use baedal::error::FetchError;
use baedal::fetcher::Fetcher;
use baedal::models::FetchPayload;

/// One scripted fetch attempt outcome
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum ScriptStep {
    /// Succeed after the fetcher's default delay
    Succeed,
    /// Succeed after a specific delay
    SucceedAfter(Duration),
    /// Fail with an HTTP 429 equivalent
    RateLimited,
    /// Fail with a server-side error
    ServerError,
    /// Fail with a transport-level error
    NetworkError,
}

/// Deterministic fetcher driven by per-target scripts
///
/// Unscripted targets (and targets whose script has run dry) succeed.
/// Every attempt is timestamped so tests can assert request spacing, and
/// concurrent attempts are counted for concurrency assertions.
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    default_delay: Duration,
    attempts: Mutex<Vec<(String, Instant)>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    /// All attempts take at least `delay` to complete
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_delay: delay,
            attempts: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    /// Script the attempt outcomes for one target
    pub fn script(self, target: &str, steps: Vec<ScriptStep>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(target.to_string(), steps.into());
        self
    }

    /// Timestamps of every attempt made against `target`
    pub fn attempts_for(&self, target: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Total attempts across all targets
    #[allow(dead_code)]
    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Highest number of simultaneously in-flight fetch calls observed
    #[allow(dead_code)]
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

/// Tracks in-flight fetches; decrements even when a fetch future is
/// dropped by a timeout.
struct ActiveGuard<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ActiveGuard<'a> {
    fn enter(active: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, target: &str) -> Result<FetchPayload, FetchError> {
        let _guard = ActiveGuard::enter(&self.active, &self.peak_active);

        self.attempts
            .lock()
            .unwrap()
            .push((target.to_string(), Instant::now()));

        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(target)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(ScriptStep::Succeed);

        if !self.default_delay.is_zero() {
            tokio::time::sleep(self.default_delay).await;
        }

        match step {
            ScriptStep::Succeed => Ok(FetchPayload {
                body: format!("content of {target}"),
                status: 200,
            }),
            ScriptStep::SucceedAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(FetchPayload {
                    body: format!("content of {target}"),
                    status: 200,
                })
            }
            ScriptStep::RateLimited => Err(FetchError::RateLimited),
            ScriptStep::ServerError => Err(FetchError::ServerError(503)),
            ScriptStep::NetworkError => Err(FetchError::InvalidUrl(format!(
                "simulated connection failure: {target}"
            ))),
        }
    }
}
