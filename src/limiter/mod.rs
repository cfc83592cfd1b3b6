//! Per-destination rate limiting with adaptive backoff
//!
//! Every destination (normally a host) gets its own delay state. A call
//! to [`DomainLimiter::acquire`] suspends until the destination's minimum
//! inter-request delay has elapsed since its previous request, then
//! stamps the new request time. Outcome feedback widens or resets the
//! delay: rate-limit responses grow it by the full backoff factor,
//! server errors by a moderate factor, transient network failures by a
//! small fixed increment, and a success snaps it back to the base delay.
//!
//! Destinations never block each other: the map lock is held only long
//! enough to fetch the per-destination handle, and the wait happens under
//! that destination's own lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::DispatcherConfig;
use crate::error::FailureKind;

/// Delay growth applied for network errors and timeouts
const TRANSIENT_INCREMENT: Duration = Duration::from_millis(250);

/// Backoff state for one destination
#[derive(Debug, Clone)]
pub struct DomainState {
    /// Minimum spacing before the next request to this destination
    pub delay: Duration,

    /// Consecutive rate-limit/server-error responses
    pub consecutive_failures: u32,

    /// Timestamp of the last request issued to this destination
    pub last_request: Option<Instant>,
}

impl DomainState {
    fn new(base_delay: Duration) -> Self {
        Self {
            delay: base_delay,
            consecutive_failures: 0,
            last_request: None,
        }
    }

    /// Time remaining until the next request may be issued, if any
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request?;
        let ready_at = last + self.delay;
        if ready_at > now {
            Some(ready_at - now)
        } else {
            None
        }
    }

    /// Stamp a request at `now`
    pub fn record_request(&mut self, now: Instant) {
        self.last_request = Some(now);
    }
}

/// Rate limiter keyed by destination
pub struct DomainLimiter {
    states: Mutex<HashMap<String, Arc<Mutex<DomainState>>>>,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    moderate_factor: f64,
}

impl DomainLimiter {
    /// Create a limiter shaped by the dispatcher configuration
    pub fn new(config: &DispatcherConfig) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            backoff_factor: config.backoff_factor,
            // Halfway between no growth and the rate-limited factor
            moderate_factor: (1.0 + config.backoff_factor) / 2.0,
        }
    }

    /// Get or create the handle for a destination
    ///
    /// The map lock is released before the caller awaits anything on the
    /// returned handle.
    async fn handle(&self, destination: &str) -> Arc<Mutex<DomainState>> {
        let mut states = self.states.lock().await;
        states
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainState::new(self.base_delay))))
            .clone()
    }

    /// Wait until the destination accepts another request, then stamp it
    ///
    /// The destination lock is held across the wait, so two attempts to
    /// the same destination are never spaced closer than the current
    /// delay. Other destinations proceed in parallel.
    pub async fn acquire(&self, destination: &str) {
        let handle = self.handle(destination).await;
        let mut state = handle.lock().await;

        if let Some(wait) = state.time_until_ready(Instant::now()) {
            tracing::trace!(destination, wait_ms = wait.as_millis() as u64, "Rate limit wait");
            tokio::time::sleep(wait).await;
        }

        state.record_request(Instant::now());
    }

    /// Feed a successful outcome back: delay and failure count reset
    pub async fn record_success(&self, destination: &str) {
        let handle = self.handle(destination).await;
        let mut state = handle.lock().await;
        state.delay = self.base_delay;
        state.consecutive_failures = 0;
    }

    /// Feed a failed outcome back, widening the delay per its kind
    ///
    /// The first failure in a streak keeps the current delay; growth
    /// kicks in from the second consecutive failure, so the delay before
    /// retry n is `base * factor^(n-1)`.
    pub async fn record_failure(&self, destination: &str, kind: FailureKind) {
        let handle = self.handle(destination).await;
        let mut state = handle.lock().await;

        match kind {
            FailureKind::RateLimited => {
                if state.consecutive_failures > 0 {
                    state.delay = state.delay.mul_f64(self.backoff_factor).min(self.max_delay);
                }
                state.consecutive_failures += 1;
            }
            FailureKind::ServerError => {
                if state.consecutive_failures > 0 {
                    state.delay = state.delay.mul_f64(self.moderate_factor).min(self.max_delay);
                }
                state.consecutive_failures += 1;
            }
            // Transient transport failures widen slightly but do not count
            // toward the destination's failure streak.
            FailureKind::NetworkError | FailureKind::Timeout => {
                state.delay = (state.delay + TRANSIENT_INCREMENT).min(self.max_delay);
            }
        }

        tracing::debug!(
            destination,
            kind = %kind,
            delay_ms = state.delay.as_millis() as u64,
            failures = state.consecutive_failures,
            "Backoff updated"
        );
    }

    /// Current delay for a destination; the base delay if unseen
    pub async fn current_delay(&self, destination: &str) -> Duration {
        let handle = self.handle(destination).await;
        let state = handle.lock().await;
        state.delay
    }

    /// Consecutive failure count for a destination
    pub async fn failure_count(&self, destination: &str) -> u32 {
        let handle = self.handle(destination).await;
        let state = handle.lock().await;
        state.consecutive_failures
    }
}
