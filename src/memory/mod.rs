//! Periodic memory sampling for admission control
//!
//! A background task refreshes the system memory reading on the
//! configured interval and publishes the used fraction. Consumers only
//! ever read the most recent sample. If a sample cannot be obtained the
//! monitor reports full usage, which pauses admission rather than
//! silently lifting the constraint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};
use sysinfo::System;

/// Usage reported when sampling fails
const CONSERVATIVE_USAGE: f64 = 1.0;

struct Inner {
    /// Last sampled used-memory fraction, stored as f64 bits
    usage_bits: AtomicU64,

    /// When the last sample was taken
    sampled_at: RwLock<Option<Instant>>,

    /// Background sampler, aborted when the last handle drops
    sampler: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(guard) = self.sampler.read() {
            if let Some(handle) = guard.as_ref() {
                handle.abort();
            }
        }
    }
}

/// Shared handle onto the most recent memory sample
#[derive(Clone)]
pub struct MemoryMonitor {
    inner: Arc<Inner>,
}

impl MemoryMonitor {
    /// Start a monitor backed by real system readings
    ///
    /// Takes one synchronous sample up front so the first admission check
    /// never sees an uninitialized value, then samples on `interval`.
    pub fn system(interval: Duration) -> Self {
        let monitor = Self::with_usage(sample_system());

        let weak: Weak<Inner> = Arc::downgrade(&monitor.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let usage = sample_system();
                inner.usage_bits.store(usage.to_bits(), Ordering::Relaxed);
                if let Ok(mut at) = inner.sampled_at.write() {
                    *at = Some(Instant::now());
                }
                tracing::trace!(usage = format!("{usage:.3}"), "Memory sampled");
            }
        });

        if let Ok(mut sampler) = monitor.inner.sampler.write() {
            *sampler = Some(handle);
        }

        monitor
    }

    /// Create a monitor fed manually, for tests and simulations
    pub fn simulated(initial: f64) -> (Self, SimulatedMemory) {
        let monitor = Self::with_usage(initial);
        let feed = SimulatedMemory {
            inner: Arc::clone(&monitor.inner),
        };
        (monitor, feed)
    }

    fn with_usage(usage: f64) -> Self {
        Self {
            inner: Arc::new(Inner {
                usage_bits: AtomicU64::new(usage.to_bits()),
                sampled_at: RwLock::new(Some(Instant::now())),
                sampler: RwLock::new(None),
            }),
        }
    }

    /// Most recent used-memory fraction (0-1)
    pub fn usage(&self) -> f64 {
        f64::from_bits(self.inner.usage_bits.load(Ordering::Relaxed))
    }

    /// Whether the most recent sample is at or above `threshold`
    pub fn is_over(&self, threshold: f64) -> bool {
        self.usage() >= threshold
    }

    /// Age of the most recent sample
    pub fn sample_age(&self) -> Option<Duration> {
        self.inner
            .sampled_at
            .read()
            .ok()
            .and_then(|at| at.map(|t| t.elapsed()))
    }
}

/// Test-side control over a simulated monitor's readings
pub struct SimulatedMemory {
    inner: Arc<Inner>,
}

impl SimulatedMemory {
    /// Publish a new used-memory fraction
    pub fn set(&self, usage: f64) {
        self.inner.usage_bits.store(usage.to_bits(), Ordering::Relaxed);
        if let Ok(mut at) = self.inner.sampled_at.write() {
            *at = Some(Instant::now());
        }
    }
}

/// Take one system memory reading as a used fraction
fn sample_system() -> f64 {
    let mut sys = System::new();
    sys.refresh_memory();

    let total = sys.total_memory();
    if total == 0 {
        tracing::warn!("Memory sample unavailable, assuming full usage");
        return CONSERVATIVE_USAGE;
    }

    sys.used_memory() as f64 / total as f64
}
