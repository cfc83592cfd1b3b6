//! Admission policies deciding when a new task may start
//!
//! Both policies reserve a concurrency slot atomically via a semaphore
//! permit; the permit travels with the worker and releases the slot when
//! the task ends, so concurrent completions can never over-admit past
//! the limit. The memory-adaptive variant additionally refuses admission
//! while the most recent memory sample sits at or above the threshold.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::memory::MemoryMonitor;

/// Capability the dispatch loop is polymorphic over
pub trait AdmissionPolicy: Send + Sync {
    /// Reserve a slot for one task if admission is possible right now
    fn try_admit(&self) -> Option<OwnedSemaphorePermit>;

    /// Whether refusals are currently caused by memory pressure
    fn memory_blocked(&self) -> bool {
        false
    }
}

/// Fixed counting policy: admit while permits remain
pub struct SemaphoreAdmission {
    permits: Arc<Semaphore>,
}

impl SemaphoreAdmission {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl AdmissionPolicy for SemaphoreAdmission {
    fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }
}

/// Memory-aware policy: permits plus headroom below the threshold
pub struct MemoryAdaptiveAdmission {
    permits: Arc<Semaphore>,
    monitor: MemoryMonitor,
    threshold: f64,
}

impl MemoryAdaptiveAdmission {
    pub fn new(max_concurrency: usize, monitor: MemoryMonitor, threshold: f64) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            monitor,
            threshold,
        }
    }
}

impl AdmissionPolicy for MemoryAdaptiveAdmission {
    fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        if self.monitor.is_over(self.threshold) {
            return None;
        }
        self.permits.clone().try_acquire_owned().ok()
    }

    fn memory_blocked(&self) -> bool {
        self.monitor.is_over(self.threshold)
    }
}
