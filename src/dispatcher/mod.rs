//! Task dispatch with bounded concurrency and adaptive admission
//!
//! The engine pulls tasks from a FIFO source, admits them through a
//! pluggable policy (plain semaphore or memory-adaptive), executes them
//! on pooled worker sessions, and feeds failures back through a bounded
//! retry queue.

pub mod admission;
pub mod engine;
pub mod queue;
pub mod worker;

pub use admission::{AdmissionPolicy, MemoryAdaptiveAdmission, SemaphoreAdmission};
pub use engine::{CancelHandle, Dispatcher, TaskResultStream};
pub use queue::TaskSource;
pub use worker::{SessionPool, WorkerSession};
