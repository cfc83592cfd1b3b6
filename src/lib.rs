//! baedal - Adaptive Crawl Dispatcher
//!
//! A single-process, in-memory dispatch engine for large, bursty sets of
//! independent fetch tasks. Admission is bounded by a concurrency limit
//! and, optionally, by live memory pressure; requests are spaced per
//! destination with adaptive backoff; failures retry up to a bounded
//! budget; progress is aggregated live across all workers.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and validation
//! - [`dispatcher`] - Admission policies, the dispatch loop, worker pool
//! - [`limiter`] - Per-destination rate limiting with adaptive backoff
//! - [`memory`] - Periodic memory sampling for admission control
//! - [`progress`] - Live progress counters and views
//! - [`fetcher`] - The fetch capability interface and HTTP default
//! - [`models`] - Core data structures and types
//! - [`error`] - Failure taxonomy and structural errors
//!
//! # Example
//!
//! ```no_run
//! use baedal::config::Config;
//! use baedal::dispatcher::Dispatcher;
//! use baedal::fetcher::HttpFetcher;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let fetcher = Arc::new(HttpFetcher::new(&config.fetcher)?);
//!     let engine = Dispatcher::new(config.dispatcher, fetcher)?;
//!
//!     let targets = vec!["https://example.com/".to_string()];
//!     let results = engine.run(targets).await;
//!     println!("{} tasks completed", results.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod limiter;
pub mod memory;
pub mod models;
pub mod progress;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, DispatcherConfig, FetcherConfig};
    pub use crate::dispatcher::{CancelHandle, Dispatcher, TaskResultStream};
    pub use crate::error::{DispatchError, FailureKind, FetchError};
    pub use crate::fetcher::{destination_key, Fetcher, HttpFetcher};
    pub use crate::limiter::DomainLimiter;
    pub use crate::memory::MemoryMonitor;
    pub use crate::models::{CrawlTask, FetchPayload, TaskOutcome, TaskResult, TaskState};
    pub use crate::progress::{ProgressMonitor, ProgressSnapshot, ProgressView};
}

// Direct re-exports for convenience
pub use dispatcher::Dispatcher;
pub use models::{TaskOutcome, TaskResult, TaskState};
