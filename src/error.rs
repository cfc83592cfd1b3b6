//! Error types for the baedal dispatcher
//!
//! Failures that a fetch attempt can produce are classified into a small
//! taxonomy ([`FailureKind`]) that drives the retry policy and the rate
//! limiter feedback. Structural problems (bad configuration) use a
//! separate error type and abort the run before any task starts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failed fetch attempt
///
/// Every kind is retryable up to the configured retry budget; a task that
/// exhausts its budget surfaces the last kind in its terminal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Connection failure, DNS error, or other transport problem
    NetworkError,
    /// Explicit "too many requests" response from the destination
    RateLimited,
    /// Destination answered with a server-side error status
    ServerError,
    /// The attempt exceeded the per-task execution bound
    Timeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NetworkError => write!(f, "network error"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::ServerError => write!(f, "server error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Errors produced by a fetch implementation
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP transport error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit response (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Server error with status code
    #[error("Server error: {0}")]
    ServerError(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Map this error into the retry taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Http(e) if e.is_timeout() => FailureKind::Timeout,
            Self::Http(_) => FailureKind::NetworkError,
            Self::RateLimited => FailureKind::RateLimited,
            Self::ServerError(_) => FailureKind::ServerError,
            Self::Timeout => FailureKind::Timeout,
            Self::InvalidUrl(_) => FailureKind::NetworkError,
        }
    }
}

/// Structural errors that fail a dispatch run as a whole
///
/// Per-task failures never appear here; they are reported as terminal
/// task results instead.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kinds() {
        assert_eq!(FetchError::RateLimited.kind(), FailureKind::RateLimited);
        assert_eq!(FetchError::ServerError(503).kind(), FailureKind::ServerError);
        assert_eq!(FetchError::Timeout.kind(), FailureKind::Timeout);
        assert_eq!(
            FetchError::InvalidUrl("not a url".into()).kind(),
            FailureKind::NetworkError
        );
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::RateLimited.to_string(), "rate limited");
        assert_eq!(FailureKind::Timeout.to_string(), "timeout");
    }
}
