//! HTTP fetching behind a narrow capability interface
//!
//! The dispatcher only ever sees the [`Fetcher`] trait: one attempt in,
//! one classified outcome out. Retry and backoff decisions live in the
//! dispatch engine, not here. [`HttpFetcher`] is the default
//! implementation with User-Agent rotation, gzip, cookies, and an
//! optional global requests-per-second throttle.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use rand::seq::SliceRandom;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT},
    Client,
};
use std::num::NonZeroU32;
use url::Url;

use crate::config::FetcherConfig;
use crate::error::FetchError;
use crate::models::FetchPayload;

/// Pool of realistic User-Agent strings for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Capability consumed by the dispatcher: one fetch attempt per call
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform a single fetch of `target`, classifying any failure
    async fn fetch(&self, target: &str) -> Result<FetchPayload, FetchError>;
}

/// Derive the rate-limiting key for a target
///
/// The lowercased host of the parsed URL; targets that do not parse fall
/// back to the raw string so they still rate-limit consistently among
/// themselves.
pub fn destination_key(target: &str) -> String {
    Url::parse(target)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_lowercase()))
        .unwrap_or_else(|| target.to_string())
}

/// Default reqwest-backed fetcher
pub struct HttpFetcher {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// Optional global cap on requests per second
    throttle: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,

    /// Fixed user agent; rotates through the pool when unset
    user_agent: Option<String>,

    /// Optional base URL override for testing with mock servers
    base_url: Option<String>,
}

impl HttpFetcher {
    /// Create a fetcher from configuration
    pub fn new(config: &FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .build()?;

        let throttle = config.requests_per_second.and_then(NonZeroU32::new).map(|rate| {
            RateLimiter::direct(Quota::per_second(rate))
        });

        Ok(Self {
            client,
            throttle,
            user_agent: config.user_agent.clone(),
            base_url: None,
        })
    }

    /// Create a fetcher that prefixes all targets with a base URL
    ///
    /// Used in tests to point relative targets at a mock server.
    pub fn with_base_url(config: &FetcherConfig, base_url: &str) -> Result<Self, FetchError> {
        let mut fetcher = Self::new(config)?;
        fetcher.base_url = Some(base_url.to_string());
        Ok(fetcher)
    }

    /// Build request headers with a user agent and browser defaults
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        match &self.user_agent {
            Some(agent) => {
                if let Ok(value) = HeaderValue::from_str(agent) {
                    headers.insert(USER_AGENT, value);
                }
            }
            None => {
                headers.insert(USER_AGENT, HeaderValue::from_static(random_user_agent()));
            }
        }

        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate, br"),
        );

        headers
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, target: &str) -> Result<FetchPayload, FetchError> {
        if let Some(throttle) = &self.throttle {
            throttle.until_ready().await;
        }

        let full_url = match &self.base_url {
            Some(base) => format!("{base}{target}"),
            None => target.to_string(),
        };

        tracing::debug!(url = %full_url, "Fetching");

        let response = self
            .client
            .get(&full_url)
            .headers(self.build_headers())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::ServerError(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(FetchPayload {
            body,
            status: status.as_u16(),
        })
    }
}

/// Pick a random user agent from the pool
fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS.choose(&mut rng).unwrap_or(&USER_AGENTS[0])
}
