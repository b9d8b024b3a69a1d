//! Fetch error taxonomy + capped exponential backoff for upstream calls.

use std::future::Future;
use std::time::{Duration, SystemTime};

use thiserror::Error;

/// Errors surfaced by upstream fetches. Only `is_transient` failures are
/// retried; everything else aborts the source for this cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } => true,
            FetchError::Network(_) => true,
            FetchError::Status(code) => (500..600).contains(code),
            FetchError::Other(_) => false,
        }
    }

    /// Upstream-provided wait, when it sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// `Retry-After` comes as either delta-seconds or an HTTP-date.
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(raw).ok()?;
    when.duration_since(SystemTime::now()).ok()
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// base << attempt, capped. Saturates instead of overflowing on silly
    /// attempt counts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let millis = self.base_delay.as_millis() as u64;
        let shifted = millis.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(shifted).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, a terminal error appears, or attempts run out.
/// A `Retry-After` hint from the upstream overrides the computed backoff.
pub async fn with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                let wait = e
                    .retry_after()
                    .unwrap_or_else(|| policy.delay_for(attempt))
                    .min(policy.max_delay);
                tracing::warn!(
                    target = what,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "transient upstream failure, backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
