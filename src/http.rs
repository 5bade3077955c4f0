//! HTTP transport with exponential backoff retry logic.
//!
//! Both the article fetch and the inference endpoint go through
//! [`send_with_backoff`]. It is the only place in the crate that retries.
//!
//! # Retry Strategy
//!
//! - Retries on HTTP 429, 500, 502, 503, 504 and on connect/timeout errors
//! - Exponential backoff starting at `base_delay`, capped at `max_delay`
//! - Random jitter added to prevent thundering herd
//! - After the last attempt the final response is handed back unchanged, so
//!   callers report the real status

use rand::{Rng, rng};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Bounded retry configuration for transient HTTP failures.
///
/// The delay before retry `n` (1-based) is:
/// ```text
/// delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..=max_jitter)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap to prevent excessive waiting.
    pub max_delay: Duration,
    /// Upper bound of the random jitter.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before the given retry (1-based), without jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }

    fn delay_with_jitter(&self, attempt: usize) -> Duration {
        let max_jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter_ms: u64 = rng().random_range(0..=max_jitter_ms);
        self.backoff(attempt) + Duration::from_millis(jitter_ms)
    }
}

/// Statuses worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

/// Build the shared client used for every request.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).user_agent(user_agent).build()
}

/// Send the request produced by `build`, retrying transient failures.
///
/// `build` is called once per attempt since a sent request cannot be reused.
///
/// # Arguments
///
/// * `policy` - Retry budget and backoff shape
/// * `build` - Produces a fresh request for every attempt
///
/// # Returns
///
/// The first non-retryable response, or the last response once retries are
/// exhausted. Only non-retryable transport errors and a final connect/timeout
/// error come back as `Err`.
///
/// # Example
///
/// ```ignore
/// let resp = send_with_backoff(&RetryPolicy::default(), || client.get(url.clone())).await?;
/// ```
#[instrument(level = "debug", skip_all)]
pub async fn send_with_backoff<F>(policy: &RetryPolicy, build: F) -> Result<Response, reqwest::Error>
where
    F: Fn() -> RequestBuilder,
{
    let total_t0 = Instant::now();
    let mut attempt = 0usize;

    loop {
        let attempt_t0 = Instant::now();
        let result = build().send().await;
        let attempt_dt = attempt_t0.elapsed();

        let failure = match &result {
            Ok(resp) if is_retryable_status(resp.status()) => format!("HTTP {}", resp.status()),
            Ok(resp) => {
                debug!(
                    status = resp.status().as_u16(),
                    attempt,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    "Request completed"
                );
                return result;
            }
            Err(e) if is_retryable_error(e) => e.to_string(),
            Err(_) => return result,
        };

        attempt += 1;
        if attempt > policy.max_retries {
            error!(
                attempt,
                max = policy.max_retries,
                elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                error = %failure,
                "Request exhausted retries"
            );
            return result;
        }

        let delay = policy.delay_with_jitter(attempt);
        warn!(
            attempt,
            max = policy.max_retries,
            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
            ?delay,
            error = %failure,
            "Request attempt failed; backing off"
        );
        sleep(delay).await;
    }
}
