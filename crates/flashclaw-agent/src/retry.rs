//! Retry wrapper for `AgentRunner::run` (§4.3 "Retry wrapper").
//!
//! Exponential backoff with jitter, retrying only errors that look
//! transient — connection resets, timeouts, and provider-side overload.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 10_000;
const JITTER_FRACTION: f64 = 0.30;

const RETRYABLE_SUBSTRINGS: &[&str] = &[
    "econnreset",
    "etimedout",
    "econnrefused",
    "rate_limit",
    "overloaded",
    "529",
    "503",
    "502",
    "socket hang up",
    "network error",
];

fn is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Runs `attempt` up to `MAX_RETRIES + 1` times, backing off exponentially
/// (capped at `MAX_DELAY_MS`, jittered by up to `JITTER_FRACTION`) between
/// tries. Stops immediately on an error that doesn't look transient.
pub async fn with_retry<F, Fut, T>(mut attempt: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, String>>,
{
    let mut last_err = String::new();
    for try_index in 0..=MAX_RETRIES {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = e;
                if try_index == MAX_RETRIES || !is_retryable(&last_err) {
                    break;
                }
                let delay = backoff_delay(try_index);
                warn!(attempt = try_index + 1, delay_ms = delay.as_millis() as u64, error = %last_err, "retrying agent invocation");
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_err)
}

fn backoff_delay(try_index: u32) -> Duration {
    let raw = BASE_DELAY_MS.saturating_mul(1u64 << try_index).min(MAX_DELAY_MS);
    let jitter_max = (raw as f64 * JITTER_FRACTION) as u64;
    let jitter = if jitter_max > 0 {
        rand::thread_rng().gen_range(0..=jitter_max)
    } else {
        0
    };
    Duration::from_millis(raw + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_substrings_are_case_insensitive() {
        assert!(is_retryable("Error: ECONNRESET by peer"));
        assert!(is_retryable("rate_limit exceeded"));
        assert!(is_retryable("HTTP 529 overloaded"));
        assert!(!is_retryable("invalid api key"));
    }

    #[test]
    fn backoff_delay_never_exceeds_cap_plus_jitter() {
        for i in 0..5 {
            let d = backoff_delay(i);
            assert!(d.as_millis() as u64 <= MAX_DELAY_MS + (MAX_DELAY_MS as f64 * JITTER_FRACTION) as u64);
        }
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable_error() {
        let mut calls = 0;
        let result: Result<(), String> = with_retry(|| {
            calls += 1;
            async { Err("invalid api key".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_then_surfaces_error() {
        let mut calls = 0;
        let result: Result<(), String> = with_retry(|| {
            calls += 1;
            async { Err("ETIMEDOUT".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, MAX_RETRIES + 1);
    }
}
