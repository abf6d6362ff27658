//! Scrape configuration constants
//!
//! These are operational values tuned against the live Eventor instances, not
//! derived from anything. All of them can be overridden through
//! [`crate::fetcher::FetchConfig`] or CLI flags.

use rand::Rng;
use std::time::Duration;

/// Maximum number of attempts for one request on hard failures (timeouts,
/// connection errors, 5xx).
pub const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Pacing window for normal incremental runs (seconds).
pub const STANDARD_PACING_SECS: (f64, f64) = (1.0, 3.0);

/// Pacing window for history backfills (seconds).
pub const HISTORY_PACING_SECS: (f64, f64) = (5.0, 15.0);

/// A run whose start date lies further back than this uses history pacing.
pub const HISTORY_LOOKBACK_DAYS: i64 = 28;

/// Upper bound for waiting on a browser challenge to resolve.
pub const CHALLENGE_TIMEOUT_SECS: u64 = 30;

/// Default run length when no end date is given (~15 months).
pub const DEFAULT_RANGE_DAYS: i64 = 456;

/// Calculate exponential backoff delay for the given zero-based retry count
pub fn calculate_backoff(retry_count: u32) -> Duration {
    backoff_with(retry_count, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS)
}

/// Exponential backoff with explicit base and cap
pub fn backoff_with(retry_count: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = initial_ms.saturating_mul(2u64.saturating_pow(retry_count));
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Add up to 25% random jitter to a delay
pub fn with_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() / 4) as u64;
    if max_jitter_ms == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
    delay + Duration::from_millis(jitter)
}
