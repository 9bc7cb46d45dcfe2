// =============================================================================
// Rate-Limit Tracker + Retry Backoff
// =============================================================================
//
// Binance caps request weight at 1200 per minute per IP. The klines endpoint
// costs 2 weight per call at limit <= 1000, so a long history fetched in
// pages can approach the cap.
//
// The tracker reads `X-MBX-USED-WEIGHT-1M` after every response and keeps
// atomic counters that any task may read lock-free. Throttled responses
// (HTTP 429 / 418) are counted separately.
//
// Backoff: delay(attempt) = min(base · 2^attempt, max), attempt from 0.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Soft warning threshold on used request weight per minute.
const WEIGHT_WARN_THRESHOLD: u32 = 1000;

const WEIGHT_HEADER: &str = "X-MBX-USED-WEIGHT-1M";

/// Thread-safe rate-limit tracker backed by atomic counters.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    throttled: AtomicU32,
    warn_threshold: u32,
}

/// Immutable snapshot of the current rate-limit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub throttled_responses: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::with_threshold(WEIGHT_WARN_THRESHOLD)
    }

    pub fn with_threshold(warn_threshold: u32) -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            throttled: AtomicU32::new(0),
            warn_threshold,
        }
    }

    /// Update the weight counter from Binance response headers.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let weight = headers
            .get(WEIGHT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u32>().ok());
        if let Some(w) = weight {
            self.record_weight(w);
        }
    }

    pub fn record_weight(&self, weight: u32) {
        let prev = self.used_weight_1m.swap(weight, Ordering::Relaxed);
        if weight >= self.warn_threshold && prev < self.warn_threshold {
            warn!(
                used_weight = weight,
                threshold = self.warn_threshold,
                "rate-limit weight crossed warning threshold"
            );
        }
        debug!(used_weight_1m = weight, "rate-limit weight updated from header");
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
            throttled_responses: self.throttled.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("used_weight_1m", &self.used_weight_1m.load(Ordering::Relaxed))
            .field("throttled", &self.throttled.load(Ordering::Relaxed))
            .finish()
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(32), 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn backoff_doubles_then_caps() {
        let b = Backoff::default();
        let secs: Vec<u64> = (0..8).map(|a| b.delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 32, 32]);
    }

    #[test]
    fn backoff_survives_huge_attempts() {
        let b = Backoff::new(Duration::from_millis(500), Duration::from_secs(10), 3);
        assert_eq!(b.delay(64), Duration::from_secs(10));
    }

    #[test]
    fn weight_header_is_parsed() {
        let tracker = RateLimitTracker::with_threshold(100);
        let mut headers = HeaderMap::new();
        headers.insert("x-mbx-used-weight-1m", HeaderValue::from_static("42"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.snapshot().used_weight_1m, 42);

        headers.insert("x-mbx-used-weight-1m", HeaderValue::from_static("garbage"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.snapshot().used_weight_1m, 42);
    }

    #[test]
    fn throttled_responses_are_counted() {
        let tracker = RateLimitTracker::new();
        tracker.record_throttled();
        tracker.record_throttled();
        assert_eq!(tracker.snapshot().throttled_responses, 2);
    }
}
