// =============================================================================
// Fixed-Window Token Bucket — one instance per upstream
// =============================================================================
//
// Windows reset on wall-clock boundaries rather than sliding. Upstream rate
// budgets are published per calendar minute, so aligning our windows to the
// same boundaries keeps local accounting in step with theirs.
//
// `consume_token` is non-blocking: callers that get `false` fall through to
// the next adapter in the fallback chain instead of queueing.
// =============================================================================

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::current_millis;

/// Budget presets matching what we allow ourselves against each upstream.
/// EODHD is held well below its published 1000/min.
pub mod budgets {
    pub const YAHOO_PER_MIN: u32 = 100;
    pub const BINANCE_PER_MIN: u32 = 1200;
    pub const ALPACA_PER_MIN: u32 = 150;
    pub const EODHD_PER_MIN: u32 = 50;
}

#[derive(Debug)]
struct Window {
    /// Wall-clock-aligned start of the current window (unix ms).
    start_ms: i64,
    used: u32,
}

/// Fixed-window request counter.
pub struct TokenBucket {
    max_requests: u32,
    window_ms: i64,
    window: Mutex<Window>,
}

/// Serializable view of the bucket for status payloads.
#[derive(Debug, Clone, Serialize)]
pub struct TokenBucketSnapshot {
    pub max_requests: u32,
    pub window_ms: i64,
    pub used: u32,
    pub remaining: u32,
}

impl TokenBucket {
    pub fn new(max_requests: u32, window_ms: i64) -> Self {
        Self {
            max_requests,
            window_ms,
            window: Mutex::new(Window {
                start_ms: 0,
                used: 0,
            }),
        }
    }

    /// A bucket granting `max_requests` per calendar minute.
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, 60_000)
    }

    /// Try to take one token. Returns `false` when the window budget is
    /// spent; the count never goes negative.
    pub fn consume_token(&self) -> bool {
        self.consume_at(current_millis())
    }

    /// Remaining tokens in the current window.
    pub fn remaining_tokens(&self) -> u32 {
        self.remaining_at(current_millis())
    }

    pub fn snapshot(&self) -> TokenBucketSnapshot {
        let now = current_millis();
        let mut w = self.window.lock();
        self.roll_window(&mut w, now);
        TokenBucketSnapshot {
            max_requests: self.max_requests,
            window_ms: self.window_ms,
            used: w.used,
            remaining: self.max_requests - w.used,
        }
    }

    // -------------------------------------------------------------------------
    // Clock-injected internals (exercised directly by tests)
    // -------------------------------------------------------------------------

    fn roll_window(&self, w: &mut Window, now_ms: i64) {
        let aligned = now_ms - now_ms.rem_euclid(self.window_ms);
        if aligned != w.start_ms {
            if w.used > 0 {
                debug!(
                    used = w.used,
                    max = self.max_requests,
                    "rate-limit window rolled over"
                );
            }
            w.start_ms = aligned;
            w.used = 0;
        }
    }

    pub(crate) fn consume_at(&self, now_ms: i64) -> bool {
        let mut w = self.window.lock();
        self.roll_window(&mut w, now_ms);

        if w.used >= self.max_requests {
            warn!(
                max = self.max_requests,
                window_ms = self.window_ms,
                "token bucket depleted — request refused"
            );
            return false;
        }
        w.used += 1;
        true
    }

    pub(crate) fn remaining_at(&self, now_ms: i64) -> u32 {
        let mut w = self.window.lock();
        self.roll_window(&mut w, now_ms);
        self.max_requests - w.used
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let w = self.window.lock();
        f.debug_struct("TokenBucket")
            .field("max_requests", &self.max_requests)
            .field("window_ms", &self.window_ms)
            .field("used", &w.used)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_until_depleted() {
        let bucket = TokenBucket::new(3, 60_000);
        let t = 120_000; // exactly on a window boundary

        assert!(bucket.consume_at(t));
        assert!(bucket.consume_at(t + 1));
        assert!(bucket.consume_at(t + 2));
        // Fourth request in the same window must be refused.
        assert!(!bucket.consume_at(t + 3));
        assert_eq!(bucket.remaining_at(t + 4), 0);
    }

    #[test]
    fn remaining_never_negative() {
        let bucket = TokenBucket::new(2, 60_000);
        let t = 0;
        for _ in 0..10 {
            bucket.consume_at(t);
        }
        assert_eq!(bucket.remaining_at(t), 0);
    }

    #[test]
    fn window_resets_on_wall_clock_boundary() {
        let bucket = TokenBucket::new(1, 60_000);

        assert!(bucket.consume_at(59_999));
        assert!(!bucket.consume_at(59_999));
        // One millisecond later the calendar minute rolls over.
        assert!(bucket.consume_at(60_000));
    }

    #[test]
    fn window_is_aligned_not_sliding() {
        let bucket = TokenBucket::new(1, 60_000);

        // Consume late in the minute; a sliding window would still block
        // 2s later, an aligned one resets at the boundary.
        assert!(bucket.consume_at(59_000));
        assert!(!bucket.consume_at(59_500));
        assert!(bucket.consume_at(61_000));
    }

    #[test]
    fn remaining_reports_full_budget_in_fresh_window() {
        let bucket = TokenBucket::per_minute(100);
        assert_eq!(bucket.remaining_at(0), 100);
        bucket.consume_at(0);
        assert_eq!(bucket.remaining_at(0), 99);
        assert_eq!(bucket.remaining_at(60_000), 100);
    }

    #[test]
    fn snapshot_shape() {
        let bucket = TokenBucket::per_minute(50);
        let snap = bucket.snapshot();
        assert_eq!(snap.max_requests, 50);
        assert_eq!(snap.used + snap.remaining, 50);
    }
}
