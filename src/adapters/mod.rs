// =============================================================================
// Broker Adapters — uniform interface over heterogeneous upstreams
// =============================================================================
//
// Every upstream (Yahoo, Binance, Alpaca, EODHD REST, and the last-resort
// simulators) implements [`BrokerAdapter`]. Normalization happens entirely
// at this boundary: downstream code never branches on which upstream
// produced a quote, except for the arena guard predicate on the source tag.
//
// Retry policy lives here too: network and timeout failures get exactly one
// retry after a 500 ms backoff step; parse, rate-limit and auth failures
// fall straight through so the provider can consult the fallback chain.
// =============================================================================

pub mod alpaca;
pub mod binance;
pub mod eodhd;
pub mod sim;
pub mod yahoo;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::rate_limit::TokenBucketSnapshot;
use crate::types::{Candle, FeedError, FetchOutcome, OrderBook, Quote, QuoteSource};

/// Single backoff step applied before the one permitted retry.
pub(crate) const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// The uniform adapter surface. All operations return the
/// [`FetchOutcome`] envelope so callers get source and latency on every
/// path, success or not.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// The provenance tag this adapter stamps on everything it emits.
    fn name(&self) -> QuoteSource;

    /// Whether this adapter can plausibly serve `symbol` right now. The
    /// provider filters the fallback chain through this before spending an
    /// attempt: key-gated adapters answer false when unconfigured, EODHD
    /// answers false for symbols it has no code mapping for.
    fn supports(&self, _symbol: &str) -> bool {
        true
    }

    async fn get_quote(&self, symbol: &str) -> FetchOutcome<Quote>;

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> FetchOutcome<Vec<Candle>>;

    /// Level-2 depth. Most upstreams cannot provide it; the default refuses.
    async fn get_order_book(&self, _symbol: &str, _levels: usize) -> FetchOutcome<OrderBook> {
        FetchOutcome::err(
            self.name(),
            0,
            FeedError::parse("order book not available from this upstream"),
        )
    }

    /// Cheap liveness probe, bounded at ~5 s by the implementation.
    async fn check_health(&self) -> bool;

    /// Current token-bucket state, for the status surface. Simulators have
    /// no budget and return `None`.
    fn rate_limit(&self) -> Option<TokenBucketSnapshot> {
        None
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Run `op`, retrying exactly once after [`RETRY_BASE_DELAY`] when the error
/// kind permits it.
pub(crate) async fn with_single_retry<T, F, Fut>(op: F) -> Result<T, FeedError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FeedError>>,
{
    match op().await {
        Ok(v) => Ok(v),
        Err(e) if e.is_retryable() => {
            tokio::time::sleep(RETRY_BASE_DELAY).await;
            op().await
        }
        Err(e) => Err(e),
    }
}

/// Translate a reqwest transport failure into the feed taxonomy.
pub(crate) fn transport_error(e: reqwest::Error, timeout_ms: u64) -> FeedError {
    if e.is_timeout() {
        FeedError::Timeout { timeout_ms }
    } else {
        FeedError::Network {
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            message: e.to_string(),
        }
    }
}

/// Classify a non-2xx response. 401/403 are authentication failures and
/// permanent; everything else is a plain network error.
pub(crate) fn status_error(status: u16, body: &str) -> FeedError {
    if status == 401 || status == 403 {
        FeedError::Auth {
            detail: format!("upstream returned {status}"),
        }
    } else {
        FeedError::Network {
            status,
            message: truncate(body, 200),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

/// Extract an f64 that upstreams ship either as a JSON number or a numeric
/// string ("37000.00").
pub(crate) fn json_f64(val: &Value, field: &str) -> Result<f64, FeedError> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| FeedError::parse(format!("field {field} is not numeric: {s}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| FeedError::parse(format!("field {field} overflows f64"))),
        _ => Err(FeedError::parse(format!("missing numeric field {field}"))),
    }
}

/// Like [`json_f64`] but tolerating absence.
pub(crate) fn json_f64_or(val: &Value, field: &str, default: f64) -> f64 {
    json_f64(val, field).unwrap_or(default)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_fires_once_for_network_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), FeedError> = with_single_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FeedError::Network {
                    status: 503,
                    message: "unavailable".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parse_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), FeedError> = with_single_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FeedError::parse("bad shape")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_single_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FeedError::Timeout { timeout_ms: 8000 })
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn json_f64_accepts_both_shapes() {
        let v: Value = serde_json::json!({"a": "12.5", "b": 3.25, "c": true});
        assert_eq!(json_f64(&v["a"], "a").unwrap(), 12.5);
        assert_eq!(json_f64(&v["b"], "b").unwrap(), 3.25);
        assert!(json_f64(&v["c"], "c").is_err());
        assert!(json_f64(&v["missing"], "missing").is_err());
    }

    #[test]
    fn auth_statuses_map_to_auth_kind() {
        assert_eq!(status_error(403, "").kind(), "auth");
        assert_eq!(status_error(401, "").kind(), "auth");
        assert_eq!(status_error(503, "oops").kind(), "network");
    }
}
