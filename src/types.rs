// =============================================================================
// Shared types used across the Meridian data nexus
// =============================================================================
//
// Everything that crosses a component boundary lives here: normalized quotes
// with their provenance tag, candles, order books, the symbol routing table
// entry, arena trade events, and the uniform result envelope every broker
// adapter returns.
//
// The `source` tag on a Quote is set exactly once, by the normalizer that
// produced it, and is never rewritten downstream. The arena guard relies on
// that.
// =============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current wall-clock time in unix milliseconds.
pub fn current_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Quote provenance
// =============================================================================

/// Which upstream produced a quote. Attached at normalization, carried
/// through every cache and fan-out hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSource {
    Yahoo,
    Binance,
    Alpaca,
    Eodhd,
    Simulated,
}

impl QuoteSource {
    /// True for every source backed by a real external feed.
    pub fn is_real(self) -> bool {
        self != Self::Simulated
    }
}

impl std::fmt::Display for QuoteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yahoo => write!(f, "yahoo"),
            Self::Binance => write!(f, "binance"),
            Self::Alpaca => write!(f, "alpaca"),
            Self::Eodhd => write!(f, "eodhd"),
            Self::Simulated => write!(f, "simulated"),
        }
    }
}

impl std::error::Error for QuoteSource {}

// =============================================================================
// Quote
// =============================================================================

/// A normalized top-of-book quote.
///
/// Invariants enforced by normalizers (see [`Quote::is_coherent`]):
/// bid <= ask; bid, ask and last strictly positive; timestamp monotonic per
/// (symbol, source) within a 1 s tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub bid_size: f64,
    pub ask: f64,
    pub ask_size: f64,
    pub last: f64,
    pub last_size: f64,
    pub volume: f64,
    pub change: f64,
    pub change_percent: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub previous_close: f64,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub source: QuoteSource,
}

impl Quote {
    /// Check the price invariants. Normalizers call this before emitting;
    /// a failed check downgrades the fetch to a parse error.
    pub fn is_coherent(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.last > 0.0 && self.bid <= self.ask
    }

    /// Synthesize bid/ask around a last price at the given half-spread in
    /// basis points. Used by feeds that lack NBBO (Yahoo free tier, EODHD
    /// real-time REST).
    pub fn synth_spread(last: f64, half_spread_bps: f64) -> (f64, f64) {
        let half = last * half_spread_bps / 10_000.0;
        (last - half, last + half)
    }
}

// =============================================================================
// Candle
// =============================================================================

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    /// Unix seconds of the bar open.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// OHLC sanity: all prices positive, low <= min(open, close),
    /// high >= max(open, close), volume non-negative.
    pub fn is_valid(&self) -> bool {
        self.open > 0.0
            && self.high > 0.0
            && self.low > 0.0
            && self.close > 0.0
            && self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
            && self.volume >= 0.0
    }

    /// Aggregate a run of lower-timeframe candles (oldest-first) into one
    /// higher-timeframe candle: open from the first, close from the last,
    /// high/low as extremes, volume summed.
    pub fn aggregate(candles: &[Candle]) -> Option<Candle> {
        let first = candles.first()?;
        let last = candles.last()?;

        let mut high = f64::MIN;
        let mut low = f64::MAX;
        let mut volume = 0.0;
        for c in candles {
            high = high.max(c.high);
            low = low.min(c.low);
            volume += c.volume;
        }

        Some(Candle {
            time: first.time,
            open: first.open,
            high,
            low,
            close: last.close,
            volume,
        })
    }
}

// =============================================================================
// Order book
// =============================================================================

/// One price level of an order book side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orders: Option<u32>,
}

/// A depth snapshot. Bids are descending by price, asks ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub spread: f64,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    /// True when the book is well-formed: best bid strictly below best ask.
    pub fn is_uncrossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b < a,
            _ => false,
        }
    }
}

// =============================================================================
// Symbol routing
// =============================================================================

/// Asset class of a tracked symbol. Drives source selection and the session
/// clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Stock,
    Crypto,
    Forex,
    Commodity,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stock => write!(f, "stock"),
            Self::Crypto => write!(f, "crypto"),
            Self::Forex => write!(f, "forex"),
            Self::Commodity => write!(f, "commodity"),
        }
    }
}

/// One row of the static routing table: where a symbol's data comes from and
/// in what order fallbacks are consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolBinding {
    pub symbol: String,
    pub asset_type: AssetType,
    pub primary_source: QuoteSource,
    /// Consulted one step at a time on primary failure.
    pub fallback_chain: Vec<QuoteSource>,
    /// No WebSocket coverage upstream; candles and quotes come over REST
    /// only (oil/gas/copper futures on EODHD).
    #[serde(default)]
    pub rest_only: bool,
    /// Eligible for a streaming subscription on one of the WS endpoints.
    #[serde(default)]
    pub ws_eligible: bool,
}

// =============================================================================
// Arena trade events
// =============================================================================

/// Buy or sell, as reported by the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// +1 for buys, -1 for sells. Used by momentum-bias correlation.
    pub fn direction(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Asset-class grouping of the 21 arena bots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BotGroup {
    /// FX bots.
    Alpha,
    /// Equity bots.
    Beta,
    /// Commodity / crypto bots.
    Gamma,
}

impl std::fmt::Display for BotGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alpha => write!(f, "Alpha"),
            Self::Beta => write!(f, "Beta"),
            Self::Gamma => write!(f, "Gamma"),
        }
    }
}

/// A single observed arena trade, after dedup and sequencing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub bot_id: String,
    pub bot_name: String,
    pub group: BotGroup,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub price: f64,
    pub pnl: f64,
    /// Strategy tag supplied by the bot ("rsi_reversal", "momo_break", ...).
    pub reason: String,
    /// Unix milliseconds, as stamped by the arena.
    pub timestamp: i64,
    /// Unix milliseconds at which the orchestrator accepted the event.
    pub observed_at: i64,
    /// Monotonic per orchestrator instance, assigned after dedup.
    pub sequence_num: u64,
    /// observed_at - timestamp.
    pub latency_ms: i64,
}

/// Discrete market-condition classification per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    Volatile,
    Quiet,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingUp => write!(f, "trending_up"),
            Self::TrendingDown => write!(f, "trending_down"),
            Self::Ranging => write!(f, "ranging"),
            Self::Volatile => write!(f, "volatile"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

// =============================================================================
// Adapter result envelope
// =============================================================================

/// Typed failure taxonomy for everything feed-related. The kind decides the
/// control flow: network/timeout get one in-adapter retry, everything else
/// falls straight through to the fallback chain; auth is permanent.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedError {
    /// Local token bucket refused the request. Never retried.
    #[error("rate limit exhausted for {source}")]
    RateLimit { source: QuoteSource },

    /// Upstream answered with a non-2xx status.
    #[error("upstream returned {status}: {message}")]
    Network { status: u16, message: String },

    /// The request deadline elapsed.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Payload did not match the expected shape. Never retried.
    #[error("malformed upstream payload: {detail}")]
    Parse { detail: String },

    /// 401/403 or WS close code 4003. Permanent for the adapter.
    #[error("authentication rejected: {detail}")]
    Auth { detail: String },

    /// The adapter is switched off (live data disabled, or credentials
    /// absent for a key-gated upstream).
    #[error("adapter disabled: {reason}")]
    Disabled { reason: String },
}

impl FeedError {
    /// Short machine-readable kind label, mirrored in status payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimit { .. } => "rate_limit",
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Parse { .. } => "parse",
            Self::Auth { .. } => "auth",
            Self::Disabled { .. } => "disabled",
        }
    }

    /// Whether the adapter may retry once with backoff before giving up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self::Parse {
            detail: detail.into(),
        }
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self::Disabled {
            reason: reason.into(),
        }
    }
}

/// Uniform result envelope returned by every adapter operation. The source
/// tag and latency are present on failures too, so fallback decisions and
/// observability never need to special-case.
#[derive(Debug, Clone)]
pub struct FetchOutcome<T> {
    pub data: Result<T, FeedError>,
    pub source: QuoteSource,
    /// Wall time the operation took. Cache hits report 0.
    pub latency_ms: u64,
}

impl<T> FetchOutcome<T> {
    pub fn ok(source: QuoteSource, latency_ms: u64, data: T) -> Self {
        Self {
            data: Ok(data),
            source,
            latency_ms,
        }
    }

    pub fn err(source: QuoteSource, latency_ms: u64, error: FeedError) -> Self {
        Self {
            data: Err(error),
            source,
            latency_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.data.is_ok()
    }

    /// The error, if any, for logging without consuming the envelope.
    pub fn error(&self) -> Option<&FeedError> {
        self.data.as_ref().err()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: f64, ask: f64, last: f64) -> Quote {
        Quote {
            symbol: "NVDA".into(),
            bid,
            bid_size: 100.0,
            ask,
            ask_size: 100.0,
            last,
            last_size: 10.0,
            volume: 1_000.0,
            change: 0.0,
            change_percent: 0.0,
            high: last,
            low: last,
            open: last,
            previous_close: last,
            timestamp: 1_700_000_000_000,
            source: QuoteSource::Yahoo,
        }
    }

    #[test]
    fn quote_coherence() {
        assert!(quote(99.9, 100.1, 100.0).is_coherent());
        // Crossed book.
        assert!(!quote(100.2, 100.1, 100.0).is_coherent());
        // Non-positive price.
        assert!(!quote(0.0, 100.1, 100.0).is_coherent());
    }

    #[test]
    fn synth_spread_is_symmetric() {
        let (bid, ask) = Quote::synth_spread(100.0, 2.0);
        assert!((bid - 99.98).abs() < 1e-9);
        assert!((ask - 100.02).abs() < 1e-9);
        assert!(bid < ask);
    }

    #[test]
    fn candle_validity() {
        assert!(Candle::new(0, 10.0, 11.0, 9.0, 10.5, 100.0).is_valid());
        // High below close.
        assert!(!Candle::new(0, 10.0, 10.2, 9.0, 10.5, 100.0).is_valid());
        // Low above open.
        assert!(!Candle::new(0, 10.0, 11.0, 10.1, 10.5, 100.0).is_valid());
        // Negative volume.
        assert!(!Candle::new(0, 10.0, 11.0, 9.0, 10.5, -1.0).is_valid());
    }

    #[test]
    fn candle_aggregation() {
        let minutes = vec![
            Candle::new(0, 10.0, 10.5, 9.8, 10.2, 100.0),
            Candle::new(60, 10.2, 10.9, 10.1, 10.8, 150.0),
            Candle::new(120, 10.8, 10.8, 10.3, 10.4, 50.0),
        ];
        let agg = Candle::aggregate(&minutes).unwrap();
        assert_eq!(agg.time, 0);
        assert!((agg.open - 10.0).abs() < 1e-12);
        assert!((agg.close - 10.4).abs() < 1e-12);
        assert!((agg.high - 10.9).abs() < 1e-12);
        assert!((agg.low - 9.8).abs() < 1e-12);
        assert!((agg.volume - 300.0).abs() < 1e-12);
        assert!(agg.is_valid());
    }

    #[test]
    fn candle_aggregation_empty() {
        assert!(Candle::aggregate(&[]).is_none());
    }

    #[test]
    fn order_book_invariant() {
        let book = OrderBook {
            symbol: "BTC".into(),
            bids: vec![BookLevel {
                price: 49_990.0,
                size: 1.0,
                orders: None,
            }],
            asks: vec![BookLevel {
                price: 50_010.0,
                size: 1.0,
                orders: None,
            }],
            spread: 20.0,
            timestamp: 0,
        };
        assert!(book.is_uncrossed());
        assert_eq!(book.best_bid(), Some(49_990.0));
        assert_eq!(book.best_ask(), Some(50_010.0));
    }

    #[test]
    fn feed_error_retryability() {
        assert!(FeedError::Network {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(FeedError::Timeout { timeout_ms: 8000 }.is_retryable());
        assert!(!FeedError::RateLimit {
            source: QuoteSource::Yahoo
        }
        .is_retryable());
        assert!(!FeedError::parse("bad json").is_retryable());
        assert!(!FeedError::Auth {
            detail: "403".into()
        }
        .is_retryable());
    }

    #[test]
    fn source_reality() {
        assert!(QuoteSource::Eodhd.is_real());
        assert!(!QuoteSource::Simulated.is_real());
    }

    #[test]
    fn fetch_outcome_envelope() {
        let ok = FetchOutcome::ok(QuoteSource::Binance, 12, 42);
        assert!(ok.is_success());
        assert_eq!(ok.source, QuoteSource::Binance);

        let err: FetchOutcome<i32> = FetchOutcome::err(
            QuoteSource::Yahoo,
            8000,
            FeedError::Timeout { timeout_ms: 8000 },
        );
        assert!(!err.is_success());
        assert_eq!(err.error().unwrap().kind(), "timeout");
    }
}
