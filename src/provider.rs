// =============================================================================
// Market Data Provider — front door to all broker access
// =============================================================================
//
// Responsibilities, in the order a request flows through them:
//
//   1. Source selection per symbol from the routing table, honouring the
//      configured stock preference and each adapter's availability.
//   2. TTL caches (quotes 5 s, candles 30 s, books 2 s) that preserve the
//      original source tag. A cache hit reports latency 0.
//   3. One-step fallback: primary fails, the next adapter in the chain gets
//      exactly one shot, then the last error surfaces.
//   4. Subscription polling: subscribed symbols refresh on one shared loop
//      in batches of 10 with a 100 ms inter-batch pause, each success
//      emitting a quote event. Stream-delivered quotes pre-populate the
//      cache and emit through the same event, which makes the poll
//      idempotent.
//   5. Concurrent health probes feeding a per-source liveness map.
//
// Per-symbol quote events are monotone non-decreasing in timestamp; a
// source switchover may repeat a timestamp but never regresses more than
// one second.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::adapters::BrokerAdapter;
use crate::config::{HubConfig, StockSource};
use crate::types::{
    AssetType, Candle, FeedError, FetchOutcome, OrderBook, Quote, QuoteSource, SymbolBinding,
};

/// Batch size of the poll loop.
const POLL_BATCH: usize = 10;
/// Pause between poll batches, protecting upstream budgets.
const POLL_BATCH_PAUSE: Duration = Duration::from_millis(100);
/// Maximum backwards timestamp movement tolerated on source switchover.
const MONOTONIC_TOLERANCE_MS: i64 = 1_000;

// =============================================================================
// TTL cache
// =============================================================================

struct TtlCache<K, V> {
    ttl: Duration,
    map: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    fn new(ttl_ms: u64) -> Self {
        Self {
            ttl: Duration::from_millis(ttl_ms),
            map: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let map = self.map.read();
        let (stored_at, value) = map.get(key)?;
        (stored_at.elapsed() < self.ttl).then(|| value.clone())
    }

    fn insert(&self, key: K, value: V) {
        self.map.write().insert(key, (Instant::now(), value));
    }

    fn clear(&self) {
        self.map.write().clear();
    }
}

// =============================================================================
// Adapter set
// =============================================================================

/// The concrete adapters the provider routes across. Boxed behind the
/// trait so tests can script any of them.
pub struct AdapterSet {
    pub yahoo: Arc<dyn BrokerAdapter>,
    pub binance: Arc<dyn BrokerAdapter>,
    pub alpaca: Arc<dyn BrokerAdapter>,
    pub eodhd: Arc<dyn BrokerAdapter>,
    pub fx_sim: Arc<dyn BrokerAdapter>,
    pub commodity_sim: Arc<dyn BrokerAdapter>,
}

/// Narrow seam the hub uses to manage upstream subscriptions without
/// seeing the rest of the provider.
pub trait QuoteFeed: Send + Sync {
    fn subscribe_symbol(&self, symbol: &str);
    fn unsubscribe_symbol(&self, symbol: &str);
}

// =============================================================================
// Provider
// =============================================================================

/// Per-source liveness, refreshed by [`MarketDataProvider::check_health`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthMap {
    pub yahoo: bool,
    pub binance: bool,
    pub alpaca: bool,
    pub eodhd: bool,
    pub simulated: bool,
}

pub struct MarketDataProvider {
    config: Arc<HubConfig>,
    bindings: Arc<HashMap<String, SymbolBinding>>,
    adapters: AdapterSet,

    quote_cache: TtlCache<String, Quote>,
    candle_cache: TtlCache<(String, String), (QuoteSource, Vec<Candle>)>,
    book_cache: TtlCache<String, (QuoteSource, OrderBook)>,

    subscriptions: RwLock<HashSet<String>>,
    events_tx: broadcast::Sender<Quote>,
    /// Highest emitted timestamp per symbol, for the monotonicity floor.
    last_emitted: RwLock<HashMap<String, i64>>,

    health: RwLock<HealthMap>,
    running: AtomicBool,
    polls_completed: AtomicU64,
}

impl MarketDataProvider {
    pub fn new(
        config: Arc<HubConfig>,
        bindings: Arc<HashMap<String, SymbolBinding>>,
        adapters: AdapterSet,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            quote_cache: TtlCache::new(config.cache_ttl_ms),
            candle_cache: TtlCache::new(config.candle_cache_ttl_ms),
            book_cache: TtlCache::new(config.book_cache_ttl_ms),
            config,
            bindings,
            adapters,
            subscriptions: RwLock::new(HashSet::new()),
            events_tx,
            last_emitted: RwLock::new(HashMap::new()),
            health: RwLock::new(HealthMap::default()),
            running: AtomicBool::new(true),
            polls_completed: AtomicU64::new(0),
        }
    }

    /// New receiver onto the quote event stream.
    pub fn events(&self) -> broadcast::Receiver<Quote> {
        self.events_tx.subscribe()
    }

    pub fn health(&self) -> HealthMap {
        self.health.read().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn polls_completed(&self) -> u64 {
        self.polls_completed.load(Ordering::Relaxed)
    }

    /// Token-bucket state per budgeted upstream, for the status surface.
    pub fn rate_limits(&self) -> Vec<(QuoteSource, crate::rate_limit::TokenBucketSnapshot)> {
        [
            &self.adapters.yahoo,
            &self.adapters.binance,
            &self.adapters.alpaca,
            &self.adapters.eodhd,
        ]
        .into_iter()
        .filter_map(|a| a.rate_limit().map(|s| (a.name(), s)))
        .collect()
    }

    // -------------------------------------------------------------------------
    // Source selection
    // -------------------------------------------------------------------------

    fn adapter_for(&self, source: QuoteSource, asset: AssetType) -> Arc<dyn BrokerAdapter> {
        match source {
            QuoteSource::Yahoo => self.adapters.yahoo.clone(),
            QuoteSource::Binance => self.adapters.binance.clone(),
            QuoteSource::Alpaca => self.adapters.alpaca.clone(),
            QuoteSource::Eodhd => self.adapters.eodhd.clone(),
            QuoteSource::Simulated => match asset {
                AssetType::Commodity => self.adapters.commodity_sim.clone(),
                _ => self.adapters.fx_sim.clone(),
            },
        }
    }

    /// Resolve the attempt order for a symbol: primary first, then the
    /// fallback chain, with unavailable adapters filtered out and the
    /// configured stock preference applied.
    fn selection_for(&self, symbol: &str) -> Vec<Arc<dyn BrokerAdapter>> {
        let binding = self.bindings.get(symbol);

        let (asset, mut sources) = match binding {
            Some(b) => {
                let mut chain = vec![b.primary_source];
                chain.extend(b.fallback_chain.iter().copied());
                (b.asset_type, chain)
            }
            // Unknown symbols are treated as stocks against the preferred
            // equity source.
            None => (
                AssetType::Stock,
                vec![QuoteSource::Eodhd, QuoteSource::Alpaca, QuoteSource::Yahoo],
            ),
        };

        // Stock preference: when the operator prefers Alpaca, it outranks
        // Yahoo wherever both appear.
        if asset == AssetType::Stock
            && self.config.primary_stock_source == StockSource::Alpaca
        {
            if let (Some(a), Some(y)) = (
                sources.iter().position(|s| *s == QuoteSource::Alpaca),
                sources.iter().position(|s| *s == QuoteSource::Yahoo),
            ) {
                if y < a {
                    sources.swap(a, y);
                }
            }
        }

        sources
            .into_iter()
            .map(|s| self.adapter_for(s, asset))
            .filter(|a| a.supports(symbol))
            .collect()
    }

    /// Total adapter attempts per request: the primary plus fallbacks,
    /// bounded by `max_retries`.
    fn attempt_cap(&self) -> usize {
        self.config.max_retries.max(1) as usize
    }

    fn disabled_outcome<T>(&self, symbol: &str) -> FetchOutcome<T> {
        let source = self
            .bindings
            .get(symbol)
            .map(|b| b.primary_source)
            .unwrap_or(QuoteSource::Yahoo);
        FetchOutcome::err(source, 0, FeedError::disabled("live data disabled"))
    }

    // -------------------------------------------------------------------------
    // Quotes
    // -------------------------------------------------------------------------

    pub async fn get_quote(&self, symbol: &str) -> FetchOutcome<Quote> {
        if !self.config.enable_live_data {
            return self.disabled_outcome(symbol);
        }

        // Cache hit: original source, zero latency.
        if let Some(quote) = self.quote_cache.get(&symbol.to_string()) {
            let source = quote.source;
            return FetchOutcome::ok(source, 0, quote);
        }

        let chain = self.selection_for(symbol);
        if chain.is_empty() {
            return FetchOutcome::err(
                QuoteSource::Yahoo,
                0,
                FeedError::parse(format!("no adapter can serve {symbol}")),
            );
        }

        // Primary plus exactly one fallback step (max_retries caps the
        // total attempts; default 2).
        let mut last: Option<FetchOutcome<Quote>> = None;
        for adapter in chain.into_iter().take(self.attempt_cap()) {
            let outcome = adapter.get_quote(symbol).await;
            match &outcome.data {
                Ok(quote) => {
                    self.quote_cache.insert(symbol.to_string(), quote.clone());
                    return outcome;
                }
                Err(e) => {
                    debug!(symbol, source = %outcome.source, kind = e.kind(), "quote attempt failed");
                    last = Some(outcome);
                }
            }
        }
        last.expect("chain was non-empty")
    }

    pub async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> FetchOutcome<Vec<Candle>> {
        if !self.config.enable_live_data {
            return self.disabled_outcome(symbol);
        }

        let key = (symbol.to_string(), timeframe.to_string());
        if let Some((source, candles)) = self.candle_cache.get(&key) {
            return FetchOutcome::ok(source, 0, candles);
        }

        let chain = self.selection_for(symbol);
        let mut last: Option<FetchOutcome<Vec<Candle>>> = None;
        for adapter in chain.into_iter().take(self.attempt_cap()) {
            let outcome = adapter.get_candles(symbol, timeframe, limit).await;
            match &outcome.data {
                Ok(candles) => {
                    self.candle_cache
                        .insert(key, (outcome.source, candles.clone()));
                    return outcome;
                }
                Err(_) => last = Some(outcome),
            }
        }
        last.unwrap_or_else(|| {
            FetchOutcome::err(
                QuoteSource::Yahoo,
                0,
                FeedError::parse(format!("no adapter can serve {symbol}")),
            )
        })
    }

    pub async fn get_order_book(&self, symbol: &str, levels: usize) -> FetchOutcome<OrderBook> {
        if !self.config.enable_live_data {
            return self.disabled_outcome(symbol);
        }

        if let Some((source, book)) = self.book_cache.get(&symbol.to_string()) {
            return FetchOutcome::ok(source, 0, book);
        }

        let chain = self.selection_for(symbol);
        let mut last: Option<FetchOutcome<OrderBook>> = None;
        for adapter in chain.into_iter().take(self.attempt_cap()) {
            let outcome = adapter.get_order_book(symbol, levels).await;
            match &outcome.data {
                Ok(book) => {
                    self.book_cache
                        .insert(symbol.to_string(), (outcome.source, book.clone()));
                    return outcome;
                }
                Err(_) => last = Some(outcome),
            }
        }
        last.unwrap_or_else(|| {
            FetchOutcome::err(
                QuoteSource::Yahoo,
                0,
                FeedError::parse(format!("no adapter can serve {symbol}")),
            )
        })
    }

    // -------------------------------------------------------------------------
    // Events & streaming ingest
    // -------------------------------------------------------------------------

    /// Emit a quote event, holding the per-symbol monotonicity floor.
    fn emit_quote(&self, quote: Quote) {
        {
            let mut last = self.last_emitted.write();
            let floor = last.get(&quote.symbol).copied().unwrap_or(i64::MIN);
            if quote.timestamp < floor.saturating_sub(MONOTONIC_TOLERANCE_MS) {
                debug!(
                    symbol = %quote.symbol,
                    ts = quote.timestamp,
                    floor,
                    "dropping regressive quote"
                );
                return;
            }
            if quote.timestamp > floor {
                last.insert(quote.symbol.clone(), quote.timestamp);
            }
        }
        // Send fails only when nobody listens, which is fine.
        let _ = self.events_tx.send(quote);
    }

    /// Entry point for WebSocket-delivered quotes: pre-populate the cache
    /// (making the next poll idempotent) and emit through the same event.
    pub fn ingest_stream_quote(&self, quote: Quote) {
        self.quote_cache
            .insert(quote.symbol.clone(), quote.clone());
        self.emit_quote(quote);
    }

    // -------------------------------------------------------------------------
    // Subscription polling
    // -------------------------------------------------------------------------

    /// One pass over all subscribed symbols, in batches.
    pub async fn poll_once(&self) {
        let symbols: Vec<String> = self.subscriptions.read().iter().cloned().collect();

        for (i, chunk) in symbols.chunks(POLL_BATCH).enumerate() {
            if i > 0 {
                tokio::time::sleep(POLL_BATCH_PAUSE).await;
            }
            let fetches = chunk.iter().map(|s| self.get_quote(s));
            for outcome in futures_util::future::join_all(fetches).await {
                if let Ok(quote) = outcome.data {
                    self.emit_quote(quote);
                }
            }
        }
        self.polls_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// The shared poll loop. Exits on shutdown.
    pub async fn run_poll_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.polling_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.polling_interval_ms,
            "subscription poll loop started"
        );
        loop {
            interval.tick().await;
            if !self.running.load(Ordering::Relaxed) {
                info!("poll loop stopped");
                return;
            }
            self.poll_once().await;
        }
    }

    // -------------------------------------------------------------------------
    // Health
    // -------------------------------------------------------------------------

    /// Probe every adapter concurrently and refresh the liveness map.
    pub async fn check_health(&self) -> HealthMap {
        let (yahoo, binance, alpaca, eodhd, sim) = tokio::join!(
            self.adapters.yahoo.check_health(),
            self.adapters.binance.check_health(),
            self.adapters.alpaca.check_health(),
            self.adapters.eodhd.check_health(),
            self.adapters.fx_sim.check_health(),
        );

        let map = HealthMap {
            yahoo,
            binance,
            alpaca,
            eodhd,
            simulated: sim,
        };
        *self.health.write() = map.clone();
        map
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Stop the poll loop, flush caches, quiesce. In-flight requests may
    /// complete but their results are discarded with the caches.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.quote_cache.clear();
        self.candle_cache.clear();
        self.book_cache.clear();
        info!("provider quiesced");
    }
}

impl QuoteFeed for MarketDataProvider {
    fn subscribe_symbol(&self, symbol: &str) {
        let inserted = self.subscriptions.write().insert(symbol.to_string());
        if inserted {
            info!(symbol, "symbol joined the poll set");
        }
    }

    fn unsubscribe_symbol(&self, symbol: &str) {
        let removed = self.subscriptions.write().remove(symbol);
        if removed {
            info!(symbol, "symbol left the poll set");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{binding_map, default_bindings};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Scripted adapter: a fixed outcome per call, counting calls.
    struct ScriptedAdapter {
        source: QuoteSource,
        fail_with: Option<FeedError>,
        last_price: f64,
        calls: AtomicU32,
        supports_all: bool,
    }

    impl ScriptedAdapter {
        fn ok(source: QuoteSource, last_price: f64) -> Arc<Self> {
            Arc::new(Self {
                source,
                fail_with: None,
                last_price,
                calls: AtomicU32::new(0),
                supports_all: true,
            })
        }

        fn failing(source: QuoteSource, error: FeedError) -> Arc<Self> {
            Arc::new(Self {
                source,
                fail_with: Some(error),
                last_price: 0.0,
                calls: AtomicU32::new(0),
                supports_all: true,
            })
        }

        fn unsupporting(source: QuoteSource) -> Arc<Self> {
            Arc::new(Self {
                source,
                fail_with: None,
                last_price: 1.0,
                calls: AtomicU32::new(0),
                supports_all: false,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn quote(&self, symbol: &str) -> Quote {
            let (bid, ask) = Quote::synth_spread(self.last_price, 1.0);
            Quote {
                symbol: symbol.to_string(),
                bid,
                bid_size: 1.0,
                ask,
                ask_size: 1.0,
                last: self.last_price,
                last_size: 1.0,
                volume: 0.0,
                change: 0.0,
                change_percent: 0.0,
                high: self.last_price,
                low: self.last_price,
                open: self.last_price,
                previous_close: self.last_price,
                timestamp: 100,
                source: self.source,
            }
        }
    }

    #[async_trait]
    impl BrokerAdapter for ScriptedAdapter {
        fn name(&self) -> QuoteSource {
            self.source
        }

        fn supports(&self, _symbol: &str) -> bool {
            self.supports_all
        }

        async fn get_quote(&self, symbol: &str) -> FetchOutcome<Quote> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(e) => FetchOutcome::err(self.source, 5, e.clone()),
                None => FetchOutcome::ok(self.source, 5, self.quote(symbol)),
            }
        }

        async fn get_candles(
            &self,
            _symbol: &str,
            _timeframe: &str,
            _limit: usize,
        ) -> FetchOutcome<Vec<Candle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(e) => FetchOutcome::err(self.source, 5, e.clone()),
                None => FetchOutcome::ok(
                    self.source,
                    5,
                    vec![Candle::new(0, 1.0, 2.0, 0.5, 1.5, 10.0)],
                ),
            }
        }

        async fn check_health(&self) -> bool {
            self.fail_with.is_none()
        }
    }

    struct Fixture {
        yahoo: Arc<ScriptedAdapter>,
        alpaca: Arc<ScriptedAdapter>,
        eodhd: Arc<ScriptedAdapter>,
        provider: MarketDataProvider,
    }

    fn fixture_with(
        config: HubConfig,
        yahoo: Arc<ScriptedAdapter>,
        alpaca: Arc<ScriptedAdapter>,
        eodhd: Arc<ScriptedAdapter>,
    ) -> Fixture {
        let adapters = AdapterSet {
            yahoo: yahoo.clone(),
            binance: ScriptedAdapter::ok(QuoteSource::Binance, 50_000.0),
            alpaca: alpaca.clone(),
            eodhd: eodhd.clone(),
            fx_sim: ScriptedAdapter::ok(QuoteSource::Simulated, 1.1),
            commodity_sim: ScriptedAdapter::ok(QuoteSource::Simulated, 2350.0),
        };
        let provider = MarketDataProvider::new(
            Arc::new(config),
            Arc::new(binding_map(default_bindings())),
            adapters,
        );
        Fixture {
            yahoo,
            alpaca,
            eodhd,
            provider,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            HubConfig::default(),
            ScriptedAdapter::ok(QuoteSource::Yahoo, 185.41),
            ScriptedAdapter::ok(QuoteSource::Alpaca, 185.40),
            ScriptedAdapter::ok(QuoteSource::Eodhd, 185.42),
        )
    }

    #[tokio::test]
    async fn cache_hit_preserves_source_and_reports_zero_latency() {
        let f = fixture();

        let first = f.provider.get_quote("NVDA").await;
        assert!(first.is_success());
        assert_eq!(first.source, QuoteSource::Eodhd);
        assert!(first.latency_ms > 0);

        let second = f.provider.get_quote("NVDA").await;
        assert!(second.is_success());
        assert_eq!(second.source, QuoteSource::Eodhd);
        assert_eq!(second.latency_ms, 0);
        // Upstream saw exactly one call.
        assert_eq!(f.eodhd.calls(), 1);
    }

    #[tokio::test]
    async fn fallback_steps_once_and_carries_fallback_source() {
        // EODHD unavailable for stocks, Yahoo down with 503, Alpaca healthy.
        let f = fixture_with(
            HubConfig::default(),
            ScriptedAdapter::failing(
                QuoteSource::Yahoo,
                FeedError::Network {
                    status: 503,
                    message: "service unavailable".into(),
                },
            ),
            ScriptedAdapter::ok(QuoteSource::Alpaca, 185.41),
            ScriptedAdapter::unsupporting(QuoteSource::Eodhd),
        );

        // Stock chain with EODHD filtered out: Alpaca, Yahoo. Alpaca wins
        // on the first attempt.
        let outcome = f.provider.get_quote("NVDA").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.source, QuoteSource::Alpaca);
        assert_eq!(f.alpaca.calls(), 1);
        assert_eq!(f.yahoo.calls(), 0);
    }

    #[tokio::test]
    async fn fallback_surfaces_last_error_after_one_step() {
        let f = fixture_with(
            HubConfig::default(),
            ScriptedAdapter::failing(
                QuoteSource::Yahoo,
                FeedError::Timeout { timeout_ms: 8000 },
            ),
            ScriptedAdapter::failing(
                QuoteSource::Alpaca,
                FeedError::Network {
                    status: 503,
                    message: "down".into(),
                },
            ),
            ScriptedAdapter::unsupporting(QuoteSource::Eodhd),
        );

        let outcome = f.provider.get_quote("NVDA").await;
        assert!(!outcome.is_success());
        // Chain was [Alpaca, Yahoo]; both attempted once, Yahoo's error is
        // the one surfaced.
        assert_eq!(outcome.source, QuoteSource::Yahoo);
        assert_eq!(outcome.error().unwrap().kind(), "timeout");
        assert_eq!(f.alpaca.calls(), 1);
        assert_eq!(f.yahoo.calls(), 1);
    }

    #[tokio::test]
    async fn live_data_disabled_short_circuits() {
        let mut config = HubConfig::default();
        config.enable_live_data = false;
        let f = fixture_with(
            config,
            ScriptedAdapter::ok(QuoteSource::Yahoo, 1.0),
            ScriptedAdapter::ok(QuoteSource::Alpaca, 1.0),
            ScriptedAdapter::ok(QuoteSource::Eodhd, 1.0),
        );

        let outcome = f.provider.get_quote("NVDA").await;
        assert_eq!(outcome.error().unwrap().kind(), "disabled");
        assert_eq!(f.eodhd.calls(), 0);
        assert_eq!(f.yahoo.calls(), 0);
    }

    #[tokio::test]
    async fn stock_preference_promotes_alpaca() {
        let mut config = HubConfig::default();
        config.primary_stock_source = StockSource::Alpaca;
        let f = fixture_with(
            config,
            ScriptedAdapter::ok(QuoteSource::Yahoo, 185.0),
            ScriptedAdapter::ok(QuoteSource::Alpaca, 185.0),
            ScriptedAdapter::unsupporting(QuoteSource::Eodhd),
        );

        let outcome = f.provider.get_quote("NVDA").await;
        assert_eq!(outcome.source, QuoteSource::Alpaca);
    }

    #[tokio::test]
    async fn crypto_routes_to_binance() {
        let f = fixture();
        let outcome = f.provider.get_quote("BTC").await;
        assert!(outcome.is_success());
        assert_eq!(outcome.source, QuoteSource::Binance);
    }

    #[tokio::test]
    async fn poll_refreshes_each_subscribed_symbol_once() {
        let f = fixture();
        f.provider.subscribe_symbol("NVDA");
        f.provider.subscribe_symbol("NVDA"); // duplicate join is a no-op
        let mut rx = f.provider.events();

        f.provider.poll_once().await;

        assert_eq!(f.eodhd.calls(), 1);
        let quote = rx.try_recv().unwrap();
        assert_eq!(quote.symbol, "NVDA");
        assert!(rx.try_recv().is_err(), "exactly one event per poll");
    }

    #[tokio::test]
    async fn stream_ingest_pre_populates_cache_and_emits() {
        let f = fixture();
        let mut rx = f.provider.events();

        let mut quote = ScriptedAdapter::ok(QuoteSource::Eodhd, 1.0895).quote("EUR/USD");
        quote.timestamp = crate::types::current_millis();
        f.provider.ingest_stream_quote(quote);

        let got = rx.try_recv().unwrap();
        assert_eq!(got.symbol, "EUR/USD");

        // Poll now hits the cache: no upstream call, same source.
        f.provider.subscribe_symbol("EUR/USD");
        f.provider.poll_once().await;
        assert_eq!(f.eodhd.calls(), 0);
        let repolled = rx.try_recv().unwrap();
        assert_eq!(repolled.source, QuoteSource::Eodhd);
    }

    #[tokio::test]
    async fn regressive_timestamps_are_dropped() {
        let f = fixture();
        let mut rx = f.provider.events();
        let template = ScriptedAdapter::ok(QuoteSource::Eodhd, 1.0);

        let mut q1 = template.quote("EUR/USD");
        q1.timestamp = 10_000;
        f.provider.emit_quote(q1);

        // 1 s inside tolerance: repeated/slightly-old timestamps pass.
        let mut q2 = template.quote("EUR/USD");
        q2.timestamp = 9_500;
        f.provider.emit_quote(q2);

        // Beyond tolerance: dropped.
        let mut q3 = template.quote("EUR/USD");
        q3.timestamp = 8_000;
        f.provider.emit_quote(q3);

        assert_eq!(rx.try_recv().unwrap().timestamp, 10_000);
        assert_eq!(rx.try_recv().unwrap().timestamp, 9_500);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_flushes_caches() {
        let f = fixture();
        let first = f.provider.get_quote("NVDA").await;
        assert!(first.is_success());

        f.provider.shutdown();

        // Cache is gone — the next read goes upstream again.
        let second = f.provider.get_quote("NVDA").await;
        assert!(second.latency_ms > 0);
        assert_eq!(f.eodhd.calls(), 2);
    }

    #[tokio::test]
    async fn health_probes_all_adapters() {
        let f = fixture_with(
            HubConfig::default(),
            ScriptedAdapter::failing(
                QuoteSource::Yahoo,
                FeedError::Timeout { timeout_ms: 5000 },
            ),
            ScriptedAdapter::ok(QuoteSource::Alpaca, 1.0),
            ScriptedAdapter::ok(QuoteSource::Eodhd, 1.0),
        );

        let health = f.provider.check_health().await;
        assert!(!health.yahoo);
        assert!(health.alpaca);
        assert!(health.eodhd);
        assert!(health.simulated);
    }

    #[tokio::test]
    async fn candles_cache_by_symbol_and_timeframe() {
        let f = fixture();

        let first = f.provider.get_candles("NVDA", "1m", 50).await;
        assert!(first.is_success());
        let cached = f.provider.get_candles("NVDA", "1m", 50).await;
        assert_eq!(cached.latency_ms, 0);
        // Different timeframe is a different key.
        let other = f.provider.get_candles("NVDA", "5m", 50).await;
        assert!(other.latency_ms > 0 || f.eodhd.calls() == 2);
        assert_eq!(f.eodhd.calls(), 2);
        assert!(other.is_success());
    }
}
