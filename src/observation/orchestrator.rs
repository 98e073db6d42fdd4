// =============================================================================
// Observation Orchestrator — dedup, sequencing, fan-out, snapshots
// =============================================================================
//
// The arena emits most fills on both `arena:bot:trade` and
// `continuous:trade`. Incoming trades are deduplicated on a SHA-256 digest
// of {botId|side|quantity|price|timestamp} within a 2 s window, then given
// a monotonic sequence number and an observation latency, and fanned out:
//
//   ring buffer  <- raw event record
//   fingerprinter<- behavioral update (with the prior market move)
//   indicators   <- the trade price as a synthetic market print
//   patterns     <- trade enriched with indicator state + regime
//   shapley      <- the trade's factor-scoring context
//
// Snapshots are cut on a 30 s cadence, the clustering pass on 120 s; both
// timers live in main and call in here.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::arena::events::{
    parse_leaderboard, LeaderboardEntry, RawTrade, TournamentUpdate,
};
use crate::indicators::{classify_regime, IndicatorEngine};
use crate::observation::cluster::{cluster_bots, ClusterConfig, ClusteringResult};
use crate::observation::fingerprint::{FingerprintSnapshot, Fingerprinter};
use crate::observation::patterns::{PatternBook, TradePattern};
use crate::observation::ring_buffer::{BufferedEvent, EventQuery, EventType, RingEventBuffer};
use crate::observation::shapley::{ShapleyAttribution, ShapleyAttributor, TradeContext};
use crate::observation::EnrichedTrade;
use crate::types::{current_millis, MarketRegime, TradeEvent};

/// Duplicate-suppression window.
const DEDUP_WINDOW_MS: i64 = 2_000;
/// Dedup map prune threshold.
const DEDUP_PRUNE_AT: usize = 4_096;
/// Ring buffer capacity.
const BUFFER_CAPACITY: usize = 10_000;
/// Snapshot history retained.
const SNAPSHOT_HISTORY: usize = 120;
/// Trades required before a bot enters the clustering pass.
const CLUSTER_MIN_TRADES: u64 = 5;

/// Periodic digest of the observation pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationSnapshot {
    /// Unix milliseconds.
    pub generated_at: i64,
    pub observer_session: String,
    pub trades_observed: u64,
    pub duplicates_dropped: u64,
    pub trades_last_minute: usize,
    pub tracked_bots: usize,
    pub tracked_symbols: Vec<String>,
    pub top_performers: Vec<(String, f64)>,
    pub bottom_performers: Vec<(String, f64)>,
    pub discovered_patterns: usize,
    pub top_patterns: Vec<TradePattern>,
    pub shapley_top: Vec<ShapleyAttribution>,
    pub cluster_count: usize,
    pub noise_bots: usize,
    pub mean_latency_ms: f64,
}

pub struct ObservationHub {
    observer_session: String,

    ring: Mutex<RingEventBuffer>,
    fingerprinter: RwLock<Fingerprinter>,
    patterns: RwLock<PatternBook>,
    shapley: RwLock<ShapleyAttributor>,
    engines: RwLock<HashMap<String, IndicatorEngine>>,

    /// Last observed print per symbol, for the fingerprint market delta.
    last_price: RwLock<HashMap<String, f64>>,
    /// Last trade time per bot, for the Shapley patience factor.
    last_trade_at: RwLock<HashMap<String, i64>>,

    dedup: Mutex<HashMap<String, i64>>,
    sequence: AtomicU64,
    duplicates_dropped: AtomicU64,
    latency_sum_ms: AtomicU64,

    latest_leaderboard: RwLock<Vec<LeaderboardEntry>>,
    latest_clustering: RwLock<Option<ClusteringResult>>,
    snapshots: RwLock<VecDeque<ObservationSnapshot>>,

    cluster_config: ClusterConfig,
}

impl ObservationHub {
    pub fn new() -> Self {
        Self::with_cluster_config(ClusterConfig::default())
    }

    pub fn with_cluster_config(cluster_config: ClusterConfig) -> Self {
        Self {
            observer_session: uuid::Uuid::new_v4().to_string(),
            ring: Mutex::new(RingEventBuffer::new(BUFFER_CAPACITY)),
            fingerprinter: RwLock::new(Fingerprinter::new()),
            patterns: RwLock::new(PatternBook::new()),
            shapley: RwLock::new(ShapleyAttributor::new()),
            engines: RwLock::new(HashMap::new()),
            last_price: RwLock::new(HashMap::new()),
            last_trade_at: RwLock::new(HashMap::new()),
            dedup: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latest_leaderboard: RwLock::new(Vec::new()),
            latest_clustering: RwLock::new(None),
            snapshots: RwLock::new(VecDeque::new()),
            cluster_config,
        }
    }

    // -------------------------------------------------------------------------
    // Trade ingestion
    // -------------------------------------------------------------------------

    /// Observe one raw trade from `channel`. Returns the sequenced event,
    /// or `None` when the dedup window swallowed it.
    pub fn observe_trade(
        &self,
        raw: &RawTrade,
        channel: &str,
        now_ms: i64,
    ) -> Option<TradeEvent> {
        if self.is_duplicate(raw, now_ms) {
            self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(bot = %raw.bot_id, symbol = %raw.symbol, "duplicate trade dropped");
            return None;
        }

        let sequence_num = self.sequence.fetch_add(1, Ordering::SeqCst);
        let latency_ms = (now_ms - raw.timestamp).max(0);
        self.latency_sum_ms
            .fetch_add(latency_ms as u64, Ordering::Relaxed);

        let trade = TradeEvent {
            bot_id: raw.bot_id.clone(),
            bot_name: raw.bot_name.clone(),
            group: raw.group,
            symbol: raw.symbol.clone(),
            side: raw.side,
            quantity: raw.quantity,
            price: raw.price,
            pnl: raw.pnl,
            reason: raw.reason.clone(),
            timestamp: raw.timestamp,
            observed_at: now_ms,
            sequence_num,
            latency_ms,
        };

        // 1. Ring buffer.
        self.ring.lock().append(BufferedEvent {
            timestamp: trade.timestamp,
            event_type: EventType::Trade,
            channel: channel.to_string(),
            bot_id: Some(trade.bot_id.clone()),
            symbol: Some(trade.symbol.clone()),
            payload: serde_json::to_value(&trade).unwrap_or_default(),
        });

        // 2. Fingerprint, with the market move just before this print.
        let market_delta = {
            let mut prices = self.last_price.write();
            let prev = prices.insert(trade.symbol.clone(), trade.price);
            prev.map(|p| trade.price - p).unwrap_or(0.0)
        };
        self.fingerprinter.write().observe(&trade, market_delta);

        // 3. The trade price is a synthetic market print for the symbol.
        let state = {
            let mut engines = self.engines.write();
            let engine = engines
                .entry(trade.symbol.clone())
                .or_insert_with(|| IndicatorEngine::new(trade.symbol.clone()));
            engine.on_tick(trade.price, trade.timestamp);
            engine.state()
        };

        // 4 & 5. Enrichment-dependent consumers.
        let time_since_prev = {
            let mut last = self.last_trade_at.write();
            let prev = last.insert(trade.bot_id.clone(), trade.timestamp);
            prev.map(|t| (trade.timestamp - t).max(0))
        };

        match state {
            Some(state) => {
                let regime = classify_regime(&state);
                let ctx = TradeContext {
                    bot_id: trade.bot_id.clone(),
                    side: trade.side,
                    pnl: trade.pnl,
                    notional: trade.quantity * trade.price,
                    time_since_prev_ms: time_since_prev,
                    rsi: state.rsi14,
                    rsi_slope: state.rsi_slope,
                    percent_b: state.bb_percent_b,
                    macd_cross: state.macd_crossover,
                    volatility_rank: state.volatility_rank,
                    regime,
                };
                self.shapley.write().record(&ctx);

                let enriched = EnrichedTrade {
                    trade,
                    indicators: state,
                    regime,
                };
                self.patterns.write().observe(&enriched);
                Some(enriched.trade)
            }
            None => {
                // Cold indicators: attribution still records a neutral
                // context so P&L accounting stays complete.
                let ctx = TradeContext {
                    bot_id: trade.bot_id.clone(),
                    side: trade.side,
                    pnl: trade.pnl,
                    notional: trade.quantity * trade.price,
                    time_since_prev_ms: time_since_prev,
                    rsi: 50.0,
                    rsi_slope: 0.0,
                    percent_b: 0.5,
                    macd_cross: crate::indicators::MacdCross::None,
                    volatility_rank: 0.5,
                    regime: MarketRegime::Ranging,
                };
                self.shapley.write().record(&ctx);
                Some(trade)
            }
        }
    }

    /// Feed a distributed market quote into the symbol's indicator engine.
    /// This is the hub-subscription path; trade prints arrive separately
    /// through [`ObservationHub::observe_trade`].
    pub fn on_market_quote(&self, symbol: &str, price: f64, timestamp_ms: i64) {
        let mut engines = self.engines.write();
        engines
            .entry(symbol.to_string())
            .or_insert_with(|| IndicatorEngine::new(symbol.to_string()))
            .on_tick(price, timestamp_ms);
    }

    fn is_duplicate(&self, raw: &RawTrade, now_ms: i64) -> bool {
        let digest = trade_digest(raw);
        let mut dedup = self.dedup.lock();

        if dedup.len() > DEDUP_PRUNE_AT {
            dedup.retain(|_, seen| now_ms - *seen < DEDUP_WINDOW_MS);
        }

        match dedup.get(&digest) {
            Some(&seen) if now_ms - seen < DEDUP_WINDOW_MS => true,
            _ => {
                dedup.insert(digest, now_ms);
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Non-trade events
    // -------------------------------------------------------------------------

    pub fn on_leaderboard(&self, payload: &serde_json::Value, now_ms: i64) {
        let entries = parse_leaderboard(payload);
        if !entries.is_empty() {
            *self.latest_leaderboard.write() = entries;
        }
        self.ring.lock().append(BufferedEvent {
            timestamp: now_ms,
            event_type: EventType::Leaderboard,
            channel: crate::arena::EVT_LEADERBOARD.to_string(),
            bot_id: None,
            symbol: None,
            payload: payload.clone(),
        });
    }

    pub fn on_tournament(&self, payload: &serde_json::Value, now_ms: i64) {
        if let Some(update) = TournamentUpdate::parse(payload) {
            info!(
                kind = %update.kind,
                round = update.round,
                total = update.total_rounds,
                "tournament update"
            );
        }
        self.ring.lock().append(BufferedEvent {
            timestamp: now_ms,
            event_type: EventType::Tournament,
            channel: crate::arena::EVT_TOURNAMENT.to_string(),
            bot_id: None,
            symbol: None,
            payload: payload.clone(),
        });
    }

    pub fn on_evolution(&self, payload: &serde_json::Value, now_ms: i64) {
        self.ring.lock().append(BufferedEvent {
            timestamp: now_ms,
            event_type: EventType::Evolution,
            channel: crate::arena::EVT_EVOLUTION.to_string(),
            bot_id: None,
            symbol: None,
            payload: payload.clone(),
        });
    }

    // -------------------------------------------------------------------------
    // Periodic passes
    // -------------------------------------------------------------------------

    /// The clustering pass: feature vectors of every bot with enough
    /// trades, fully replacing the previous result.
    pub fn run_clustering_pass(&self) -> ClusteringResult {
        let rows = self.fingerprinter.read().feature_vectors(CLUSTER_MIN_TRADES);
        let result = cluster_bots(&rows, &self.cluster_config);
        info!(
            bots = rows.len(),
            clusters = result.clusters.len(),
            noise = result.noise.len(),
            silhouette = result.silhouette,
            "clustering pass complete"
        );
        *self.latest_clustering.write() = Some(result.clone());
        result
    }

    /// Cut a snapshot and push it onto the bounded history.
    pub fn snapshot(&self, now_ms: i64) -> ObservationSnapshot {
        let trades_observed = self.sequence.load(Ordering::SeqCst);

        let trades_last_minute = self
            .ring
            .lock()
            .query(&EventQuery {
                start_time: now_ms - 60_000,
                end_time: now_ms,
                event_type: Some(EventType::Trade),
                ..Default::default()
            })
            .len();

        let leaderboard = self.latest_leaderboard.read();
        let top_performers: Vec<(String, f64)> = leaderboard
            .iter()
            .take(3)
            .map(|e| (e.bot_name.clone(), e.pnl))
            .collect();
        let bottom_performers: Vec<(String, f64)> = leaderboard
            .iter()
            .rev()
            .take(3)
            .map(|e| (e.bot_name.clone(), e.pnl))
            .collect();
        drop(leaderboard);

        let patterns = self.patterns.read();
        let discovered = patterns.discovered();
        drop(patterns);

        let clustering = self.latest_clustering.read();
        let (cluster_count, noise_bots) = clustering
            .as_ref()
            .map(|c| (c.clusters.len(), c.noise.len()))
            .unwrap_or((0, 0));
        drop(clustering);

        let mean_latency_ms = if trades_observed > 0 {
            self.latency_sum_ms.load(Ordering::Relaxed) as f64 / trades_observed as f64
        } else {
            0.0
        };

        let snapshot = ObservationSnapshot {
            generated_at: now_ms,
            observer_session: self.observer_session.clone(),
            trades_observed,
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            trades_last_minute,
            tracked_bots: self.fingerprinter.read().len(),
            tracked_symbols: {
                let mut symbols: Vec<String> =
                    self.engines.read().keys().cloned().collect();
                symbols.sort();
                symbols
            },
            top_performers,
            bottom_performers,
            discovered_patterns: discovered.len(),
            top_patterns: discovered.into_iter().take(5).collect(),
            shapley_top: self.shapley.read().top(5),
            cluster_count,
            noise_bots,
            mean_latency_ms,
        };

        let mut history = self.snapshots.write();
        history.push_back(snapshot.clone());
        while history.len() > SNAPSHOT_HISTORY {
            history.pop_front();
        }
        snapshot
    }

    pub fn latest_snapshot(&self) -> Option<ObservationSnapshot> {
        self.snapshots.read().back().cloned()
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn trades_observed(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped.load(Ordering::Relaxed)
    }

    pub fn fingerprint_snapshots(&self) -> Vec<FingerprintSnapshot> {
        self.fingerprinter.read().snapshots()
    }

    pub fn discovered_patterns(&self) -> Vec<TradePattern> {
        self.patterns.read().discovered()
    }

    pub fn attributions(&self) -> Vec<ShapleyAttribution> {
        self.shapley.read().attributions()
    }

    pub fn latest_clustering(&self) -> Option<ClusteringResult> {
        self.latest_clustering.read().clone()
    }

    /// Range query over the raw event record.
    pub fn query_events(&self, query: &EventQuery) -> Vec<BufferedEvent> {
        self.ring.lock().query(query).into_iter().cloned().collect()
    }
}

impl Default for ObservationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// The dedup digest: SHA-256 over the identity fields.
fn trade_digest(raw: &RawTrade) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}|{}",
            raw.bot_id, raw.side, raw.quantity, raw.price, raw.timestamp
        )
        .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// Wire the orchestrator's handlers onto an arena stream.
pub fn attach_to_stream(
    hub: &std::sync::Arc<ObservationHub>,
    stream: &crate::arena::ArenaStream,
) {
    use crate::arena::{
        parse_trade, EVT_ARENA_TRADE, EVT_CONTINUOUS_TRADE, EVT_EVOLUTION, EVT_LEADERBOARD,
        EVT_TOURNAMENT,
    };

    for channel in [EVT_ARENA_TRADE, EVT_CONTINUOUS_TRADE] {
        let hub = hub.clone();
        stream.on(channel, std::sync::Arc::new(move |payload| {
            if let Some(raw) = parse_trade(payload) {
                hub.observe_trade(&raw, channel, current_millis());
            }
        }));
    }

    let h = hub.clone();
    stream.on(EVT_LEADERBOARD, std::sync::Arc::new(move |payload| {
        h.on_leaderboard(payload, current_millis());
    }));

    let h = hub.clone();
    stream.on(EVT_TOURNAMENT, std::sync::Arc::new(move |payload| {
        h.on_tournament(payload, current_millis());
    }));

    let h = hub.clone();
    stream.on(EVT_EVOLUTION, std::sync::Arc::new(move |payload| {
        h.on_evolution(payload, current_millis());
    }));
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BotGroup, TradeSide};

    fn raw(bot: &str, side: TradeSide, qty: f64, price: f64, ts: i64) -> RawTrade {
        RawTrade {
            bot_id: bot.into(),
            bot_name: format!("Bot {bot}"),
            group: BotGroup::Beta,
            symbol: "NVDA".into(),
            side,
            quantity: qty,
            price,
            pnl: 1.0,
            reason: "test".into(),
            timestamp: ts,
        }
    }

    #[test]
    fn dedup_window_semantics() {
        let hub = ObservationHub::new();
        let t = 1_000_000;
        let trade = raw("b1", TradeSide::Buy, 100.0, 50.0, t);

        // First submission accepted with sequence 0.
        let first = hub.observe_trade(&trade, "arena:bot:trade", t).unwrap();
        assert_eq!(first.sequence_num, 0);

        // Identical trade 500 ms later on the other channel: dropped.
        assert!(hub
            .observe_trade(&trade, "continuous:trade", t + 500)
            .is_none());
        assert_eq!(hub.duplicates_dropped(), 1);

        // Same content again 3 s after the first: accepted, sequence 1.
        let third = hub
            .observe_trade(&trade, "arena:bot:trade", t + 3_000)
            .unwrap();
        assert_eq!(third.sequence_num, 1);
        assert_eq!(hub.trades_observed(), 2);
    }

    #[test]
    fn different_trades_are_not_deduped() {
        let hub = ObservationHub::new();
        let t = 1_000_000;

        assert!(hub
            .observe_trade(&raw("b1", TradeSide::Buy, 100.0, 50.0, t), "c", t)
            .is_some());
        // Different quantity.
        assert!(hub
            .observe_trade(&raw("b1", TradeSide::Buy, 101.0, 50.0, t), "c", t + 10)
            .is_some());
        // Different side.
        assert!(hub
            .observe_trade(&raw("b1", TradeSide::Sell, 100.0, 50.0, t), "c", t + 20)
            .is_some());
        // Different bot.
        assert!(hub
            .observe_trade(&raw("b2", TradeSide::Buy, 100.0, 50.0, t), "c", t + 30)
            .is_some());
        assert_eq!(hub.trades_observed(), 4);
    }

    #[test]
    fn sequencing_reflects_acceptance_order() {
        let hub = ObservationHub::new();
        let t = 1_000_000;
        for i in 0..5 {
            let trade = raw("b1", TradeSide::Buy, 1.0 + i as f64, 50.0, t + i * 100);
            let event = hub.observe_trade(&trade, "c", t + i * 100).unwrap();
            assert_eq!(event.sequence_num, i as u64);
        }
    }

    #[test]
    fn latency_is_observed_minus_emitted() {
        let hub = ObservationHub::new();
        let event = hub
            .observe_trade(&raw("b1", TradeSide::Buy, 1.0, 50.0, 1_000), "c", 1_250)
            .unwrap();
        assert_eq!(event.latency_ms, 250);
        assert_eq!(event.observed_at, 1_250);
    }

    #[test]
    fn trades_flow_into_ring_and_fingerprints() {
        let hub = ObservationHub::new();
        let t = 1_000_000;
        for i in 0..3 {
            hub.observe_trade(
                &raw("b1", TradeSide::Buy, 1.0, 50.0 + i as f64, t + i * 1_000),
                "arena:bot:trade",
                t + i * 1_000,
            );
        }

        let events = hub.query_events(&EventQuery {
            start_time: 0,
            end_time: t + 10_000,
            event_type: Some(EventType::Trade),
            ..Default::default()
        });
        assert_eq!(events.len(), 3);

        let prints = hub.fingerprint_snapshots();
        assert_eq!(prints.len(), 1);
        assert_eq!(prints[0].trade_count, 3);
    }

    #[test]
    fn shapley_accounts_every_accepted_trade() {
        let hub = ObservationHub::new();
        let t = 1_000_000;
        hub.observe_trade(&raw("b1", TradeSide::Buy, 1.0, 50.0, t), "c", t);
        hub.observe_trade(&raw("b1", TradeSide::Buy, 1.0, 50.0, t), "c", t + 100); // dup
        hub.observe_trade(&raw("b2", TradeSide::Sell, 2.0, 60.0, t + 200), "c", t + 200);

        let rows = hub.attributions();
        assert_eq!(rows.len(), 2);
        let b1 = rows.iter().find(|r| r.bot_id == "b1").unwrap();
        assert_eq!(b1.trade_count, 1, "duplicate must not reach attribution");
    }

    #[test]
    fn enrichment_reaches_patterns_once_indicators_warm() {
        let hub = ObservationHub::new();
        let start = 1_000_000;
        // One trade per minute for 50 minutes warms the engine (bars seal
        // as the prints cross minute boundaries) and the tail trades are
        // enriched.
        for i in 0..50i64 {
            let price = 50.0 + ((i * 13) % 7) as f64 * 0.1;
            hub.observe_trade(
                &raw("b1", TradeSide::Buy, 1.0, price, start + i * 60_000),
                "arena:bot:trade",
                start + i * 60_000,
            );
        }
        assert!(
            hub.patterns.read().observed_count() > 0,
            "warm engine should enrich the tail trades"
        );
    }

    #[test]
    fn leaderboard_updates_latest_and_ring() {
        let hub = ObservationHub::new();
        let payload = serde_json::json!([
            { "botId": "a", "botName": "Alpha One", "pnl": 120.0 },
            { "botId": "b", "botName": "Beta Two", "pnl": 80.0 },
            { "botId": "c", "botName": "Gamma Three", "pnl": -10.0 },
            { "botId": "d", "botName": "Delta Four", "pnl": -50.0 }
        ]);
        hub.on_leaderboard(&payload, 5_000);

        let snap = hub.snapshot(10_000);
        assert_eq!(snap.top_performers.len(), 3);
        assert_eq!(snap.top_performers[0].0, "Alpha One");
        assert_eq!(snap.bottom_performers[0].0, "Delta Four");
    }

    #[test]
    fn snapshot_counts_recent_trades() {
        let hub = ObservationHub::new();
        let t = 10_000_000;
        hub.observe_trade(&raw("b1", TradeSide::Buy, 1.0, 50.0, t - 120_000), "c", t - 120_000);
        hub.observe_trade(&raw("b1", TradeSide::Buy, 2.0, 50.0, t - 30_000), "c", t - 30_000);
        hub.observe_trade(&raw("b1", TradeSide::Buy, 3.0, 50.0, t - 10_000), "c", t - 10_000);

        let snap = hub.snapshot(t);
        assert_eq!(snap.trades_observed, 3);
        assert_eq!(snap.trades_last_minute, 2);
        assert!(hub.latest_snapshot().is_some());
    }

    #[test]
    fn clustering_pass_replaces_wholesale() {
        let hub = ObservationHub::new();
        let t = 1_000_000;
        // Give several bots enough trades to qualify.
        for bot in 0..8i64 {
            for i in 0..6i64 {
                let price = 50.0 + (bot as f64) * 5.0 + (i % 3) as f64;
                let ts = t + (bot * 100 + i) * 1_000;
                hub.observe_trade(
                    &raw(
                        &format!("bot-{bot}"),
                        if (bot + i) % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell },
                        1.0 + bot as f64,
                        price,
                        ts,
                    ),
                    "c",
                    ts,
                );
            }
        }

        let first = hub.run_clustering_pass();
        let second = hub.run_clustering_pass();
        // Same fingerprints, same seed: identical result, fully replaced.
        assert_eq!(first.noise, second.noise);
        assert_eq!(
            first.clusters.iter().map(|c| c.members.clone()).collect::<Vec<_>>(),
            second.clusters.iter().map(|c| c.members.clone()).collect::<Vec<_>>(),
        );
        assert!(hub.latest_clustering().is_some());
    }
}
