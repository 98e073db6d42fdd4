// =============================================================================
// Bot Fingerprinter — streaming behavioral profile per bot
// =============================================================================
//
// A fingerprint is created on the first observed trade, updated on every
// trade after that, and never destroyed while the process lives. Aggregate
// counters (counts, P&L sums, histograms) are permutation-invariant;
// streaks and the bounded recent history are order-sensitive by design.
//
// The 9-dimensional feature vector feeds the behavioral clusterer:
//   win rate, profit factor (capped 5), aggressiveness, conviction,
//   contrarian ratio, momentum bias, buy ratio, trade frequency,
//   interval regularity.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::types::{BotGroup, TradeEvent, TradeSide};

/// Bounded per-bot trade history.
const HISTORY_CAP: usize = 500;
/// Baseline trade rate (per minute) for the aggressiveness ratio.
const AGGRESSIVENESS_BASELINE: f64 = 1.0;
/// Profit factor cap inside the feature vector.
const PROFIT_FACTOR_CAP: f64 = 5.0;

/// Number of clustering feature dimensions.
pub const FEATURE_DIMS: usize = 9;

/// Human-readable labels for the feature dimensions, used when naming
/// clusters by their strongest axes.
pub const FEATURE_LABELS: [&str; FEATURE_DIMS] = [
    "Winning",
    "Profitable",
    "Aggressive",
    "Conviction",
    "Contrarian",
    "Momentum",
    "Buying",
    "Frequent",
    "Irregular",
];

#[derive(Debug, Clone, Copy)]
struct TradeRecord {
    timestamp: i64,
    side: TradeSide,
    price: f64,
    notional: f64,
    /// Price movement of the symbol just before this trade.
    market_delta: f64,
}

/// Streaming behavioral statistics for one bot.
#[derive(Debug, Clone)]
pub struct BotFingerprint {
    pub bot_id: String,
    pub bot_name: String,
    pub group: BotGroup,

    history: VecDeque<TradeRecord>,

    // ── Permutation-invariant aggregates ────────────────────────────────
    pub trade_count: u64,
    pub buy_count: u64,
    pub total_pnl: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub wins: u64,
    pub losses: u64,
    reason_counts: HashMap<String, u32>,
    hour_counts: [u32; 24],
    sum_notional: f64,
    max_notional: f64,
    first_seen: i64,
    last_seen: i64,

    // ── Order-sensitive state ───────────────────────────────────────────
    /// Signed running streak: positive = consecutive wins.
    streak: i64,
    pub max_win_streak: u64,
    pub max_loss_streak: u64,
}

impl BotFingerprint {
    fn new(trade: &TradeEvent) -> Self {
        Self {
            bot_id: trade.bot_id.clone(),
            bot_name: trade.bot_name.clone(),
            group: trade.group,
            history: VecDeque::with_capacity(HISTORY_CAP + 1),
            trade_count: 0,
            buy_count: 0,
            total_pnl: 0.0,
            gross_profit: 0.0,
            gross_loss: 0.0,
            wins: 0,
            losses: 0,
            reason_counts: HashMap::new(),
            hour_counts: [0; 24],
            sum_notional: 0.0,
            max_notional: 0.0,
            first_seen: trade.timestamp,
            last_seen: trade.timestamp,
            streak: 0,
            max_win_streak: 0,
            max_loss_streak: 0,
        }
    }

    fn update(&mut self, trade: &TradeEvent, market_delta: f64) {
        self.trade_count += 1;
        if trade.side == TradeSide::Buy {
            self.buy_count += 1;
        }

        self.total_pnl += trade.pnl;
        if trade.pnl > 0.0 {
            self.wins += 1;
            self.gross_profit += trade.pnl;
            self.streak = if self.streak > 0 { self.streak + 1 } else { 1 };
            self.max_win_streak = self.max_win_streak.max(self.streak as u64);
        } else if trade.pnl < 0.0 {
            self.losses += 1;
            self.gross_loss += -trade.pnl;
            self.streak = if self.streak < 0 { self.streak - 1 } else { -1 };
            self.max_loss_streak = self.max_loss_streak.max((-self.streak) as u64);
        }
        // Flat trades leave the streak untouched.

        *self
            .reason_counts
            .entry(trade.reason.clone())
            .or_insert(0) += 1;

        let hour = hour_of_day(trade.timestamp);
        self.hour_counts[hour] += 1;

        let notional = trade.quantity * trade.price;
        self.sum_notional += notional;
        self.max_notional = self.max_notional.max(notional);

        self.first_seen = self.first_seen.min(trade.timestamp);
        self.last_seen = self.last_seen.max(trade.timestamp);

        self.history.push_back(TradeRecord {
            timestamp: trade.timestamp,
            side: trade.side,
            price: trade.price,
            notional,
            market_delta,
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    // -------------------------------------------------------------------------
    // Derived statistics
    // -------------------------------------------------------------------------

    pub fn win_rate(&self) -> f64 {
        if self.trade_count == 0 {
            return 0.0;
        }
        self.wins as f64 / self.trade_count as f64
    }

    pub fn profit_factor(&self) -> f64 {
        if self.gross_loss > 0.0 {
            self.gross_profit / self.gross_loss
        } else if self.gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }

    pub fn avg_win(&self) -> f64 {
        if self.wins == 0 {
            0.0
        } else {
            self.gross_profit / self.wins as f64
        }
    }

    pub fn avg_loss(&self) -> f64 {
        if self.losses == 0 {
            0.0
        } else {
            self.gross_loss / self.losses as f64
        }
    }

    /// Mean and standard deviation of inter-trade intervals (ms), over the
    /// bounded history.
    pub fn interval_stats(&self) -> (f64, f64) {
        let intervals: Vec<f64> = self
            .history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| (b.timestamp - a.timestamp) as f64)
            .collect();
        if intervals.is_empty() {
            return (0.0, 0.0);
        }
        let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let var =
            intervals.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / intervals.len() as f64;
        (mean, var.sqrt())
    }

    /// Observed trades per minute over the bot's lifetime.
    pub fn trades_per_min(&self) -> f64 {
        let span_ms = (self.last_seen - self.first_seen).max(1) as f64;
        if self.trade_count < 2 {
            return 0.0;
        }
        (self.trade_count as f64 - 1.0) / (span_ms / 60_000.0)
    }

    /// Trade rate against the baseline, capped at 2.
    pub fn aggressiveness(&self) -> f64 {
        (self.trades_per_min() / AGGRESSIVENESS_BASELINE).min(2.0)
    }

    /// Average size relative to the bot's own maximum.
    pub fn conviction(&self) -> f64 {
        if self.max_notional == 0.0 || self.trade_count == 0 {
            return 0.0;
        }
        (self.sum_notional / self.trade_count as f64) / self.max_notional
    }

    /// Fraction of trades that lean against the prior market move.
    pub fn contrarian_ratio(&self) -> f64 {
        let considered: Vec<&TradeRecord> = self
            .history
            .iter()
            .filter(|r| r.market_delta != 0.0)
            .collect();
        if considered.is_empty() {
            return 0.0;
        }
        let against = considered
            .iter()
            .filter(|r| r.side.direction() * r.market_delta < 0.0)
            .count();
        against as f64 / considered.len() as f64
    }

    /// Pearson correlation between trade direction and the bot's own
    /// inter-trade price change. Positive: buys into strength.
    pub fn momentum_bias(&self) -> f64 {
        let mut dirs = Vec::new();
        let mut moves = Vec::new();
        for (prev, cur) in self.history.iter().zip(self.history.iter().skip(1)) {
            dirs.push(cur.side.direction());
            moves.push(cur.price - prev.price);
        }
        pearson(&dirs, &moves)
    }

    pub fn buy_ratio(&self) -> f64 {
        if self.trade_count == 0 {
            return 0.0;
        }
        self.buy_count as f64 / self.trade_count as f64
    }

    /// Coefficient of variation of inter-trade intervals. 0 = metronome.
    pub fn regularity_cv(&self) -> f64 {
        let (mean, stddev) = self.interval_stats();
        if mean == 0.0 {
            return 0.0;
        }
        stddev / mean
    }

    /// Hours of day (UTC) with at least half the peak hour's activity.
    pub fn preferred_hours(&self) -> Vec<u8> {
        let max = match self.hour_counts.iter().max() {
            Some(&m) if m > 0 => m,
            _ => return Vec::new(),
        };
        self.hour_counts
            .iter()
            .enumerate()
            .filter(|(_, &c)| c * 2 >= max)
            .map(|(h, _)| h as u8)
            .collect()
    }

    pub fn reason_distribution(&self) -> &HashMap<String, u32> {
        &self.reason_counts
    }

    /// Dominant strategy tag, if any.
    pub fn top_reason(&self) -> Option<&str> {
        self.reason_counts
            .iter()
            .max_by_key(|(_, &c)| c)
            .map(|(r, _)| r.as_str())
    }

    /// The clustering feature vector.
    pub fn feature_vector(&self) -> [f64; FEATURE_DIMS] {
        [
            self.win_rate(),
            self.profit_factor().min(PROFIT_FACTOR_CAP),
            self.aggressiveness(),
            self.conviction(),
            self.contrarian_ratio(),
            self.momentum_bias(),
            self.buy_ratio(),
            self.trades_per_min(),
            self.regularity_cv(),
        ]
    }

    pub fn snapshot(&self) -> FingerprintSnapshot {
        FingerprintSnapshot {
            bot_id: self.bot_id.clone(),
            bot_name: self.bot_name.clone(),
            group: self.group,
            trade_count: self.trade_count,
            total_pnl: self.total_pnl,
            win_rate: self.win_rate(),
            profit_factor: self.profit_factor().min(PROFIT_FACTOR_CAP),
            max_win_streak: self.max_win_streak,
            max_loss_streak: self.max_loss_streak,
            aggressiveness: self.aggressiveness(),
            conviction: self.conviction(),
            contrarian_ratio: self.contrarian_ratio(),
            momentum_bias: self.momentum_bias(),
            buy_ratio: self.buy_ratio(),
            trades_per_min: self.trades_per_min(),
            preferred_hours: self.preferred_hours(),
            top_reason: self.top_reason().map(String::from),
        }
    }
}

/// Serializable fingerprint view for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct FingerprintSnapshot {
    pub bot_id: String,
    pub bot_name: String,
    pub group: BotGroup,
    pub trade_count: u64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub max_win_streak: u64,
    pub max_loss_streak: u64,
    pub aggressiveness: f64,
    pub conviction: f64,
    pub contrarian_ratio: f64,
    pub momentum_bias: f64,
    pub buy_ratio: f64,
    pub trades_per_min: f64,
    pub preferred_hours: Vec<u8>,
    pub top_reason: Option<String>,
}

// =============================================================================
// Registry
// =============================================================================

/// Owns every fingerprint. Only the orchestrator mutates it.
#[derive(Default)]
pub struct Fingerprinter {
    fingerprints: HashMap<String, BotFingerprint>,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one observed trade. `market_delta` is the symbol's price move
    /// immediately before the trade.
    pub fn observe(&mut self, trade: &TradeEvent, market_delta: f64) {
        self.fingerprints
            .entry(trade.bot_id.clone())
            .or_insert_with(|| BotFingerprint::new(trade))
            .update(trade, market_delta);
    }

    pub fn get(&self, bot_id: &str) -> Option<&BotFingerprint> {
        self.fingerprints.get(bot_id)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn snapshots(&self) -> Vec<FingerprintSnapshot> {
        self.fingerprints.values().map(|f| f.snapshot()).collect()
    }

    /// Feature vectors of every bot with at least `min_trades` observed,
    /// sorted by bot id for deterministic downstream passes.
    pub fn feature_vectors(&self, min_trades: u64) -> Vec<(String, [f64; FEATURE_DIMS])> {
        let mut rows: Vec<(String, [f64; FEATURE_DIMS])> = self
            .fingerprints
            .values()
            .filter(|f| f.trade_count >= min_trades)
            .map(|f| (f.bot_id.clone(), f.feature_vector()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn hour_of_day(timestamp_ms: i64) -> usize {
    ((timestamp_ms / 3_600_000).rem_euclid(24)) as usize
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];

    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for i in 0..n {
        let dx = xs[i] - mx;
        let dy = ys[i] - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx == 0.0 || vy == 0.0 {
        return 0.0;
    }
    cov / (vx.sqrt() * vy.sqrt())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(bot: &str, side: TradeSide, qty: f64, price: f64, pnl: f64, ts: i64) -> TradeEvent {
        TradeEvent {
            bot_id: bot.into(),
            bot_name: format!("Bot {bot}"),
            group: BotGroup::Beta,
            symbol: "NVDA".into(),
            side,
            quantity: qty,
            price,
            pnl,
            reason: "rsi_reversal".into(),
            timestamp: ts,
            observed_at: ts,
            sequence_num: 0,
            latency_ms: 0,
        }
    }

    #[test]
    fn created_on_first_trade_updated_after() {
        let mut fp = Fingerprinter::new();
        assert!(fp.is_empty());

        fp.observe(&trade("b1", TradeSide::Buy, 10.0, 100.0, 5.0, 1_000), 0.1);
        assert_eq!(fp.len(), 1);
        assert_eq!(fp.get("b1").unwrap().trade_count, 1);

        fp.observe(&trade("b1", TradeSide::Sell, 10.0, 101.0, -2.0, 2_000), 0.1);
        assert_eq!(fp.len(), 1);
        let f = fp.get("b1").unwrap();
        assert_eq!(f.trade_count, 2);
        assert_eq!(f.wins, 1);
        assert_eq!(f.losses, 1);
        assert!((f.total_pnl - 3.0).abs() < 1e-12);
    }

    #[test]
    fn aggregates_commute_under_permutation() {
        let trades = vec![
            trade("b1", TradeSide::Buy, 10.0, 100.0, 5.0, 1_000),
            trade("b1", TradeSide::Sell, 20.0, 101.0, -3.0, 2_000),
            trade("b1", TradeSide::Buy, 5.0, 99.0, 7.0, 3_000),
            trade("b1", TradeSide::Sell, 15.0, 102.0, -1.0, 4_000),
            trade("b1", TradeSide::Buy, 8.0, 100.5, 2.0, 5_000),
        ];

        let mut forward = Fingerprinter::new();
        for t in &trades {
            forward.observe(t, 0.0);
        }

        let mut reversed = Fingerprinter::new();
        for t in trades.iter().rev() {
            reversed.observe(t, 0.0);
        }

        let f = forward.get("b1").unwrap();
        let r = reversed.get("b1").unwrap();
        assert_eq!(f.trade_count, r.trade_count);
        assert_eq!(f.wins, r.wins);
        assert_eq!(f.losses, r.losses);
        assert_eq!(f.buy_count, r.buy_count);
        assert!((f.total_pnl - r.total_pnl).abs() < 1e-9);
        assert!((f.gross_profit - r.gross_profit).abs() < 1e-9);
        assert!((f.gross_loss - r.gross_loss).abs() < 1e-9);
        assert_eq!(f.reason_distribution(), r.reason_distribution());
    }

    #[test]
    fn streaks_are_order_sensitive() {
        // W W W L L -> max win streak 3, max loss streak 2.
        let mut fp = Fingerprinter::new();
        for (i, pnl) in [5.0, 3.0, 2.0, -1.0, -4.0].iter().enumerate() {
            fp.observe(
                &trade("b1", TradeSide::Buy, 1.0, 100.0, *pnl, (i as i64 + 1) * 1_000),
                0.0,
            );
        }
        let f = fp.get("b1").unwrap();
        assert_eq!(f.max_win_streak, 3);
        assert_eq!(f.max_loss_streak, 2);

        // Interleaved W L W L W -> both streaks 1.
        let mut fp = Fingerprinter::new();
        for (i, pnl) in [5.0, -3.0, 2.0, -1.0, 4.0].iter().enumerate() {
            fp.observe(
                &trade("b1", TradeSide::Buy, 1.0, 100.0, *pnl, (i as i64 + 1) * 1_000),
                0.0,
            );
        }
        let f = fp.get("b1").unwrap();
        assert_eq!(f.max_win_streak, 1);
        assert_eq!(f.max_loss_streak, 1);
    }

    #[test]
    fn contrarian_ratio_counts_fades() {
        let mut fp = Fingerprinter::new();
        // Buys into drops and sells into rips: pure contrarian.
        fp.observe(&trade("b1", TradeSide::Buy, 1.0, 100.0, 0.0, 1_000), -0.5);
        fp.observe(&trade("b1", TradeSide::Sell, 1.0, 101.0, 0.0, 2_000), 0.5);
        fp.observe(&trade("b1", TradeSide::Buy, 1.0, 100.5, 0.0, 3_000), -0.2);
        assert!((fp.get("b1").unwrap().contrarian_ratio() - 1.0).abs() < 1e-12);

        let mut fp = Fingerprinter::new();
        // Buys into strength: zero contrarian.
        fp.observe(&trade("b2", TradeSide::Buy, 1.0, 100.0, 0.0, 1_000), 0.5);
        fp.observe(&trade("b2", TradeSide::Buy, 1.0, 101.0, 0.0, 2_000), 0.3);
        assert!(fp.get("b2").unwrap().contrarian_ratio().abs() < 1e-12);
    }

    #[test]
    fn momentum_bias_sign_tracks_behavior() {
        let mut fp = Fingerprinter::new();
        // Buys after up-moves, sells after down-moves.
        fp.observe(&trade("b1", TradeSide::Buy, 1.0, 100.0, 0.0, 1_000), 0.0);
        fp.observe(&trade("b1", TradeSide::Buy, 1.0, 101.0, 0.0, 2_000), 0.0);
        fp.observe(&trade("b1", TradeSide::Sell, 1.0, 100.0, 0.0, 3_000), 0.0);
        fp.observe(&trade("b1", TradeSide::Buy, 1.0, 102.0, 0.0, 4_000), 0.0);
        fp.observe(&trade("b1", TradeSide::Sell, 1.0, 101.0, 0.0, 5_000), 0.0);
        assert!(fp.get("b1").unwrap().momentum_bias() > 0.5);
    }

    #[test]
    fn conviction_relates_avg_to_max_size() {
        let mut fp = Fingerprinter::new();
        fp.observe(&trade("b1", TradeSide::Buy, 10.0, 100.0, 0.0, 1_000), 0.0); // 1000
        fp.observe(&trade("b1", TradeSide::Buy, 10.0, 100.0, 0.0, 2_000), 0.0); // 1000
        fp.observe(&trade("b1", TradeSide::Buy, 20.0, 100.0, 0.0, 3_000), 0.0); // 2000
        // avg 4000/3, max 2000 -> 2/3.
        let c = fp.get("b1").unwrap().conviction();
        assert!((c - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_is_capped_in_features() {
        let mut fp = Fingerprinter::new();
        for i in 0..10 {
            fp.observe(
                &trade("b1", TradeSide::Buy, 1.0, 100.0, 10.0, (i + 1) * 1_000),
                0.0,
            );
        }
        let f = fp.get("b1").unwrap();
        assert!(f.profit_factor().is_infinite());
        assert!((f.feature_vector()[1] - PROFIT_FACTOR_CAP).abs() < 1e-12);
    }

    #[test]
    fn feature_vectors_filter_by_min_trades() {
        let mut fp = Fingerprinter::new();
        for i in 0..5 {
            fp.observe(
                &trade("active", TradeSide::Buy, 1.0, 100.0, 1.0, (i + 1) * 1_000),
                0.0,
            );
        }
        fp.observe(&trade("sleepy", TradeSide::Buy, 1.0, 100.0, 1.0, 1_000), 0.0);

        let rows = fp.feature_vectors(5);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "active");
    }

    #[test]
    fn preferred_hours_pick_active_band() {
        let mut fp = Fingerprinter::new();
        // 13:00 UTC: three trades; 02:00 UTC: one.
        let h13 = 13 * 3_600_000;
        let h02 = 2 * 3_600_000;
        for (i, base) in [h13, h13, h13, h02].iter().enumerate() {
            fp.observe(
                &trade("b1", TradeSide::Buy, 1.0, 100.0, 0.0, base + i as i64),
                0.0,
            );
        }
        let hours = fp.get("b1").unwrap().preferred_hours();
        assert!(hours.contains(&13));
        assert!(!hours.contains(&2));
    }

    #[test]
    fn pearson_basics() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[6.0, 4.0, 2.0]) + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&[1.0], &[1.0]), 0.0);
        assert_eq!(pearson(&[1.0, 1.0], &[2.0, 3.0]), 0.0);
    }
}
