// =============================================================================
// Pattern Discovery — bucketed repeating-setup profitability analysis
// =============================================================================
//
// Every enriched trade drops into the bucket keyed by
// (regime, RSI bucket, MACD crossover, Bollinger zone, side). A bucket
// becomes a discovered pattern once it holds at least 5 samples with a win
// rate of 0.55 or better. Patterns rank by confidence × profitability;
// the high-confidence subset additionally demands confidence above 0.7 and
// positive average P&L.
// =============================================================================

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::indicators::MacdCross;
use crate::observation::EnrichedTrade;
use crate::types::{MarketRegime, TradeSide};

/// Minimum samples before a bucket can emerge as a pattern.
const MIN_SAMPLES: u64 = 5;
/// Minimum win rate for emergence.
const MIN_CONFIDENCE: f64 = 0.55;
/// High-confidence filter threshold.
const HIGH_CONFIDENCE: f64 = 0.7;

// =============================================================================
// Bucket key
// =============================================================================

/// RSI band edges: 0-30, 30-45, 45-55, 55-70, 70-100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiBucket {
    Oversold,
    Weak,
    Neutral,
    Strong,
    Overbought,
}

impl RsiBucket {
    pub fn from_value(rsi: f64) -> Self {
        match rsi {
            r if r < 30.0 => Self::Oversold,
            r if r < 45.0 => Self::Weak,
            r if r < 55.0 => Self::Neutral,
            r if r < 70.0 => Self::Strong,
            _ => Self::Overbought,
        }
    }
}

/// %B zones: lower below 0.25, upper above 0.75.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BbZone {
    Lower,
    Middle,
    Upper,
}

impl BbZone {
    pub fn from_percent_b(percent_b: f64) -> Self {
        if percent_b < 0.25 {
            Self::Lower
        } else if percent_b > 0.75 {
            Self::Upper
        } else {
            Self::Middle
        }
    }
}

/// The classification key of a trade setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PatternKey {
    pub regime: MarketRegime,
    pub rsi_bucket: RsiBucket,
    pub macd_cross: MacdCross,
    pub bb_zone: BbZone,
    pub side: TradeSide,
}

impl PatternKey {
    pub fn from_trade(trade: &EnrichedTrade) -> Self {
        Self {
            regime: trade.regime,
            rsi_bucket: RsiBucket::from_value(trade.indicators.rsi14),
            macd_cross: trade.indicators.macd_crossover,
            bb_zone: BbZone::from_percent_b(trade.indicators.bb_percent_b),
            side: trade.trade.side,
        }
    }
}

// =============================================================================
// Buckets and discovered patterns
// =============================================================================

#[derive(Debug, Default, Clone)]
struct PatternBucket {
    samples: u64,
    wins: u64,
    pnl_sum: f64,
    first_ts: i64,
    last_ts: i64,
    bots: HashSet<String>,
}

/// A bucket that cleared the emergence thresholds.
#[derive(Debug, Clone, Serialize)]
pub struct TradePattern {
    pub key: PatternKey,
    pub sample_count: u64,
    /// Mean P&L per trade in the bucket.
    pub profitability: f64,
    /// Win rate.
    pub confidence: f64,
    /// Trades per hour, from the span between first and last sample.
    pub frequency_per_hour: f64,
    pub contributing_bots: Vec<String>,
}

/// Accumulates buckets and surfaces the discovered patterns.
#[derive(Default)]
pub struct PatternBook {
    buckets: HashMap<PatternKey, PatternBucket>,
    observed: u64,
}

impl PatternBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, trade: &EnrichedTrade) {
        let key = PatternKey::from_trade(trade);
        let ts = trade.trade.timestamp;

        let bucket = self.buckets.entry(key).or_insert_with(|| PatternBucket {
            first_ts: ts,
            last_ts: ts,
            ..Default::default()
        });

        bucket.samples += 1;
        if trade.trade.pnl > 0.0 {
            bucket.wins += 1;
        }
        bucket.pnl_sum += trade.trade.pnl;
        bucket.first_ts = bucket.first_ts.min(ts);
        bucket.last_ts = bucket.last_ts.max(ts);
        bucket.bots.insert(trade.trade.bot_id.clone());
        self.observed += 1;
    }

    pub fn observed_count(&self) -> u64 {
        self.observed
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Buckets that cleared emergence, ranked by confidence × profitability
    /// descending.
    pub fn discovered(&self) -> Vec<TradePattern> {
        let mut patterns: Vec<TradePattern> = self
            .buckets
            .iter()
            .filter(|(_, b)| b.samples >= MIN_SAMPLES)
            .filter_map(|(key, b)| {
                let confidence = b.wins as f64 / b.samples as f64;
                if confidence < MIN_CONFIDENCE {
                    return None;
                }

                let span_hours = (b.last_ts - b.first_ts) as f64 / 3_600_000.0;
                let frequency_per_hour = if span_hours > 0.0 {
                    b.samples as f64 / span_hours
                } else {
                    b.samples as f64
                };

                let mut bots: Vec<String> = b.bots.iter().cloned().collect();
                bots.sort();

                Some(TradePattern {
                    key: *key,
                    sample_count: b.samples,
                    profitability: b.pnl_sum / b.samples as f64,
                    confidence,
                    frequency_per_hour,
                    contributing_bots: bots,
                })
            })
            .collect();

        patterns.sort_by(|a, b| {
            let score_a = a.confidence * a.profitability;
            let score_b = b.confidence * b.profitability;
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        patterns
    }

    /// Discovered patterns with confidence above 0.7 and positive average
    /// P&L.
    pub fn high_confidence(&self) -> Vec<TradePattern> {
        self.discovered()
            .into_iter()
            .filter(|p| p.confidence > HIGH_CONFIDENCE && p.profitability > 0.0)
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorState;
    use crate::types::{BotGroup, TradeEvent};

    fn enriched(
        bot: &str,
        side: TradeSide,
        pnl: f64,
        rsi: f64,
        percent_b: f64,
        regime: MarketRegime,
        ts: i64,
    ) -> EnrichedTrade {
        EnrichedTrade {
            trade: TradeEvent {
                bot_id: bot.into(),
                bot_name: bot.into(),
                group: BotGroup::Beta,
                symbol: "NVDA".into(),
                side,
                quantity: 10.0,
                price: 100.0,
                pnl,
                reason: "test".into(),
                timestamp: ts,
                observed_at: ts,
                sequence_num: 0,
                latency_ms: 0,
            },
            indicators: IndicatorState {
                symbol: "NVDA".into(),
                last_close: 100.0,
                bar_time: ts / 1000,
                sma20: 100.0,
                sma50: 100.0,
                ema12: 100.0,
                ema26: 100.0,
                rsi14: rsi,
                rsi_slope: 0.0,
                macd: 0.0,
                macd_signal: 0.0,
                macd_histogram: 0.0,
                macd_crossover: MacdCross::None,
                bb_upper: 101.0,
                bb_middle: 100.0,
                bb_lower: 99.0,
                bb_width: 0.02,
                bb_percent_b: percent_b,
                atr14: 1.0,
                volatility_rank: 0.5,
            },
            regime,
        }
    }

    #[test]
    fn rsi_bucket_edges() {
        assert_eq!(RsiBucket::from_value(10.0), RsiBucket::Oversold);
        assert_eq!(RsiBucket::from_value(30.0), RsiBucket::Weak);
        assert_eq!(RsiBucket::from_value(45.0), RsiBucket::Neutral);
        assert_eq!(RsiBucket::from_value(55.0), RsiBucket::Strong);
        assert_eq!(RsiBucket::from_value(70.0), RsiBucket::Overbought);
        assert_eq!(RsiBucket::from_value(100.0), RsiBucket::Overbought);
    }

    #[test]
    fn bb_zone_edges() {
        assert_eq!(BbZone::from_percent_b(0.1), BbZone::Lower);
        assert_eq!(BbZone::from_percent_b(0.25), BbZone::Middle);
        assert_eq!(BbZone::from_percent_b(0.5), BbZone::Middle);
        assert_eq!(BbZone::from_percent_b(0.76), BbZone::Upper);
    }

    #[test]
    fn pattern_emerges_at_five_profitable_samples() {
        let mut book = PatternBook::new();

        for i in 0..4 {
            book.observe(&enriched(
                &format!("b{i}"),
                TradeSide::Buy,
                3.0,
                50.0,
                0.5,
                MarketRegime::Ranging,
                (i as i64 + 1) * 60_000,
            ));
        }
        assert!(book.discovered().is_empty(), "four samples is not enough");

        book.observe(&enriched(
            "b9",
            TradeSide::Buy,
            3.0,
            50.0,
            0.5,
            MarketRegime::Ranging,
            5 * 60_000,
        ));

        let discovered = book.discovered();
        assert_eq!(discovered.len(), 1);
        let p = &discovered[0];
        assert_eq!(p.sample_count, 5);
        assert!((p.confidence - 1.0).abs() < 1e-12);
        assert!((p.profitability - 3.0).abs() < 1e-12);
        assert_eq!(p.key.rsi_bucket, RsiBucket::Neutral);
        assert_eq!(p.key.bb_zone, BbZone::Middle);
        assert_eq!(p.key.macd_cross, MacdCross::None);
        assert_eq!(p.contributing_bots.len(), 5);
    }

    #[test]
    fn low_win_rate_buckets_stay_hidden() {
        let mut book = PatternBook::new();
        // 2 wins out of 6: 0.33 < 0.55.
        for i in 0..6 {
            let pnl = if i < 2 { 5.0 } else { -2.0 };
            book.observe(&enriched(
                "b1",
                TradeSide::Sell,
                pnl,
                62.0,
                0.8,
                MarketRegime::TrendingUp,
                (i + 1) * 60_000,
            ));
        }
        assert!(book.discovered().is_empty());
        assert_eq!(book.bucket_count(), 1);
    }

    #[test]
    fn distinct_keys_do_not_pool() {
        let mut book = PatternBook::new();
        // Same everything but side.
        for i in 0..3 {
            book.observe(&enriched(
                "b1",
                TradeSide::Buy,
                1.0,
                50.0,
                0.5,
                MarketRegime::Ranging,
                (i + 1) * 60_000,
            ));
            book.observe(&enriched(
                "b1",
                TradeSide::Sell,
                1.0,
                50.0,
                0.5,
                MarketRegime::Ranging,
                (i + 1) * 60_000,
            ));
        }
        assert_eq!(book.bucket_count(), 2);
        assert!(book.discovered().is_empty(), "neither side reached 5");
    }

    #[test]
    fn frequency_uses_sample_span() {
        let mut book = PatternBook::new();
        // Five samples across exactly one hour.
        for i in 0..5 {
            book.observe(&enriched(
                "b1",
                TradeSide::Buy,
                2.0,
                50.0,
                0.5,
                MarketRegime::Ranging,
                i * 900_000, // 15-minute spacing: span 3600s
            ));
        }
        let p = &book.discovered()[0];
        assert!((p.frequency_per_hour - 5.0).abs() < 1e-9);
    }

    #[test]
    fn high_confidence_filters_confidence_and_profit() {
        let mut book = PatternBook::new();
        // Bucket A: 5/6 wins, profitable.
        for i in 0..6 {
            let pnl = if i < 5 { 4.0 } else { -1.0 };
            book.observe(&enriched(
                "b1",
                TradeSide::Buy,
                pnl,
                20.0,
                0.1,
                MarketRegime::Ranging,
                (i + 1) * 60_000,
            ));
        }
        // Bucket B: 3/5 wins (0.6) — discovered but not high-confidence.
        for i in 0..5 {
            let pnl = if i < 3 { 2.0 } else { -1.0 };
            book.observe(&enriched(
                "b2",
                TradeSide::Sell,
                pnl,
                80.0,
                0.9,
                MarketRegime::TrendingUp,
                (i + 1) * 60_000,
            ));
        }

        assert_eq!(book.discovered().len(), 2);
        let high = book.high_confidence();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].key.rsi_bucket, RsiBucket::Oversold);
    }

    #[test]
    fn ranking_is_confidence_times_profitability() {
        let mut book = PatternBook::new();
        // Strong bucket: conf 1.0, avg 5.0.
        for i in 0..5 {
            book.observe(&enriched(
                "b1",
                TradeSide::Buy,
                5.0,
                20.0,
                0.1,
                MarketRegime::Ranging,
                (i + 1) * 60_000,
            ));
        }
        // Weaker bucket: conf 0.6, avg 1.0.
        for i in 0..5 {
            let pnl = if i < 3 { 3.0 } else { -2.0 };
            book.observe(&enriched(
                "b2",
                TradeSide::Sell,
                pnl,
                80.0,
                0.9,
                MarketRegime::TrendingUp,
                (i + 1) * 60_000,
            ));
        }

        let discovered = book.discovered();
        assert_eq!(discovered[0].key.rsi_bucket, RsiBucket::Oversold);
    }
}
