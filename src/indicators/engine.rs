// =============================================================================
// Indicator Engine — per-symbol candle assembly and state snapshots
// =============================================================================
//
// A tick at price p and time t folds into the candle bucket
// floor(t / interval) * interval; when t crosses into the next bucket the
// previous candle seals into the rolling window and every indicator
// recomputes from the window. Re-sealing the same bucket is a no-op, so
// replaying a closed candle cannot skew the state.
//
// The rolling window keeps 200 closes (the indicators need at most 50-ish;
// the slack is ATR-rank history).
// =============================================================================

use std::collections::VecDeque;

use serde::Serialize;

use crate::indicators::atr::{latest_atr, percentile_rank};
use crate::indicators::bollinger::bollinger;
use crate::indicators::ema::{latest_ema, sma};
use crate::indicators::macd::{macd_standard, MacdCross};
use crate::indicators::rsi::latest_rsi;
use crate::types::{Candle, MarketRegime};

/// Default candle interval for tick assembly.
pub const DEFAULT_INTERVAL_MS: i64 = 60_000;

/// Rolling window length.
const WINDOW: usize = 200;
/// ATR history retained for the volatility rank.
const ATR_HISTORY: usize = 500;
/// Bars required before a state is published. Covers the MACD signal line
/// (26 + 9) with one spare for crossover detection.
const WARMUP_BARS: usize = 36;

/// Immutable indicator snapshot for one symbol at one bar.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorState {
    pub symbol: String,
    pub last_close: f64,
    /// Unix seconds of the most recent sealed bar.
    pub bar_time: i64,

    pub sma20: f64,
    pub sma50: f64,
    pub ema12: f64,
    pub ema26: f64,

    pub rsi14: f64,
    /// rsi14 minus the previous bar's rsi14.
    pub rsi_slope: f64,

    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub macd_crossover: MacdCross,

    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
    pub bb_percent_b: f64,

    pub atr14: f64,
    /// Percentile of atr14 within this symbol's ATR history, [0, 1].
    pub volatility_rank: f64,
}

pub struct IndicatorEngine {
    symbol: String,
    interval_ms: i64,
    closes: VecDeque<f64>,
    candles: VecDeque<Candle>,
    atr_history: VecDeque<f64>,
    /// Bucket being assembled from ticks.
    forming: Option<Candle>,
    /// Time of the most recently sealed bar; duplicate seals are ignored.
    last_sealed: Option<i64>,
}

impl IndicatorEngine {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self::with_interval(symbol, DEFAULT_INTERVAL_MS)
    }

    pub fn with_interval(symbol: impl Into<String>, interval_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            interval_ms,
            closes: VecDeque::with_capacity(WINDOW + 1),
            candles: VecDeque::with_capacity(WINDOW + 1),
            atr_history: VecDeque::with_capacity(ATR_HISTORY + 1),
            forming: None,
            last_sealed: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bar_count(&self) -> usize {
        self.candles.len()
    }

    /// Fold one tick into the forming candle, sealing the previous bucket
    /// when the tick crosses a boundary.
    pub fn on_tick(&mut self, price: f64, timestamp_ms: i64) {
        if price <= 0.0 {
            return;
        }
        let bucket_secs = (timestamp_ms - timestamp_ms.rem_euclid(self.interval_ms)) / 1000;

        // Crossing into a new bucket seals the previous candle first.
        if matches!(&self.forming, Some(c) if c.time != bucket_secs) {
            let sealed = self.forming.take().expect("checked above");
            self.seal(sealed);
        }

        match &mut self.forming {
            Some(candle) => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
                candle.close = price;
            }
            None => {
                self.forming = Some(Candle::new(bucket_secs, price, price, price, price, 0.0));
            }
        }
    }

    /// Ingest an already-closed bar (REST backfill path). Idempotent per
    /// bar time.
    pub fn on_closed_candle(&mut self, candle: Candle) {
        if candle.is_valid() {
            self.seal(candle);
        }
    }

    fn seal(&mut self, candle: Candle) {
        if self.last_sealed == Some(candle.time) {
            return;
        }
        self.last_sealed = Some(candle.time);

        self.closes.push_back(candle.close);
        self.candles.push_back(candle);
        while self.closes.len() > WINDOW {
            self.closes.pop_front();
        }
        while self.candles.len() > WINDOW {
            self.candles.pop_front();
        }

        let candles: Vec<Candle> = self.candles.iter().copied().collect();
        if let Some(atr) = latest_atr(&candles, 14) {
            self.atr_history.push_back(atr);
            while self.atr_history.len() > ATR_HISTORY {
                self.atr_history.pop_front();
            }
        }
    }

    fn closes_slice(&self) -> Vec<f64> {
        self.closes.iter().copied().collect()
    }

    /// Current snapshot; `None` until the warmup window has filled.
    pub fn state(&self) -> Option<IndicatorState> {
        if self.candles.len() < WARMUP_BARS {
            return None;
        }

        let closes = self.closes_slice();
        let candles: Vec<Candle> = self.candles.iter().copied().collect();
        let last_close = *closes.last()?;
        let bar_time = self.candles.back()?.time;

        // One-bar RSI slope: compare against the series excluding the
        // latest close.
        let rsi14 = latest_rsi(&closes, 14)?;
        let prev_rsi = latest_rsi(&closes[..closes.len() - 1], 14).unwrap_or(rsi14);

        let macd_out = macd_standard(&closes)?;
        let bands = bollinger(&closes, 20, 2.0, last_close)?;
        let atr14 = latest_atr(&candles, 14)?;
        let history: Vec<f64> = self.atr_history.iter().copied().collect();

        Some(IndicatorState {
            symbol: self.symbol.clone(),
            last_close,
            bar_time,
            sma20: sma(&closes, 20)?,
            sma50: sma(&closes, 50)?,
            ema12: latest_ema(&closes, 12)?,
            ema26: latest_ema(&closes, 26)?,
            rsi14,
            rsi_slope: rsi14 - prev_rsi,
            macd: macd_out.macd,
            macd_signal: macd_out.signal,
            macd_histogram: macd_out.histogram,
            macd_crossover: macd_out.crossover,
            bb_upper: bands.upper,
            bb_middle: bands.middle,
            bb_lower: bands.lower,
            bb_width: bands.width,
            bb_percent_b: bands.percent_b,
            atr14,
            volatility_rank: percentile_rank(&history, atr14),
        })
    }
}

// =============================================================================
// Regime classification
// =============================================================================

/// Rule table, evaluated top to bottom:
///
///   1. volatile     — ATR rank >= 0.8 and wide bands
///   2. quiet        — ATR rank <= 0.2 and narrow bands
///   3. trending_up  — sma20 > sma50, positive histogram, RSI > 55
///   4. trending_down— sma20 < sma50, negative histogram, RSI < 45
///   5. ranging      — everything else
pub fn classify_regime(state: &IndicatorState) -> MarketRegime {
    let wide = state.bb_width >= 0.04;
    let narrow = state.bb_width <= 0.012;

    if state.volatility_rank >= 0.8 && wide {
        MarketRegime::Volatile
    } else if state.volatility_rank <= 0.2 && narrow {
        MarketRegime::Quiet
    } else if state.sma20 > state.sma50 && state.macd_histogram > 0.0 && state.rsi14 > 55.0 {
        MarketRegime::TrendingUp
    } else if state.sma20 < state.sma50 && state.macd_histogram < 0.0 && state.rsi14 < 45.0 {
        MarketRegime::TrendingDown
    } else {
        MarketRegime::Ranging
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_bars(engine: &mut IndicatorEngine, closes: &[f64], start_secs: i64) {
        for (i, &c) in closes.iter().enumerate() {
            engine.on_closed_candle(Candle::new(
                start_secs + (i as i64) * 60,
                c,
                c + 0.5,
                c - 0.5,
                c,
                10.0,
            ));
        }
    }

    #[test]
    fn tick_assembly_buckets_by_interval() {
        let mut engine = IndicatorEngine::new("NVDA");
        // Three ticks inside minute 0, one in minute 1.
        engine.on_tick(100.0, 10_000);
        engine.on_tick(101.5, 30_000);
        engine.on_tick(99.5, 50_000);
        assert_eq!(engine.bar_count(), 0, "first bucket still forming");

        engine.on_tick(100.5, 61_000);
        assert_eq!(engine.bar_count(), 1, "crossing the boundary seals minute 0");

        let sealed = engine.candles.back().unwrap();
        assert_eq!(sealed.time, 0);
        assert!((sealed.open - 100.0).abs() < 1e-12);
        assert!((sealed.high - 101.5).abs() < 1e-12);
        assert!((sealed.low - 99.5).abs() < 1e-12);
        assert!((sealed.close - 99.5).abs() < 1e-12);
    }

    #[test]
    fn non_positive_ticks_are_ignored() {
        let mut engine = IndicatorEngine::new("NVDA");
        engine.on_tick(0.0, 10_000);
        engine.on_tick(-5.0, 20_000);
        assert!(engine.forming.is_none());
    }

    #[test]
    fn state_appears_after_warmup() {
        let mut engine = IndicatorEngine::new("NVDA");
        let closes: Vec<f64> = (0..WARMUP_BARS - 1).map(|x| 100.0 + x as f64 * 0.1).collect();
        feed_bars(&mut engine, &closes, 0);
        assert!(engine.state().is_none());

        engine.on_closed_candle(Candle::new(
            (WARMUP_BARS as i64 - 1) * 60,
            104.0,
            104.5,
            103.5,
            104.0,
            10.0,
        ));
        let state = engine.state().expect("warm after enough bars");
        assert!((state.last_close - 104.0).abs() < 1e-12);
        assert!(state.rsi14 > 50.0, "rising closes should read bullish RSI");
    }

    #[test]
    fn resealing_the_same_candle_is_idempotent() {
        let mut a = IndicatorEngine::new("NVDA");
        let mut b = IndicatorEngine::new("NVDA");
        let closes: Vec<f64> = (0..50).map(|x| 100.0 + (x as f64 * 0.7).sin()).collect();
        feed_bars(&mut a, &closes, 0);
        feed_bars(&mut b, &closes, 0);

        // Feed the final bar a second time into `a` only.
        let last = *a.candles.back().unwrap();
        a.on_closed_candle(last);

        assert_eq!(a.bar_count(), b.bar_count());
        let sa = a.state().unwrap();
        let sb = b.state().unwrap();
        assert!((sa.rsi14 - sb.rsi14).abs() < 1e-12);
        assert!((sa.macd - sb.macd).abs() < 1e-12);
        assert!((sa.atr14 - sb.atr14).abs() < 1e-12);
        assert!((sa.bb_percent_b - sb.bb_percent_b).abs() < 1e-12);
    }

    #[test]
    fn window_is_bounded() {
        let mut engine = IndicatorEngine::new("NVDA");
        let closes: Vec<f64> = (0..400).map(|x| 100.0 + (x % 9) as f64).collect();
        feed_bars(&mut engine, &closes, 0);
        assert_eq!(engine.bar_count(), WINDOW);
        assert_eq!(engine.closes.len(), WINDOW);
    }

    // ---- regime classification -------------------------------------------

    fn base_state() -> IndicatorState {
        IndicatorState {
            symbol: "NVDA".into(),
            last_close: 100.0,
            bar_time: 0,
            sma20: 100.0,
            sma50: 100.0,
            ema12: 100.0,
            ema26: 100.0,
            rsi14: 50.0,
            rsi_slope: 0.0,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            macd_crossover: MacdCross::None,
            bb_upper: 101.0,
            bb_middle: 100.0,
            bb_lower: 99.0,
            bb_width: 0.02,
            bb_percent_b: 0.5,
            atr14: 1.0,
            volatility_rank: 0.5,
        }
    }

    #[test]
    fn regime_rules_fire_in_order() {
        let mut s = base_state();
        s.volatility_rank = 0.9;
        s.bb_width = 0.06;
        assert_eq!(classify_regime(&s), MarketRegime::Volatile);

        let mut s = base_state();
        s.volatility_rank = 0.1;
        s.bb_width = 0.008;
        assert_eq!(classify_regime(&s), MarketRegime::Quiet);

        let mut s = base_state();
        s.sma20 = 101.0;
        s.sma50 = 99.0;
        s.macd_histogram = 0.4;
        s.rsi14 = 62.0;
        assert_eq!(classify_regime(&s), MarketRegime::TrendingUp);

        let mut s = base_state();
        s.sma20 = 99.0;
        s.sma50 = 101.0;
        s.macd_histogram = -0.4;
        s.rsi14 = 38.0;
        assert_eq!(classify_regime(&s), MarketRegime::TrendingDown);

        assert_eq!(classify_regime(&base_state()), MarketRegime::Ranging);
    }

    #[test]
    fn volatile_needs_both_rank_and_width() {
        let mut s = base_state();
        s.volatility_rank = 0.95;
        s.bb_width = 0.02; // bands not wide
        assert_ne!(classify_regime(&s), MarketRegime::Volatile);
    }
}
