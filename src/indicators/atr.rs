// =============================================================================
// Average True Range — Wilder-smoothed, plus volatility rank
// =============================================================================
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR seeds with the SMA of the first `period` TR values, then smooths:
//   ATR_t = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// The volatility rank is the percentile of the current ATR inside its own
// history — the regime classifier's volatility axis.
// =============================================================================

use crate::types::Candle;

/// Most recent ATR. Needs `period + 1` candles (each TR needs a previous
/// close).
pub fn latest_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let mut trs = candles
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close));

    let mut atr = 0.0;
    for _ in 0..period {
        atr += trs.next()? / period as f64;
    }

    let period_f = period as f64;
    for tr in trs {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
    }

    atr.is_finite().then_some(atr)
}

fn true_range(bar: &Candle, prev_close: f64) -> f64 {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Percentile rank of `value` within `history`, in [0, 1]. An empty
/// history ranks 0.5 — no evidence either way.
pub fn percentile_rank(history: &[f64], value: f64) -> f64 {
    if history.is_empty() {
        return 0.5;
    }
    let below = history.iter().filter(|&&h| h < value).count();
    below as f64 / history.len() as f64
}

// =============================================================================
// Tests
// =============================================================================
