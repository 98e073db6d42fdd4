// =============================================================================
// MACD(12, 26, 9) — convergence/divergence with crossover detection
// =============================================================================
//
// macd      = EMA(fast) - EMA(slow)
// signal    = EMA(macd, signal_period)
// histogram = macd - signal
//
// The crossover is read off the sign of (macd - signal) between the last
// two bars: a flip from negative to positive is bullish, the reverse is
// bearish.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::ema::ema_series;

/// Signal-line crossover state on the most recent bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacdCross {
    Bullish,
    Bearish,
    None,
}

impl std::fmt::Display for MacdCross {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MacdOutput {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
    pub crossover: MacdCross,
}

/// Evaluate MACD over `closes`. Needs `slow + signal_period - 1` closes for
/// the first signal value, one more for crossover detection.
pub fn macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<MacdOutput> {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return None;
    }

    let fast_series = ema_series(closes, fast);
    let slow_series = ema_series(closes, slow);
    if slow_series.is_empty() {
        return None;
    }

    // Align the tails: the slow series starts `slow - fast` entries later.
    let offset = slow - fast;
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let macd_now = *macd_line.last()?;

    let crossover = if signal_series.len() >= 2 && macd_line.len() >= 2 {
        let prev_diff = macd_line[macd_line.len() - 2] - signal_series[signal_series.len() - 2];
        let diff = macd_now - signal;
        match (prev_diff <= 0.0, diff > 0.0) {
            (true, true) => MacdCross::Bullish,
            (false, false) if prev_diff > 0.0 && diff <= 0.0 => MacdCross::Bearish,
            _ => MacdCross::None,
        }
    } else {
        MacdCross::None
    };

    Some(MacdOutput {
        macd: macd_now,
        signal,
        histogram: macd_now - signal,
        crossover,
    })
}

/// Standard 12/26/9 configuration.
pub fn macd_standard(closes: &[f64]) -> Option<MacdOutput> {
    macd(closes, 12, 26, 9)
}

// =============================================================================
// Tests
// =============================================================================
