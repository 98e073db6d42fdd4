// =============================================================================
// Relative Strength Index — Wilder's smoothing
// =============================================================================
//
// avg_gain and avg_loss seed with the SMA of the first `period` deltas and
// then smooth as:
//   avg = (prev_avg * (period - 1) + current) / period
// RSI = 100 - 100 / (1 + avg_gain / avg_loss).
//
// Needs `period + 1` closes for the first value. All-gain series clamp to
// 100, all-loss to 0, a flat series reads 50.
// =============================================================================

/// Full RSI series; one value per close starting at index `period`.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    let mut out = Vec::with_capacity(closes.len() - period);

    for (i, pair) in closes.windows(2).enumerate() {
        let delta = pair[1] - pair[0];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };

        if i < period {
            // Seeding phase: plain accumulation.
            avg_gain += gain / period_f;
            avg_loss += loss / period_f;
            if i + 1 < period {
                continue;
            }
        } else {
            avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
            avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
        }

        out.push(rsi_value(avg_gain, avg_loss));
    }
    out
}

/// Most recent RSI value, if there is enough data.
pub fn latest_rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

// =============================================================================
// Tests
// =============================================================================
