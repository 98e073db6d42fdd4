// =============================================================================
// Moving averages — SMA and SMA-seeded EMA
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The first EMA value is seeded with the SMA of the first `period` closes.
// =============================================================================

/// Simple moving average over the trailing `period` values. Falls back to
/// the full-slice mean when fewer than `period` values exist; `None` only
/// on an empty slice or a zero period.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if values.is_empty() || period == 0 {
        return None;
    }
    let window = &values[values.len().saturating_sub(period)..];
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

/// Full EMA series. One output per input from index `period - 1`.
///
/// # Edge cases
/// - `period == 0` => empty vec
/// - `values.len() < period` => empty vec
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);

    let mut prev = seed;
    for &v in &values[period..] {
        prev = v * multiplier + prev * (1.0 - multiplier);
        out.push(prev);
    }
    out
}

/// Most recent EMA value, if computable.
pub fn latest_ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

// =============================================================================
// Tests
// =============================================================================
