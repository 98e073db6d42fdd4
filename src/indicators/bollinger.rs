// =============================================================================
// Bollinger Bands — SMA(20) ± k·σ with width and %B
// =============================================================================
//
// width   = (upper - lower) / middle      (normalised band spread)
// percent_b = (price - lower) / (upper - lower)
//
// %B below 0.25 reads as the lower zone, above 0.75 as the upper zone —
// the bucket edges pattern discovery keys on.
// =============================================================================

/// Bands evaluated against a reference price.
#[derive(Debug, Clone, Copy)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    /// (upper - lower) / middle.
    pub width: f64,
    /// Position of `price` inside the bands; 0 at lower, 1 at upper. Can
    /// exceed [0, 1] when price escapes the bands.
    pub percent_b: f64,
}

/// Compute bands over the trailing `period` closes, evaluating %B at
/// `price`. `None` when data is short or the middle band is degenerate.
pub fn bollinger(closes: &[f64], period: usize, k: f64, price: f64) -> Option<BollingerBands> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    if middle == 0.0 {
        return None;
    }

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let sigma = variance.sqrt();

    let upper = middle + k * sigma;
    let lower = middle - k * sigma;
    let band = upper - lower;

    Some(BollingerBands {
        upper,
        middle,
        lower,
        width: band / middle,
        // A flat window has zero band; park %B in the middle.
        percent_b: if band > 0.0 { (price - lower) / band } else { 0.5 },
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_series_collapses_bands() {
        let closes = vec![100.0; 25];
        let bb = bollinger(&closes, 20, 2.0, 100.0).unwrap();
        assert!((bb.upper - 100.0).abs() < 1e-12);
        assert!((bb.lower - 100.0).abs() < 1e-12);
        assert!(bb.width.abs() < 1e-12);
        assert!((bb.percent_b - 0.5).abs() < 1e-12);
    }

    #[test]
    fn bands_are_symmetric_around_sma() {
        let closes: Vec<f64> = (1..=20).map(|x| 100.0 + (x % 5) as f64).collect();
        let bb = bollinger(&closes, 20, 2.0, 102.0).unwrap();
        assert!((bb.upper - bb.middle - (bb.middle - bb.lower)).abs() < 1e-9);
        assert!(bb.upper > bb.middle && bb.middle > bb.lower);
    }

    #[test]
    fn percent_b_at_band_edges() {
        let closes: Vec<f64> = (1..=20).map(|x| 100.0 + (x % 7) as f64).collect();
        let bb = bollinger(&closes, 20, 2.0, 0.0).unwrap();

        let at_lower = bollinger(&closes, 20, 2.0, bb.lower).unwrap();
        assert!(at_lower.percent_b.abs() < 1e-9);

        let at_upper = bollinger(&closes, 20, 2.0, bb.upper).unwrap();
        assert!((at_upper.percent_b - 1.0).abs() < 1e-9);

        let mid = bollinger(&closes, 20, 2.0, bb.middle).unwrap();
        assert!((mid.percent_b - 0.5).abs() < 1e-9);
    }

    #[test]
    fn insufficient_data_yields_none() {
        assert!(bollinger(&[1.0; 19], 20, 2.0, 1.0).is_none());
        assert!(bollinger(&[1.0; 25], 0, 2.0, 1.0).is_none());
    }

    #[test]
    fn width_scales_with_dispersion() {
        let calm: Vec<f64> = (0..20).map(|x| 100.0 + (x % 2) as f64 * 0.1).collect();
        let wild: Vec<f64> = (0..20).map(|x| 100.0 + (x % 2) as f64 * 10.0).collect();
        let narrow = bollinger(&calm, 20, 2.0, 100.0).unwrap();
        let wide = bollinger(&wild, 20, 2.0, 100.0).unwrap();
        assert!(wide.width > narrow.width * 10.0);
    }
}
