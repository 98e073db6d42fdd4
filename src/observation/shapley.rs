// =============================================================================
// Shapley Attributor — factor decomposition of bot P&L
// =============================================================================
//
// Five factors score every trade context in [-1, 1]: signal quality,
// timing, sizing, exit quality, regime alignment. Per bot, the factor
// averages are rescaled so the five contributions sum to the bot's
// realized P&L.
//
// This is the average-marginal approximation to permutation Shapley.
// Exact enumeration over five factors is 120 permutations per trade and
// tractable if ever needed; the approximation ranks bots identically in
// practice.
// =============================================================================

use std::collections::HashMap;

use serde::Serialize;

use crate::indicators::MacdCross;
use crate::types::{MarketRegime, TradeSide};

/// Assumed bot equity; sizing is scored against this scale.
const EQUITY: f64 = 5_000.0;
/// Center of the sizing reward.
const MODERATE_SIZE: f64 = 750.0;
/// Patience cap for the timing factor.
const PATIENCE_CAP_MS: f64 = 60_000.0;

/// Everything a trade's factor scores depend on, captured at observation
/// time.
#[derive(Debug, Clone)]
pub struct TradeContext {
    pub bot_id: String,
    pub side: TradeSide,
    pub pnl: f64,
    /// quantity × price.
    pub notional: f64,
    /// Milliseconds since the bot's previous trade; `None` on the first.
    pub time_since_prev_ms: Option<i64>,
    pub rsi: f64,
    pub rsi_slope: f64,
    pub percent_b: f64,
    pub macd_cross: MacdCross,
    pub volatility_rank: f64,
    pub regime: MarketRegime,
}

/// Factor contributions, normalized to sum to the bot's realized P&L.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FactorBreakdown {
    pub signal_quality: f64,
    pub timing: f64,
    pub sizing: f64,
    pub exit_quality: f64,
    pub regime_alignment: f64,
}

impl FactorBreakdown {
    pub fn sum(&self) -> f64 {
        self.signal_quality + self.timing + self.sizing + self.exit_quality + self.regime_alignment
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShapleyAttribution {
    pub bot_id: String,
    pub trade_count: u64,
    pub total_pnl: f64,
    pub factors: FactorBreakdown,
    /// Total P&L against the peer average.
    pub marginal_vs_baseline: f64,
    /// 1 = best total P&L among peers.
    pub rank: usize,
}

// =============================================================================
// Factor scoring
// =============================================================================

fn sign(pnl: f64) -> f64 {
    if pnl > 0.0 {
        1.0
    } else if pnl < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn clamp(score: f64) -> f64 {
    score.clamp(-1.0, 1.0)
}

/// Did the indicator state agree with the side taken?
fn score_signal(ctx: &TradeContext) -> f64 {
    let mut score = 0.0;
    match ctx.side {
        TradeSide::Buy => {
            if ctx.rsi < 35.0 {
                score += 0.3;
            }
            if ctx.rsi > 70.0 {
                score -= 0.2;
            }
            if ctx.macd_cross == MacdCross::Bullish {
                score += 0.3;
            }
            if ctx.percent_b < 0.1 {
                score += 0.2;
            }
        }
        TradeSide::Sell => {
            if ctx.rsi > 65.0 {
                score += 0.3;
            }
            if ctx.rsi < 30.0 {
                score -= 0.2;
            }
            if ctx.macd_cross == MacdCross::Bearish {
                score += 0.3;
            }
            if ctx.percent_b > 0.9 {
                score += 0.2;
            }
        }
    }
    clamp(score) * sign(ctx.pnl)
}

/// Patience, volatility-band correctness, RSI-slope agreement.
fn score_timing(ctx: &TradeContext) -> f64 {
    let patience = ctx
        .time_since_prev_ms
        .map(|ms| (ms as f64).min(PATIENCE_CAP_MS) / PATIENCE_CAP_MS * 0.4)
        .unwrap_or(0.2);

    let band = if (0.2..=0.8).contains(&ctx.volatility_rank) {
        0.3
    } else {
        -0.1
    };

    let slope_agrees = match ctx.side {
        TradeSide::Buy => ctx.rsi_slope > 0.0,
        TradeSide::Sell => ctx.rsi_slope < 0.0,
    };
    let slope = if slope_agrees { 0.3 } else { 0.0 };

    clamp(patience + band + slope) * sign(ctx.pnl)
}

/// Gaussian reward centered on a moderate size; extreme sizes flat -0.2.
fn score_sizing(ctx: &TradeContext) -> f64 {
    if ctx.notional > EQUITY * 0.5 || ctx.notional < EQUITY * 0.01 {
        return -0.2;
    }
    let z = (ctx.notional - MODERATE_SIZE) / 400.0;
    let reward = (-z * z).exp();
    let scale = if ctx.pnl > 0.0 { 0.5 } else { -0.3 };
    clamp(reward * scale)
}

/// Sell-side exits only: overbought exits score, exits against a bullish
/// cross pay.
fn score_exit(ctx: &TradeContext) -> f64 {
    if ctx.side != TradeSide::Sell {
        return 0.0;
    }
    let mut score = 0.0;
    if ctx.rsi > 65.0 && ctx.percent_b > 0.85 {
        score += 0.5;
    }
    if ctx.macd_cross == MacdCross::Bullish {
        score -= 0.3;
    }
    clamp(score) * sign(ctx.pnl)
}

/// Side vs regime.
fn score_regime(ctx: &TradeContext) -> f64 {
    let raw = match (ctx.side, ctx.regime) {
        (TradeSide::Buy, MarketRegime::TrendingUp) => 0.5,
        (TradeSide::Sell, MarketRegime::TrendingDown) => 0.5,
        (TradeSide::Buy, MarketRegime::TrendingDown) => -0.3,
        (TradeSide::Sell, MarketRegime::TrendingUp) => -0.3,
        (_, MarketRegime::Ranging) => 0.1,
        (_, MarketRegime::Volatile) => -0.1,
        (_, MarketRegime::Quiet) => 0.0,
    };
    clamp(raw) * sign(ctx.pnl)
}

// =============================================================================
// Attributor
// =============================================================================

#[derive(Debug, Default, Clone)]
struct BotLedger {
    trade_count: u64,
    total_pnl: f64,
    signal_sum: f64,
    timing_sum: f64,
    sizing_sum: f64,
    exit_sum: f64,
    regime_sum: f64,
}

/// Accumulates trade contexts and produces the per-bot attribution table.
#[derive(Default)]
pub struct ShapleyAttributor {
    ledgers: HashMap<String, BotLedger>,
}

impl ShapleyAttributor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ctx: &TradeContext) {
        let ledger = self.ledgers.entry(ctx.bot_id.clone()).or_default();
        ledger.trade_count += 1;
        ledger.total_pnl += ctx.pnl;
        ledger.signal_sum += score_signal(ctx);
        ledger.timing_sum += score_timing(ctx);
        ledger.sizing_sum += score_sizing(ctx);
        ledger.exit_sum += score_exit(ctx);
        ledger.regime_sum += score_regime(ctx);
    }

    pub fn bot_count(&self) -> usize {
        self.ledgers.len()
    }

    /// The attribution table, ranked by total P&L descending. For every
    /// bot, the factor contributions sum to its realized total P&L.
    pub fn attributions(&self) -> Vec<ShapleyAttribution> {
        let n = self.ledgers.len();
        if n == 0 {
            return Vec::new();
        }

        let peer_mean: f64 =
            self.ledgers.values().map(|l| l.total_pnl).sum::<f64>() / n as f64;

        let mut rows: Vec<ShapleyAttribution> = self
            .ledgers
            .iter()
            .map(|(bot_id, ledger)| {
                let count = ledger.trade_count.max(1) as f64;
                let averages = [
                    ledger.signal_sum / count,
                    ledger.timing_sum / count,
                    ledger.sizing_sum / count,
                    ledger.exit_sum / count,
                    ledger.regime_sum / count,
                ];

                let factors = normalize_to_pnl(&averages, ledger.total_pnl);

                ShapleyAttribution {
                    bot_id: bot_id.clone(),
                    trade_count: ledger.trade_count,
                    total_pnl: ledger.total_pnl,
                    factors,
                    marginal_vs_baseline: ledger.total_pnl - peer_mean,
                    rank: 0,
                }
            })
            .collect();

        rows.sort_by(|a, b| {
            b.total_pnl
                .partial_cmp(&a.total_pnl)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.bot_id.cmp(&b.bot_id))
        });
        for (i, row) in rows.iter_mut().enumerate() {
            row.rank = i + 1;
        }
        rows
    }

    /// Top `n` bots by total P&L.
    pub fn top(&self, n: usize) -> Vec<ShapleyAttribution> {
        self.attributions().into_iter().take(n).collect()
    }
}

/// Rescale factor averages so their sum equals `total_pnl`. A vanishing
/// average sum splits the P&L evenly instead of exploding the scale.
fn normalize_to_pnl(averages: &[f64; 5], total_pnl: f64) -> FactorBreakdown {
    let sum: f64 = averages.iter().sum();
    let values: [f64; 5] = if sum.abs() < 1e-9 {
        [total_pnl / 5.0; 5]
    } else {
        let scale = total_pnl / sum;
        [
            averages[0] * scale,
            averages[1] * scale,
            averages[2] * scale,
            averages[3] * scale,
            averages[4] * scale,
        ]
    };

    FactorBreakdown {
        signal_quality: values[0],
        timing: values[1],
        sizing: values[2],
        exit_quality: values[3],
        regime_alignment: values[4],
    }
}

// =============================================================================
// Tests
// =============================================================================
