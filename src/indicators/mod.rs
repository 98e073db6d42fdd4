// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free series arithmetic in the leaf modules; `engine`
// folds ticks into candles and maintains the per-symbol `IndicatorState`
// snapshot plus the regime classification.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod macd;
pub mod rsi;

pub use engine::{classify_regime, IndicatorEngine, IndicatorState};
pub use macd::MacdCross;
