// =============================================================================
// Observation pipeline — from raw arena events to behavioral analytics
// =============================================================================
//
// The orchestrator dedups and sequences incoming trades, then fans each one
// out to the ring buffer, the fingerprinter, the indicator engine, pattern
// discovery and the Shapley attributor. Clustering runs on its own slower
// cadence over the fingerprint feature vectors.
// =============================================================================

pub mod cluster;
pub mod fingerprint;
pub mod orchestrator;
pub mod patterns;
pub mod ring_buffer;
pub mod shapley;

use serde::Serialize;

use crate::indicators::IndicatorState;
use crate::types::{MarketRegime, TradeEvent};

/// A trade joined with the indicator state and regime at observation time.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedTrade {
    pub trade: TradeEvent,
    pub indicators: IndicatorState,
    pub regime: MarketRegime,
}
