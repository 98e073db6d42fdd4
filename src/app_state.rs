// =============================================================================
// Central Application State — Meridian Data Nexus
// =============================================================================
//
// Ties the subsystems together and builds the aggregate status snapshot for
// the observer HTTP surface. Each subsystem owns and mutates its own state;
// AppState only holds the Arcs and read-only views.
//
// Thread safety:
//   - parking_lot::RwLock for the small mutable collections owned here.
//   - Arc wrappers for subsystem engines with their own interior
//     mutability.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::HubConfig;
use crate::hub::{HubStats, MarketDataHub};
use crate::observation::orchestrator::{ObservationHub, ObservationSnapshot};
use crate::provider::{HealthMap, MarketDataProvider};
use crate::rate_limit::TokenBucketSnapshot;
use crate::session::{session_for, SessionInfo};
use crate::stream::{EndpointStatus, StreamManager};
use crate::types::{AssetType, QuoteSource};

/// Maximum number of recent errors retained for the status surface.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub kind: Option<String>,
    /// ISO 8601.
    pub at: String,
}

pub struct AppState {
    pub config: Arc<HubConfig>,
    pub provider: Arc<MarketDataProvider>,
    pub hub: Arc<MarketDataHub>,
    pub observation: Arc<ObservationHub>,
    pub streams: Option<Arc<StreamManager>>,

    recent_errors: RwLock<Vec<ErrorRecord>>,
    start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: Arc<HubConfig>,
        provider: Arc<MarketDataProvider>,
        hub: Arc<MarketDataHub>,
        observation: Arc<ObservationHub>,
        streams: Option<Arc<StreamManager>>,
    ) -> Self {
        Self {
            config,
            provider,
            hub,
            observation,
            streams,
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Record an error for the status surface. Oldest entries are evicted
    /// beyond [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, message: String, kind: Option<String>) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message,
            kind,
            at: Utc::now().to_rfc3339(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    /// The aggregate snapshot behind `GET /api/v1/status`.
    pub fn build_snapshot(&self) -> StatusSnapshot {
        let now = Utc::now();

        let sessions = SessionStates {
            forex: session_for(AssetType::Forex, now),
            equities: session_for(AssetType::Stock, now),
            commodities: session_for(AssetType::Commodity, now),
            crypto: session_for(AssetType::Crypto, now),
        };

        let rate_limits = self
            .provider
            .rate_limits()
            .into_iter()
            .map(|(source, snapshot)| RateLimitEntry { source, snapshot })
            .collect();

        StatusSnapshot {
            server_time: now.timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            live_data_enabled: self.config.enable_live_data,
            sessions,
            source_health: self.provider.health(),
            rate_limits,
            subscribed_symbols: self.provider.subscription_count(),
            polls_completed: self.provider.polls_completed(),
            hub: self.hub.stats(),
            streams: self
                .streams
                .as_ref()
                .map(|s| s.status())
                .unwrap_or_default(),
            observation: self.observation.latest_snapshot(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serializable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SessionStates {
    pub forex: SessionInfo,
    pub equities: SessionInfo,
    pub commodities: SessionInfo,
    pub crypto: SessionInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitEntry {
    pub source: QuoteSource,
    pub snapshot: TokenBucketSnapshot,
}

/// Aggregate engine state for the observer surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub server_time: i64,
    pub uptime_secs: u64,
    pub live_data_enabled: bool,
    pub sessions: SessionStates,
    pub source_health: HealthMap,
    pub rate_limits: Vec<RateLimitEntry>,
    pub subscribed_symbols: usize,
    pub polls_completed: u64,
    pub hub: HubStats,
    pub streams: Vec<EndpointStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<ObservationSnapshot>,
    pub recent_errors: Vec<ErrorRecord>,
}
