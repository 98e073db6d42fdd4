// =============================================================================
// Hub Configuration — recognized options, env credentials, routing table
// =============================================================================
//
// All tunables live here. Persistence uses an atomic tmp + rename pattern to
// prevent corruption on crash, and every field carries `#[serde(default)]`
// so adding fields never breaks loading an older config file.
//
// Credentials come exclusively from the environment (EODHD_API_KEY,
// ALPACA_API_KEY, ALPACA_API_SECRET); key-gated adapters self-disable when
// their variables are absent.
// =============================================================================

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{AssetType, QuoteSource, SymbolBinding};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_cache_ttl_ms() -> u64 {
    5_000
}

fn default_candle_cache_ttl_ms() -> u64 {
    30_000
}

fn default_book_cache_ttl_ms() -> u64 {
    2_000
}

fn default_polling_interval_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_snapshot_interval_secs() -> u64 {
    30
}

fn default_clustering_interval_secs() -> u64 {
    120
}

fn default_session_check_interval_secs() -> u64 {
    60
}

fn default_arena_ws_url() -> String {
    "ws://127.0.0.1:4100/arena".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:4200".to_string()
}

fn default_arena_symbols() -> Vec<String> {
    default_bindings().into_iter().map(|b| b.symbol).collect()
}

// =============================================================================
// Stock source preference
// =============================================================================

/// Which upstream serves equities first when EODHD has no mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockSource {
    Yahoo,
    Alpaca,
}

impl Default for StockSource {
    fn default() -> Self {
        Self::Yahoo
    }
}

impl std::fmt::Display for StockSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yahoo => write!(f, "yahoo"),
            Self::Alpaca => write!(f, "alpaca"),
        }
    }
}

// =============================================================================
// HubConfig
// =============================================================================

/// Complete hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Master switch: when false every adapter reports itself disabled and
    /// no upstream is contacted.
    #[serde(default = "default_true")]
    pub enable_live_data: bool,

    /// Preferred equity upstream when no EODHD mapping exists.
    #[serde(default)]
    pub primary_stock_source: StockSource,

    /// Quote cache TTL.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Candle cache TTL.
    #[serde(default = "default_candle_cache_ttl_ms")]
    pub candle_cache_ttl_ms: u64,

    /// Order-book cache TTL.
    #[serde(default = "default_book_cache_ttl_ms")]
    pub book_cache_ttl_ms: u64,

    /// Cadence of the subscription poll loop.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Upper bound on attempts per provider request (primary + fallback).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Symbols whose subscribers are arena participants; their quotes must
    /// come from a real source.
    #[serde(default = "default_arena_symbols")]
    pub arena_symbols: Vec<String>,

    /// Observation snapshot cadence.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,

    /// Behavioral clustering cadence.
    #[serde(default = "default_clustering_interval_secs")]
    pub clustering_interval_secs: u64,

    /// Session-gate evaluation cadence.
    #[serde(default = "default_session_check_interval_secs")]
    pub session_check_interval_secs: u64,

    /// Arena event stream endpoint.
    #[serde(default = "default_arena_ws_url")]
    pub arena_ws_url: String,

    /// Observer HTTP bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enable_live_data: true,
            primary_stock_source: StockSource::default(),
            cache_ttl_ms: default_cache_ttl_ms(),
            candle_cache_ttl_ms: default_candle_cache_ttl_ms(),
            book_cache_ttl_ms: default_book_cache_ttl_ms(),
            polling_interval_ms: default_polling_interval_ms(),
            max_retries: default_max_retries(),
            arena_symbols: default_arena_symbols(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
            clustering_interval_secs: default_clustering_interval_secs(),
            session_check_interval_secs: default_session_check_interval_secs(),
            arena_ws_url: default_arena_ws_url(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl HubConfig {
    /// Load from a JSON file. Missing file is not an error — defaults apply.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no config file — using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&raw).context("failed to parse config JSON")?;

        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Persist atomically: write to `<path>.tmp` then rename over `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("tmp");

        let raw = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&tmp, raw)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move config into place at {}", path.display()))?;

        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Arena symbol membership as a set for guard lookups.
    pub fn arena_symbol_set(&self) -> HashSet<String> {
        self.arena_symbols.iter().cloned().collect()
    }
}

// =============================================================================
// Credentials (environment only — never persisted)
// =============================================================================

/// Optional upstream credentials pulled from the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub eodhd_api_key: Option<String>,
    pub alpaca_api_key: Option<String>,
    pub alpaca_api_secret: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let creds = Self {
            eodhd_api_key: non_empty_env("EODHD_API_KEY"),
            alpaca_api_key: non_empty_env("ALPACA_API_KEY"),
            alpaca_api_secret: non_empty_env("ALPACA_API_SECRET"),
        };

        if creds.eodhd_api_key.is_none() {
            warn!("EODHD_API_KEY not set — EODHD REST and streaming disabled");
        }
        if !creds.alpaca_configured() {
            warn!("Alpaca credentials not set — Alpaca adapter disabled");
        }
        creds
    }

    pub fn alpaca_configured(&self) -> bool {
        self.alpaca_api_key.is_some() && self.alpaca_api_secret.is_some()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// =============================================================================
// Default routing table — the 21 arena symbols
// =============================================================================

/// Build the static routing table: seven FX pairs (group Alpha), seven US
/// equities (Beta), five commodity futures plus two cryptos (Gamma).
///
/// Oil/gas/copper futures have no WS coverage upstream and are marked
/// `rest_only`; their exact membership is configuration, not gospel.
pub fn default_bindings() -> Vec<SymbolBinding> {
    let mut table = Vec::with_capacity(21);

    // ── FX (Alpha) ──────────────────────────────────────────────────────
    for pair in [
        "EUR/USD", "GBP/USD", "USD/JPY", "AUD/USD", "USD/CAD", "USD/CHF", "NZD/USD",
    ] {
        table.push(SymbolBinding {
            symbol: pair.to_string(),
            asset_type: AssetType::Forex,
            primary_source: QuoteSource::Eodhd,
            fallback_chain: vec![QuoteSource::Simulated],
            rest_only: false,
            ws_eligible: true,
        });
    }

    // ── US equities (Beta) ──────────────────────────────────────────────
    for sym in ["NVDA", "TSLA", "AAPL", "MSFT", "AMZN", "META", "GOOGL"] {
        table.push(SymbolBinding {
            symbol: sym.to_string(),
            asset_type: AssetType::Stock,
            primary_source: QuoteSource::Eodhd,
            fallback_chain: vec![QuoteSource::Alpaca, QuoteSource::Yahoo],
            rest_only: false,
            ws_eligible: true,
        });
    }

    // ── Commodity futures (Gamma) ───────────────────────────────────────
    for (sym, rest_only) in [
        ("GC=F", false),
        ("SI=F", false),
        ("CL=F", true),
        ("NG=F", true),
        ("HG=F", true),
    ] {
        table.push(SymbolBinding {
            symbol: sym.to_string(),
            asset_type: AssetType::Commodity,
            primary_source: QuoteSource::Eodhd,
            fallback_chain: vec![QuoteSource::Yahoo, QuoteSource::Simulated],
            rest_only,
            ws_eligible: !rest_only,
        });
    }

    // ── Crypto (Gamma) ──────────────────────────────────────────────────
    for sym in ["BTC", "ETH"] {
        table.push(SymbolBinding {
            symbol: sym.to_string(),
            asset_type: AssetType::Crypto,
            primary_source: QuoteSource::Binance,
            fallback_chain: vec![QuoteSource::Eodhd],
            rest_only: false,
            ws_eligible: true,
        });
    }

    table
}

/// Routing table keyed by symbol.
pub fn binding_map(bindings: Vec<SymbolBinding>) -> HashMap<String, SymbolBinding> {
    bindings.into_iter().map(|b| (b.symbol.clone(), b)).collect()
}

// =============================================================================
// Tests
// =============================================================================
