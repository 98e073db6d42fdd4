// =============================================================================
// Meridian Data Nexus — Main Entry Point
// =============================================================================
//
// Real-time market-data ingestion, normalization and fan-out for the 21-bot
// trading arena, plus the trade-observation analytics pipeline. Every
// subsystem runs on its own independent timer; none of the cadences are
// synchronized.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod adapters;
mod api;
mod app_state;
mod arena;
mod config;
mod hub;
mod indicators;
mod observation;
mod provider;
mod rate_limit;
mod session;
mod stream;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::alpaca::AlpacaAdapter;
use crate::adapters::binance::BinanceAdapter;
use crate::adapters::eodhd::EodhdRestAdapter;
use crate::adapters::sim::SimulatorAdapter;
use crate::adapters::yahoo::YahooAdapter;
use crate::app_state::AppState;
use crate::arena::ArenaStream;
use crate::config::{binding_map, default_bindings, Credentials, HubConfig};
use crate::hub::MarketDataHub;
use crate::observation::orchestrator::{attach_to_stream, ObservationHub};
use crate::provider::{AdapterSet, MarketDataProvider};
use crate::stream::StreamManager;
use crate::types::{current_millis, AssetType};

const CONFIG_PATH: &str = "hub_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Meridian Data Nexus starting up");

    let config = Arc::new(HubConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        HubConfig::default()
    }));
    let credentials = Credentials::from_env();
    let bindings = Arc::new(binding_map(default_bindings()));

    info!(
        symbols = bindings.len(),
        live_data = config.enable_live_data,
        stock_source = %config.primary_stock_source,
        "routing table ready"
    );

    // ── 2. Broker adapters ───────────────────────────────────────────────
    let sim_seed = current_millis() as u64;
    let adapters = AdapterSet {
        yahoo: Arc::new(YahooAdapter::new()),
        binance: Arc::new(BinanceAdapter::new()),
        alpaca: Arc::new(AlpacaAdapter::new(
            credentials.alpaca_api_key.clone(),
            credentials.alpaca_api_secret.clone(),
        )),
        eodhd: Arc::new(EodhdRestAdapter::new(
            credentials.eodhd_api_key.clone(),
            bindings.clone(),
        )),
        fx_sim: Arc::new(SimulatorAdapter::new(AssetType::Forex, sim_seed)),
        commodity_sim: Arc::new(SimulatorAdapter::new(AssetType::Commodity, sim_seed ^ 1)),
    };

    // ── 3. Provider & hub ────────────────────────────────────────────────
    let provider = Arc::new(MarketDataProvider::new(
        config.clone(),
        bindings.clone(),
        adapters,
    ));
    let data_hub = Arc::new(MarketDataHub::new(provider.clone()));

    {
        let hub = data_hub.clone();
        let events = provider.events();
        tokio::spawn(async move {
            hub.run(events).await;
        });
    }

    // ── 4. EODHD streaming (key-gated) ───────────────────────────────────
    let streams = match credentials.eodhd_api_key.clone() {
        Some(api_key) => {
            let ws_symbols: Vec<(String, AssetType)> = bindings
                .values()
                .filter(|b| b.ws_eligible)
                .map(|b| (b.symbol.clone(), b.asset_type))
                .collect();

            let (manager, mut quotes_rx) = StreamManager::new(api_key, ws_symbols);
            let manager = Arc::new(manager);
            manager.start();

            let ingest_provider = provider.clone();
            tokio::spawn(async move {
                while let Some(quote) = quotes_rx.recv().await {
                    ingest_provider.ingest_stream_quote(quote);
                }
            });

            info!("EODHD streaming endpoints launched");
            Some(manager)
        }
        None => {
            info!("EODHD streaming disabled — REST polling only");
            None
        }
    };

    // ── 5. Observation pipeline & arena stream ───────────────────────────
    let observation = Arc::new(ObservationHub::new());
    let arena_stream = Arc::new(ArenaStream::new(config.arena_ws_url.clone()));
    attach_to_stream(&observation, &arena_stream);

    {
        let stream = arena_stream.clone();
        tokio::spawn(async move {
            stream.run().await;
        });
    }

    // The observation pipeline subscribes to every arena symbol so its
    // indicator engines see the distributed quote stream. These are
    // observer subscriptions, not arena participants.
    for symbol in &config.arena_symbols {
        let obs = observation.clone();
        let sym = symbol.clone();
        data_hub.subscribe(
            symbol,
            "observation-pipeline",
            false,
            Arc::new(move |quote| {
                obs.on_market_quote(&sym, quote.last, quote.timestamp);
            }),
        );
    }
    info!(
        symbols = config.arena_symbols.len(),
        "observation pipeline subscribed"
    );

    // ── 6. Poll loop ─────────────────────────────────────────────────────
    {
        let poller = provider.clone();
        tokio::spawn(async move {
            poller.run_poll_loop().await;
        });
    }

    // ── 7. Health probes (60 s) ──────────────────────────────────────────
    {
        let prober = provider.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                let health = prober.check_health().await;
                info!(
                    yahoo = health.yahoo,
                    binance = health.binance,
                    alpaca = health.alpaca,
                    eodhd = health.eodhd,
                    "source health"
                );
            }
        });
    }

    // ── 8. Observation snapshots ─────────────────────────────────────────
    {
        let obs = observation.clone();
        let every = config.snapshot_interval_secs;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(every));
            loop {
                interval.tick().await;
                let snap = obs.snapshot(current_millis());
                info!(
                    trades = snap.trades_observed,
                    dupes = snap.duplicates_dropped,
                    last_minute = snap.trades_last_minute,
                    patterns = snap.discovered_patterns,
                    "observation snapshot"
                );
            }
        });
    }

    // ── 9. Clustering pass ───────────────────────────────────────────────
    {
        let obs = observation.clone();
        let every = config.clustering_interval_secs;
        tokio::spawn(async move {
            // Let fingerprints accumulate before the first pass.
            tokio::time::sleep(Duration::from_secs(every)).await;
            let mut interval = tokio::time::interval(Duration::from_secs(every));
            loop {
                interval.tick().await;
                obs.run_clustering_pass();
            }
        });
    }

    // ── 10. Observer API server ──────────────────────────────────────────
    let state = Arc::new(AppState::new(
        config.clone(),
        provider.clone(),
        data_hub.clone(),
        observation.clone(),
        streams.clone(),
    ));

    {
        let bind_addr = config.bind_addr.clone();
        let api_state = state.clone();
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "observer API listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "observer API server failed");
                    }
                }
                Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind observer API"),
            }
        });
    }

    info!("all subsystems running — ctrl-c to stop");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    arena_stream.disconnect();
    if let Some(streams) = &streams {
        streams.shutdown();
    }
    provider.shutdown();

    if let Err(e) = config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("Meridian Data Nexus shut down complete");
    Ok(())
}
