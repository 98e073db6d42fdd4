// =============================================================================
// EODHD WebSocket Streams — forex / us-quote / crypto endpoints
// =============================================================================
//
// Each endpoint holds at most one connection and runs an independent state
// machine:
//
//   DISCONNECTED ──connect──▶ CONNECTING ──open──▶ SUBSCRIBED
//        ▲                         │                    │
//        └──── backoff retry ──────┘                    │
//        ▲                                              ▼
//        └── session-close / heartbeat-timeout / close ─┘
//
// On open the full symbol list for the endpoint is subscribed in one
// message. Inbound status/ack messages (anything carrying `status_code` or
// `message`) are skipped. If nothing arrives for 60 s the connection is
// considered stale and torn down. Reconnects back off exponentially from
// 1 s to a 30 s cap, unbounded, with the attempt counter reset on every
// successful open. A 403 handshake or close code 4003 is permanent — the
// endpoint never reconnects.
//
// The session gate runs on a 60 s cadence: while an endpoint's market is
// closed its socket is proactively closed and reconnection suppressed.
// Closed-market sockets contribute nothing and cost reconnection storms on
// mass wake-up.
// =============================================================================

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::session::streaming_allowed;
use crate::types::{current_millis, AssetType, Quote, QuoteSource};

/// No message for this long means the connection is stale.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);
/// Cadence of the session gate while paused.
const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Reconnect backoff bounds.
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

// =============================================================================
// Endpoints
// =============================================================================

/// The three EODHD streaming endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WsEndpoint {
    Forex,
    UsQuote,
    Crypto,
}

impl WsEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            Self::Forex => "forex",
            Self::UsQuote => "us-quote",
            Self::Crypto => "crypto",
        }
    }

    /// Asset class whose session governs this endpoint's gate.
    pub fn asset_type(self) -> AssetType {
        match self {
            Self::Forex => AssetType::Forex,
            Self::UsQuote => AssetType::Stock,
            Self::Crypto => AssetType::Crypto,
        }
    }

    /// Which endpoint serves a symbol of the given asset class, if any.
    pub fn for_asset(asset: AssetType) -> Option<Self> {
        match asset {
            AssetType::Forex => Some(Self::Forex),
            AssetType::Stock => Some(Self::UsQuote),
            AssetType::Crypto => Some(Self::Crypto),
            // Commodities stream nowhere; they poll over REST.
            AssetType::Commodity => None,
        }
    }

    /// Canonical symbol -> wire symbol for the subscribe message.
    pub fn wire_symbol(self, canonical: &str) -> String {
        match self {
            Self::Forex => canonical.replace('/', ""),
            Self::UsQuote => canonical.to_string(),
            Self::Crypto => format!("{canonical}-USD"),
        }
    }

    /// Wire symbol -> canonical symbol for emitted quotes.
    pub fn canonical_symbol(self, wire: &str) -> String {
        match self {
            // "EURUSD" -> "EUR/USD"; pairs are always 3+3.
            Self::Forex if wire.len() == 6 => format!("{}/{}", &wire[..3], &wire[3..]),
            Self::Forex => wire.to_string(),
            Self::UsQuote => wire.to_string(),
            Self::Crypto => wire.strip_suffix("-USD").unwrap_or(wire).to_string(),
        }
    }
}

impl std::fmt::Display for WsEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

// =============================================================================
// State machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Subscribed,
    SessionPaused,
    AuthFailed,
}

/// What the session gate wants done, given the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateAction {
    /// Market open and no connection — connect.
    Connect,
    /// Market closed while connected — close the socket, pause.
    Close,
    /// Nothing to do.
    Hold,
}

pub(crate) fn gate_action(state: StreamState, session_open: bool) -> GateAction {
    match (state, session_open) {
        (StreamState::AuthFailed, _) => GateAction::Hold,
        (StreamState::Subscribed | StreamState::Connecting, false) => GateAction::Close,
        (StreamState::Disconnected | StreamState::SessionPaused, true) => GateAction::Connect,
        _ => GateAction::Hold,
    }
}

/// Exponential backoff, capped: 1s, 2s, 4s, ... 30s.
pub(crate) fn next_backoff_ms(attempt: u32) -> u64 {
    BACKOFF_BASE_MS
        .saturating_mul(1u64 << attempt.min(5))
        .min(BACKOFF_CAP_MS)
}

// =============================================================================
// Per-endpoint stream
// =============================================================================

/// Serializable view of one endpoint for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub endpoint: WsEndpoint,
    pub state: StreamState,
    pub symbols: usize,
    pub messages_received: u64,
    pub reconnect_attempts: u32,
}

struct EndpointStream {
    endpoint: WsEndpoint,
    /// Canonical symbols assigned to this endpoint.
    symbols: Vec<String>,
    api_key: String,
    base_url: String,
    state: RwLock<StreamState>,
    messages_received: AtomicU64,
    attempts: AtomicU32,
    quotes_tx: mpsc::UnboundedSender<Quote>,
    shutdown: watch::Receiver<bool>,
}

impl EndpointStream {
    fn set_state(&self, next: StreamState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(endpoint = %self.endpoint, from = ?*state, to = ?next, "stream state");
            *state = next;
        }
    }

    fn status(&self) -> EndpointStatus {
        EndpointStatus {
            endpoint: self.endpoint,
            state: *self.state.read(),
            symbols: self.symbols.len(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            reconnect_attempts: self.attempts.load(Ordering::Relaxed),
        }
    }

    fn subscribe_message(&self) -> String {
        let wire: Vec<String> = self
            .symbols
            .iter()
            .map(|s| self.endpoint.wire_symbol(s))
            .collect();
        serde_json::json!({ "action": "subscribe", "symbols": wire.join(",") }).to_string()
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Endpoint lifecycle. Runs until shutdown or permanent auth failure.
    async fn run(self: Arc<Self>) {
        loop {
            if self.shutting_down() {
                self.set_state(StreamState::Disconnected);
                return;
            }

            let open = streaming_allowed(self.endpoint.asset_type(), Utc::now());
            let current_state = *self.state.read();
            match gate_action(current_state, open) {
                GateAction::Hold if current_state == StreamState::AuthFailed => return,
                GateAction::Close | GateAction::Hold if !open => {
                    self.set_state(StreamState::SessionPaused);
                    tokio::time::sleep(SESSION_CHECK_INTERVAL).await;
                    continue;
                }
                _ => {}
            }

            self.set_state(StreamState::Connecting);
            let url = format!(
                "{}/{}?api_token={}",
                self.base_url,
                self.endpoint.path(),
                self.api_key
            );

            match connect_async(&url).await {
                Ok((ws, _resp)) => {
                    self.attempts.store(0, Ordering::Relaxed);
                    if let Err(permanent) = self.drive_connection(ws).await {
                        if permanent {
                            self.set_state(StreamState::AuthFailed);
                            error!(endpoint = %self.endpoint, "authentication rejected — endpoint permanently offline");
                            return;
                        }
                    }
                }
                Err(WsError::Http(resp)) if resp.status().as_u16() == 403 => {
                    self.set_state(StreamState::AuthFailed);
                    error!(endpoint = %self.endpoint, "handshake returned 403 — endpoint permanently offline");
                    return;
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "connect failed");
                }
            }

            if self.shutting_down() {
                self.set_state(StreamState::Disconnected);
                return;
            }

            // A session-gated close is not a failure; skip the backoff and
            // let the gate check at the top of the loop take over.
            if *self.state.read() == StreamState::SessionPaused {
                continue;
            }

            self.set_state(StreamState::Disconnected);
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
            let backoff = next_backoff_ms(attempt);
            debug!(endpoint = %self.endpoint, attempt, backoff_ms = backoff, "reconnecting after backoff");
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    /// Subscribe and pump messages until the connection dies. `Err(true)`
    /// signals a permanent auth failure.
    async fn drive_connection(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Result<(), bool> {
        let (mut write, mut read) = ws.split();

        if let Err(e) = write.send(Message::Text(self.subscribe_message())).await {
            warn!(endpoint = %self.endpoint, error = %e, "subscribe send failed");
            return Ok(());
        }
        self.set_state(StreamState::Subscribed);
        info!(
            endpoint = %self.endpoint,
            symbols = self.symbols.len(),
            "stream subscribed"
        );

        let mut last_message = Instant::now();
        loop {
            if self.shutting_down() {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }

            // Session gate: close proactively once the market shuts.
            if !streaming_allowed(self.endpoint.asset_type(), Utc::now()) {
                info!(endpoint = %self.endpoint, "market closed — closing stream");
                let _ = write.send(Message::Close(None)).await;
                self.set_state(StreamState::SessionPaused);
                return Ok(());
            }

            match tokio::time::timeout(HEARTBEAT_TIMEOUT, read.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    last_message = Instant::now();
                    self.messages_received.fetch_add(1, Ordering::Relaxed);
                    if let Some(quote) = parse_tick(self.endpoint, &text) {
                        if self.quotes_tx.send(quote).is_err() {
                            // Receiver gone — the hub is shutting down.
                            return Ok(());
                        }
                    }
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(0);
                    if code == 4003 {
                        return Err(true);
                    }
                    warn!(endpoint = %self.endpoint, code, "stream closed by upstream");
                    return Ok(());
                }
                Ok(Some(Ok(_))) => {
                    // Ping/pong/binary — tungstenite answers pings itself.
                    last_message = Instant::now();
                }
                Ok(Some(Err(e))) => {
                    warn!(endpoint = %self.endpoint, error = %e, "stream read error");
                    return Ok(());
                }
                Ok(None) => {
                    warn!(endpoint = %self.endpoint, "stream ended");
                    return Ok(());
                }
                Err(_elapsed) => {
                    warn!(
                        endpoint = %self.endpoint,
                        silent_for_s = last_message.elapsed().as_secs(),
                        "heartbeat timeout — forcing reconnect"
                    );
                    return Ok(());
                }
            }
        }
    }
}

// =============================================================================
// Tick parsing
// =============================================================================

/// Parse one inbound message into a normalized quote. Status and ack
/// messages return `None`.
pub fn parse_tick(endpoint: WsEndpoint, text: &str) -> Option<Quote> {
    let v: Value = serde_json::from_str(text).ok()?;

    // Ack / status frames carry one of these fields; ticks never do.
    if v.get("status_code").is_some() || v.get("message").is_some() {
        return None;
    }

    let wire = v["s"].as_str()?;
    let symbol = endpoint.canonical_symbol(wire);
    let timestamp = v["t"].as_i64().unwrap_or_else(current_millis);

    let (bid, ask, last, last_size) = match endpoint {
        WsEndpoint::Forex => {
            let a = v["a"].as_f64()?;
            let b = v["b"].as_f64()?;
            (b, a, (a + b) / 2.0, 0.0)
        }
        WsEndpoint::UsQuote => {
            let ap = v["ap"].as_f64()?;
            let bp = v["bp"].as_f64()?;
            (bp, ap, (ap + bp) / 2.0, 0.0)
        }
        WsEndpoint::Crypto => {
            let p = v["p"]
                .as_f64()
                .or_else(|| v["p"].as_str().and_then(|s| s.parse().ok()))?;
            let q = v["q"]
                .as_f64()
                .or_else(|| v["q"].as_str().and_then(|s| s.parse().ok()))
                .unwrap_or(0.0);
            let (b, a) = Quote::synth_spread(p, 0.5);
            (b, a, p, q)
        }
    };

    let change = v["dd"].as_f64().unwrap_or(0.0);
    let change_percent = v["dc"].as_f64().unwrap_or(0.0);

    let quote = Quote {
        symbol,
        bid,
        bid_size: v["bs"].as_f64().unwrap_or(0.0),
        ask,
        ask_size: v["as"].as_f64().unwrap_or(0.0),
        last,
        last_size,
        volume: 0.0,
        change,
        change_percent,
        high: last,
        low: last,
        open: last - change,
        previous_close: last - change,
        timestamp,
        source: QuoteSource::Eodhd,
    };

    quote.is_coherent().then_some(quote)
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the three endpoint streams and their lifecycle.
pub struct StreamManager {
    streams: Vec<Arc<EndpointStream>>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamManager {
    /// Partition `symbols` (canonical, with asset class) across endpoints
    /// and prepare one stream per non-empty endpoint. Quotes flow out the
    /// returned receiver.
    pub fn new(
        api_key: String,
        symbols: Vec<(String, AssetType)>,
    ) -> (Self, mpsc::UnboundedReceiver<Quote>) {
        Self::with_base_url("wss://ws.eodhistoricaldata.com/ws", api_key, symbols)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: String,
        symbols: Vec<(String, AssetType)>,
    ) -> (Self, mpsc::UnboundedReceiver<Quote>) {
        let base_url = base_url.into();
        let (quotes_tx, quotes_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut per_endpoint: Vec<(WsEndpoint, Vec<String>)> = vec![
            (WsEndpoint::Forex, Vec::new()),
            (WsEndpoint::UsQuote, Vec::new()),
            (WsEndpoint::Crypto, Vec::new()),
        ];
        for (symbol, asset) in symbols {
            if let Some(endpoint) = WsEndpoint::for_asset(asset) {
                per_endpoint
                    .iter_mut()
                    .find(|(e, _)| *e == endpoint)
                    .expect("all endpoints present")
                    .1
                    .push(symbol);
            }
        }

        let streams = per_endpoint
            .into_iter()
            .filter(|(_, syms)| !syms.is_empty())
            .map(|(endpoint, symbols)| {
                Arc::new(EndpointStream {
                    endpoint,
                    symbols,
                    api_key: api_key.clone(),
                    base_url: base_url.clone(),
                    state: RwLock::new(StreamState::Disconnected),
                    messages_received: AtomicU64::new(0),
                    attempts: AtomicU32::new(0),
                    quotes_tx: quotes_tx.clone(),
                    shutdown: shutdown_rx.clone(),
                })
            })
            .collect();

        (
            Self {
                streams,
                shutdown_tx,
            },
            quotes_rx,
        )
    }

    /// Spawn every endpoint runner.
    pub fn start(&self) {
        for stream in &self.streams {
            let stream = stream.clone();
            tokio::spawn(async move {
                stream.run().await;
            });
        }
    }

    /// Signal all runners to close their sockets and exit. No reconnect.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn status(&self) -> Vec<EndpointStatus> {
        self.streams.iter().map(|s| s.status()).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
