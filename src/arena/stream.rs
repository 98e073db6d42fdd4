// =============================================================================
// Arena Stream — WebSocket client with per-event handler registration
// =============================================================================
//
// The arena speaks a Socket.IO-compatible protocol; this client needs none
// of Socket.IO itself, only the shape: every frame is a JSON document
// `{"event": "<name>", "data": <payload>}`, and room subscription maps to
// per-event handler registration. On connect the client announces the
// events it wants; outbound emits use the same frame shape.
//
// Reconnection is unbounded with a 1-5 s randomized backoff, re-subscribing
// on every reconnect.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Per-event callback. Receives the frame's `data` document.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

pub struct ArenaStream {
    url: String,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    connected: AtomicBool,
    frames_received: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ArenaStream {
    pub fn new(url: impl Into<String>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            url: url.into(),
            handlers: RwLock::new(HashMap::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            connected: AtomicBool::new(false),
            frames_received: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Register a handler for `event`. Multiple handlers per event stack.
    pub fn on(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    /// Queue an outbound frame. Delivered once connected.
    pub fn emit(&self, event: &str, payload: Value) {
        let frame = serde_json::json!({ "event": event, "data": payload }).to_string();
        let _ = self.outbound_tx.send(frame);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn subscribe_frame(&self) -> String {
        let events: Vec<String> = self.handlers.read().keys().cloned().collect();
        serde_json::json!({ "event": "subscribe", "data": { "events": events } }).to_string()
    }

    /// Dispatch one inbound frame to the registered handlers.
    fn dispatch(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "unparseable arena frame skipped");
                return;
            }
        };
        let event = match frame["event"].as_str() {
            Some(e) => e,
            None => return,
        };

        self.frames_received.fetch_add(1, Ordering::Relaxed);
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(event)
            .map(|hs| hs.to_vec())
            .unwrap_or_default();

        for handler in handlers {
            handler(&frame["data"]);
        }
    }

    /// Connection lifecycle: connect, subscribe, pump frames both ways,
    /// reconnect on failure with 1-5 s randomized backoff. Runs until
    /// [`ArenaStream::disconnect`].
    pub async fn run(self: Arc<Self>) {
        let mut outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .expect("run() called twice on the same stream");
        let mut shutdown = self.shutdown_rx.clone();

        loop {
            if *shutdown.borrow() {
                return;
            }

            match connect_async(&self.url).await {
                Ok((ws, _)) => {
                    info!(url = %self.url, "arena stream connected");
                    self.connected.store(true, Ordering::Relaxed);
                    let (mut write, mut read) = ws.split();

                    // Announce interest on every (re)connect.
                    if write
                        .send(Message::Text(self.subscribe_frame()))
                        .await
                        .is_err()
                    {
                        self.connected.store(false, Ordering::Relaxed);
                        continue;
                    }

                    loop {
                        tokio::select! {
                            inbound = read.next() => match inbound {
                                Some(Ok(Message::Text(text))) => self.dispatch(&text),
                                Some(Ok(Message::Close(_))) | None => {
                                    warn!("arena stream closed");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(error = %e, "arena stream read error");
                                    break;
                                }
                            },
                            outbound = outbound_rx.recv() => {
                                if let Some(frame) = outbound {
                                    if write.send(Message::Text(frame)).await.is_err() {
                                        break;
                                    }
                                }
                            },
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    let _ = write.send(Message::Close(None)).await;
                                    self.connected.store(false, Ordering::Relaxed);
                                    return;
                                }
                            }
                        }
                    }
                    self.connected.store(false, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "arena connect failed");
                }
            }

            let backoff = rand::thread_rng().gen_range(1_000..=5_000);
            debug!(backoff_ms = backoff, "arena reconnect backoff");
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
