// =============================================================================
// Market Data Hub — single source of truth, fan-out, arena guard
// =============================================================================
//
// Sits between the provider and every consumer. Keyed by symbol, it holds
// the current quote and the subscriber set, and delivers every provider
// quote event to each subscriber by value.
//
// The invariant this component exists for: no matter how many bots
// subscribe to NVDA, the upstream sees one poll / one WS subscription.
// 21 bots × up to 21 symbols collapses from 441 potential upstream calls
// to at most one per distinct symbol.
//
// The arena guard lives in the delivery path: a subscriber registered as
// an arena participant never receives a quote whose source is `simulated`.
// Rejections are counted and logged — they are observability, not errors;
// a bot that sees no ticks makes no trades, which is the safe default.
//
// Handlers run synchronously and must not block. A panicking handler is
// isolated so one misbehaving consumer cannot take down the fan-out.
// =============================================================================

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::provider::QuoteFeed;
use crate::types::{Quote, QuoteSource};

/// Synchronous quote callback. Contractually non-blocking.
pub type QuoteHandler = Arc<dyn Fn(Quote) + Send + Sync>;

struct HubSubscriber {
    consumer_id: String,
    arena_participant: bool,
    handler: QuoteHandler,
}

#[derive(Default)]
struct SymbolChannel {
    current: Option<Quote>,
    subscribers: Vec<HubSubscriber>,
}

/// Aggregate hub counters for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub symbols: usize,
    pub subscribers: usize,
    pub delivered: u64,
    pub rejected_simulated: u64,
    pub handler_failures: u64,
}

pub struct MarketDataHub {
    feed: Arc<dyn QuoteFeed>,
    channels: RwLock<HashMap<String, SymbolChannel>>,
    delivered: AtomicU64,
    rejected_simulated: AtomicU64,
    handler_failures: AtomicU64,
}

impl MarketDataHub {
    pub fn new(feed: Arc<dyn QuoteFeed>) -> Self {
        Self {
            feed,
            channels: RwLock::new(HashMap::new()),
            delivered: AtomicU64::new(0),
            rejected_simulated: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Subscription
    // -------------------------------------------------------------------------

    /// Register `consumer_id` on `symbol`. The first subscriber on a symbol
    /// opens the single upstream subscription. Late subscribers receive the
    /// latest cached quote immediately (guard rules applied), then join the
    /// normal fan-out.
    pub fn subscribe(
        &self,
        symbol: &str,
        consumer_id: &str,
        arena_participant: bool,
        handler: QuoteHandler,
    ) {
        let snapshot = {
            let mut channels = self.channels.write();
            let channel = channels.entry(symbol.to_string()).or_default();

            if channel.subscribers.is_empty() {
                self.feed.subscribe_symbol(symbol);
            }
            // Re-subscribing under the same id replaces the old handler.
            channel
                .subscribers
                .retain(|s| s.consumer_id != consumer_id);
            channel.subscribers.push(HubSubscriber {
                consumer_id: consumer_id.to_string(),
                arena_participant,
                handler: handler.clone(),
            });

            info!(
                symbol,
                consumer_id,
                arena_participant,
                subscribers = channel.subscribers.len(),
                "hub subscription added"
            );
            channel.current.clone()
        };

        // Cold-start fill, outside the lock.
        if let Some(quote) = snapshot {
            let sub = HubSubscriber {
                consumer_id: consumer_id.to_string(),
                arena_participant,
                handler,
            };
            self.deliver(&sub, quote);
        }
    }

    /// Remove `consumer_id` from `symbol`. Takes effect before the next
    /// quote event. The last unsubscribe closes the upstream subscription.
    pub fn unsubscribe(&self, symbol: &str, consumer_id: &str) {
        let mut channels = self.channels.write();
        if let Some(channel) = channels.get_mut(symbol) {
            channel.subscribers.retain(|s| s.consumer_id != consumer_id);
            if channel.subscribers.is_empty() {
                self.feed.unsubscribe_symbol(symbol);
                channels.remove(symbol);
                debug!(symbol, "last subscriber left — upstream subscription closed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------------

    /// Handle one provider quote event: update the current quote, fan out.
    pub fn on_quote(&self, quote: Quote) {
        let subscribers: Vec<HubSubscriber> = {
            let mut channels = self.channels.write();
            match channels.get_mut(&quote.symbol) {
                Some(channel) => {
                    channel.current = Some(quote.clone());
                    channel
                        .subscribers
                        .iter()
                        .map(|s| HubSubscriber {
                            consumer_id: s.consumer_id.clone(),
                            arena_participant: s.arena_participant,
                            handler: s.handler.clone(),
                        })
                        .collect()
                }
                // Nobody subscribed to this symbol.
                None => return,
            }
        };

        for sub in &subscribers {
            self.deliver(sub, quote.clone());
        }
    }

    /// Deliver one quote to one subscriber, applying the arena guard and
    /// isolating handler panics.
    fn deliver(&self, sub: &HubSubscriber, quote: Quote) {
        if sub.arena_participant && quote.source == QuoteSource::Simulated {
            self.rejected_simulated.fetch_add(1, Ordering::Relaxed);
            debug!(
                symbol = %quote.symbol,
                consumer_id = %sub.consumer_id,
                "simulated quote rejected at arena boundary"
            );
            return;
        }

        let handler = sub.handler.clone();
        if catch_unwind(AssertUnwindSafe(move || handler(quote))).is_err() {
            self.handler_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                consumer_id = %sub.consumer_id,
                "subscriber handler panicked — isolated, others unaffected"
            );
        } else {
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Pump the provider's broadcast event stream into the hub. Runs until
    /// the provider drops its sender.
    pub async fn run(
        self: Arc<Self>,
        mut events: tokio::sync::broadcast::Receiver<Quote>,
    ) {
        loop {
            match events.recv().await {
                Ok(quote) => self.on_quote(quote),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    // Live stream: losses are expected under pressure.
                    warn!(missed, "hub lagged behind the quote stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    info!("quote stream closed — hub loop exiting");
                    return;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// Latest quote for a symbol, if any has arrived.
    pub fn current_quote(&self, symbol: &str) -> Option<Quote> {
        self.channels.read().get(symbol)?.current.clone()
    }

    pub fn stats(&self) -> HubStats {
        let channels = self.channels.read();
        HubStats {
            symbols: channels.len(),
            subscribers: channels.values().map(|c| c.subscribers.len()).sum(),
            delivered: self.delivered.load(Ordering::Relaxed),
            rejected_simulated: self.rejected_simulated.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
