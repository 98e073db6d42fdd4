// =============================================================================
// Alpaca Adapter — key-gated NBBO for US equities
// =============================================================================
//
// The one upstream that gives us a real NBBO on stocks. A quote is composed
// from three concurrent fetches: latest NBBO quote, latest trade, latest
// daily bar. Alpaca's REST surface has no L2 depth, so `get_order_book`
// synthesizes levels fanned out from the NBBO.
//
// When credentials are absent the adapter self-disables: every operation
// returns a `disabled` outcome and the health probe reports false. Nothing
// else in the system needs to know.
// =============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::adapters::{
    json_f64, status_error, transport_error, with_single_retry, BrokerAdapter,
};
use crate::rate_limit::{budgets, TokenBucket, TokenBucketSnapshot};
use crate::types::{
    current_millis, BookLevel, Candle, FeedError, FetchOutcome, OrderBook, Quote, QuoteSource,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Synthesized book: price step between levels, in bps of last.
const SYNTH_LEVEL_STEP_BPS: f64 = 1.0;

pub struct AlpacaAdapter {
    client: reqwest::Client,
    base_url: String,
    /// None when unconfigured — the adapter is then permanently disabled.
    keys: Option<(String, String)>,
    limiter: TokenBucket,
}

impl AlpacaAdapter {
    pub fn new(api_key: Option<String>, api_secret: Option<String>) -> Self {
        Self::with_base_url("https://data.alpaca.markets", api_key, api_secret)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        let keys = match (api_key, api_secret) {
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => Some((k, s)),
            _ => None,
        };

        Self {
            client,
            base_url: base_url.into(),
            keys,
            limiter: TokenBucket::per_minute(budgets::ALPACA_PER_MIN),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.keys.is_some()
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    fn disabled_error(&self) -> FeedError {
        FeedError::disabled("alpaca credentials not configured")
    }

    async fn fetch_json(&self, path: &str) -> Result<Value, FeedError> {
        let (key, secret) = self.keys.as_ref().ok_or_else(|| self.disabled_error())?;

        if !self.limiter.consume_token() {
            return Err(FeedError::RateLimit {
                source: QuoteSource::Alpaca,
            });
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", key)
            .header("APCA-API-SECRET-KEY", secret)
            .send()
            .await
            .map_err(|e| transport_error(e, REQUEST_TIMEOUT.as_millis() as u64))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| transport_error(e, REQUEST_TIMEOUT.as_millis() as u64))?;

        if !(200..300).contains(&status) {
            return Err(status_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| FeedError::parse(format!("alpaca JSON: {e}")))
    }
}

#[async_trait]
impl BrokerAdapter for AlpacaAdapter {
    fn name(&self) -> QuoteSource {
        QuoteSource::Alpaca
    }

    fn supports(&self, _symbol: &str) -> bool {
        self.is_configured()
    }

    fn rate_limit(&self) -> Option<TokenBucketSnapshot> {
        Some(self.limiter.snapshot())
    }

    #[instrument(skip(self), name = "alpaca::get_quote")]
    async fn get_quote(&self, symbol: &str) -> FetchOutcome<Quote> {
        let started = Instant::now();
        if !self.is_configured() {
            return FetchOutcome::err(QuoteSource::Alpaca, 0, self.disabled_error());
        }

        let result = with_single_retry(|| async {
            // NBBO, last trade and daily bar in parallel; one round trip of
            // wall time for three documents.
            let quotes_url = format!("/v2/stocks/{symbol}/quotes/latest");
            let trades_url = format!("/v2/stocks/{symbol}/trades/latest");
            let bars_url = format!("/v2/stocks/{symbol}/bars/latest");
            let (nbbo, trade, bar) = tokio::join!(
                self.fetch_json(&quotes_url),
                self.fetch_json(&trades_url),
                self.fetch_json(&bars_url),
            );
            compose_quote(symbol, &nbbo?, &trade?, &bar?)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(quote) => {
                debug!(symbol, last = quote.last, "alpaca quote");
                FetchOutcome::ok(QuoteSource::Alpaca, latency, quote)
            }
            Err(e) => {
                warn!(symbol, error = %e, "alpaca quote failed");
                FetchOutcome::err(QuoteSource::Alpaca, latency, e)
            }
        }
    }

    #[instrument(skip(self), name = "alpaca::get_candles")]
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> FetchOutcome<Vec<Candle>> {
        let started = Instant::now();
        if !self.is_configured() {
            return FetchOutcome::err(QuoteSource::Alpaca, 0, self.disabled_error());
        }

        let tf = map_timeframe(timeframe);
        let result = with_single_retry(|| async {
            let body = self
                .fetch_json(&format!(
                    "/v2/stocks/{symbol}/bars?timeframe={tf}&limit={limit}"
                ))
                .await?;
            parse_bars(&body)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(candles) => FetchOutcome::ok(QuoteSource::Alpaca, latency, candles),
            Err(e) => FetchOutcome::err(QuoteSource::Alpaca, latency, e),
        }
    }

    /// Alpaca REST lacks L2 — synthesize a book fanned out from the NBBO.
    #[instrument(skip(self), name = "alpaca::get_order_book")]
    async fn get_order_book(&self, symbol: &str, levels: usize) -> FetchOutcome<OrderBook> {
        let quote = self.get_quote(symbol).await;
        let latency = quote.latency_ms;
        match quote.data {
            Ok(q) => FetchOutcome::ok(
                QuoteSource::Alpaca,
                latency,
                synthesize_book(&q, levels),
            ),
            Err(e) => FetchOutcome::err(QuoteSource::Alpaca, latency, e),
        }
    }

    async fn check_health(&self) -> bool {
        if !self.is_configured() {
            return false;
        }

        let (key, secret) = self.keys.as_ref().expect("checked above");
        let url = format!("{}/v2/stocks/AAPL/trades/latest", self.base_url);
        match self
            .client
            .get(&url)
            .header("APCA-API-KEY-ID", key)
            .header("APCA-API-SECRET-KEY", secret)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

// -----------------------------------------------------------------------------
// Parsing / composition
// -----------------------------------------------------------------------------

fn map_timeframe(timeframe: &str) -> &'static str {
    match timeframe {
        "1m" => "1Min",
        "5m" => "5Min",
        "15m" => "15Min",
        "1h" => "1Hour",
        "1d" => "1Day",
        other => {
            warn!(timeframe = other, "unknown timeframe — defaulting to 1Min");
            "1Min"
        }
    }
}

fn rfc3339_to_secs(val: &Value) -> Option<i64> {
    val.as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
}

fn compose_quote(
    symbol: &str,
    nbbo: &Value,
    trade: &Value,
    bar: &Value,
) -> Result<Quote, FeedError> {
    let q = &nbbo["quote"];
    let t = &trade["trade"];
    let b = &bar["bar"];

    let bid = json_f64(&q["bp"], "quote.bp")?;
    let ask = json_f64(&q["ap"], "quote.ap")?;
    let last = json_f64(&t["p"], "trade.p")?;

    let open = json_f64(&b["o"], "bar.o").unwrap_or(last);
    let high = json_f64(&b["h"], "bar.h").unwrap_or(last);
    let low = json_f64(&b["l"], "bar.l").unwrap_or(last);
    let previous_close = json_f64(&b["c"], "bar.c").unwrap_or(open);
    let volume = json_f64(&b["v"], "bar.v").unwrap_or(0.0);

    let timestamp = rfc3339_to_secs(&t["t"])
        .or_else(|| rfc3339_to_secs(&q["t"]))
        .map(|s| s * 1000)
        .unwrap_or_else(current_millis);

    let change = last - previous_close;
    let quote = Quote {
        symbol: symbol.to_string(),
        bid,
        bid_size: json_f64(&q["bs"], "quote.bs").unwrap_or(0.0),
        ask,
        ask_size: json_f64(&q["as"], "quote.as").unwrap_or(0.0),
        last,
        last_size: json_f64(&t["s"], "trade.s").unwrap_or(0.0),
        volume,
        change,
        change_percent: if previous_close > 0.0 {
            change / previous_close * 100.0
        } else {
            0.0
        },
        high,
        low,
        open,
        previous_close,
        timestamp,
        source: QuoteSource::Alpaca,
    };

    if !quote.is_coherent() {
        return Err(FeedError::parse("alpaca quote failed coherence check"));
    }
    Ok(quote)
}

fn parse_bars(body: &Value) -> Result<Vec<Candle>, FeedError> {
    let bars = body["bars"]
        .as_array()
        .ok_or_else(|| FeedError::parse("bars response missing array"))?;

    let mut candles = Vec::with_capacity(bars.len());
    for bar in bars {
        let time = match rfc3339_to_secs(&bar["t"]) {
            Some(t) => t,
            None => continue,
        };
        candles.push(Candle::new(
            time,
            json_f64(&bar["o"], "bar.o")?,
            json_f64(&bar["h"], "bar.h")?,
            json_f64(&bar["l"], "bar.l")?,
            json_f64(&bar["c"], "bar.c")?,
            json_f64(&bar["v"], "bar.v").unwrap_or(0.0),
        ));
    }
    Ok(candles)
}

/// Fan synthetic levels out from the NBBO with geometrically decaying size.
fn synthesize_book(quote: &Quote, levels: usize) -> OrderBook {
    let step = quote.last * SYNTH_LEVEL_STEP_BPS / 10_000.0;
    let base_size = if quote.bid_size > 0.0 {
        quote.bid_size
    } else {
        100.0
    };

    let mut bids = Vec::with_capacity(levels);
    let mut asks = Vec::with_capacity(levels);
    for i in 0..levels {
        let decay = 0.8_f64.powi(i as i32);
        bids.push(BookLevel {
            price: quote.bid - step * i as f64,
            size: base_size * decay,
            orders: None,
        });
        asks.push(BookLevel {
            price: quote.ask + step * i as f64,
            size: base_size * decay,
            orders: None,
        });
    }

    OrderBook {
        symbol: quote.symbol.clone(),
        bids,
        asks,
        spread: quote.ask - quote.bid,
        timestamp: quote.timestamp,
    }
}

// =============================================================================
// Tests
// =============================================================================
