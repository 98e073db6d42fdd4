// =============================================================================
// Binance Adapter — full public market data, real depth
// =============================================================================
//
// The only upstream with a genuine level-2 book. All endpoints are public;
// no signing involved. Binance ships prices as JSON strings, hence the
// string-or-number parsing throughout.
//
// Symbol convention: callers use bare crypto tickers ("BTC") or
// dash-suffixed pairs ("BTC-USDT", "ETH-USD"); both normalize to the
// exchange's concatenated form ("BTCUSDT").
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
    BookLevel, Candle, FeedError, FetchOutcome, OrderBook, Quote, QuoteSource,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct BinanceAdapter {
    client: reqwest::Client,
    base_url: String,
    limiter: TokenBucket,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        Self::with_base_url("https://api.binance.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            limiter: TokenBucket::per_minute(budgets::BINANCE_PER_MIN),
        }
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    async fn fetch_json(&self, path_and_query: &str) -> Result<Value, FeedError> {
        if !self.limiter.consume_token() {
            return Err(FeedError::RateLimit {
                source: QuoteSource::Binance,
            });
        }

        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = self
            .client
            .get(&url)
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

        serde_json::from_str(&body).map_err(|e| FeedError::parse(format!("binance JSON: {e}")))
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerAdapter for BinanceAdapter {
    fn name(&self) -> QuoteSource {
        QuoteSource::Binance
    }

    fn rate_limit(&self) -> Option<TokenBucketSnapshot> {
        Some(self.limiter.snapshot())
    }

    #[instrument(skip(self), name = "binance::get_quote")]
    async fn get_quote(&self, symbol: &str) -> FetchOutcome<Quote> {
        let started = Instant::now();
        let pair = normalize_symbol(symbol);

        let result = with_single_retry(|| async {
            let body = self
                .fetch_json(&format!("/api/v3/ticker/24hr?symbol={pair}"))
                .await?;
            parse_ticker(symbol, &body)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(quote) => {
                debug!(symbol, pair, last = quote.last, "binance quote");
                FetchOutcome::ok(QuoteSource::Binance, latency, quote)
            }
            Err(e) => {
                warn!(symbol, pair, error = %e, "binance quote failed");
                FetchOutcome::err(QuoteSource::Binance, latency, e)
            }
        }
    }

    #[instrument(skip(self), name = "binance::get_candles")]
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> FetchOutcome<Vec<Candle>> {
        let started = Instant::now();
        let pair = normalize_symbol(symbol);
        let interval = map_interval(timeframe);

        let result = with_single_retry(|| async {
            let body = self
                .fetch_json(&format!(
                    "/api/v3/klines?symbol={pair}&interval={interval}&limit={limit}"
                ))
                .await?;
            parse_klines(&body)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(candles) => FetchOutcome::ok(QuoteSource::Binance, latency, candles),
            Err(e) => FetchOutcome::err(QuoteSource::Binance, latency, e),
        }
    }

    #[instrument(skip(self), name = "binance::get_order_book")]
    async fn get_order_book(&self, symbol: &str, levels: usize) -> FetchOutcome<OrderBook> {
        let started = Instant::now();
        let pair = normalize_symbol(symbol);
        let depth = levels.clamp(5, 100);

        let result = with_single_retry(|| async {
            let body = self
                .fetch_json(&format!("/api/v3/depth?symbol={pair}&limit={depth}"))
                .await?;
            parse_depth(symbol, &body, levels)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(book) => FetchOutcome::ok(QuoteSource::Binance, latency, book),
            Err(e) => FetchOutcome::err(QuoteSource::Binance, latency, e),
        }
    }

    async fn check_health(&self) -> bool {
        let url = format!("{}/api/v3/ping", self.base_url);
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

// -----------------------------------------------------------------------------
// Symbol / interval mapping
// -----------------------------------------------------------------------------

/// "BTC" | "BTC-USDT" | "BTC-USD" -> "BTCUSDT"; already-concatenated pairs
/// pass through unchanged.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    let bare = upper
        .strip_suffix("-USDT")
        .or_else(|| upper.strip_suffix("-USD"))
        .unwrap_or(&upper);

    if bare.ends_with("USDT") {
        bare.to_string()
    } else {
        format!("{bare}USDT")
    }
}

fn map_interval(timeframe: &str) -> &'static str {
    match timeframe {
        "1m" => "1m",
        "5m" => "5m",
        "15m" => "15m",
        "1h" => "1h",
        "4h" => "4h",
        "1d" => "1d",
        other => {
            warn!(timeframe = other, "unknown interval — defaulting to 1m");
            "1m"
        }
    }
}

// -----------------------------------------------------------------------------
// Parsing
// -----------------------------------------------------------------------------

fn parse_ticker(symbol: &str, body: &Value) -> Result<Quote, FeedError> {
    let quote = Quote {
        symbol: symbol.to_string(),
        bid: json_f64(&body["bidPrice"], "bidPrice")?,
        bid_size: json_f64(&body["bidQty"], "bidQty").unwrap_or(0.0),
        ask: json_f64(&body["askPrice"], "askPrice")?,
        ask_size: json_f64(&body["askQty"], "askQty").unwrap_or(0.0),
        last: json_f64(&body["lastPrice"], "lastPrice")?,
        last_size: json_f64(&body["lastQty"], "lastQty").unwrap_or(0.0),
        volume: json_f64(&body["volume"], "volume").unwrap_or(0.0),
        change: json_f64(&body["priceChange"], "priceChange").unwrap_or(0.0),
        change_percent: json_f64(&body["priceChangePercent"], "priceChangePercent")
            .unwrap_or(0.0),
        high: json_f64(&body["highPrice"], "highPrice").unwrap_or(0.0),
        low: json_f64(&body["lowPrice"], "lowPrice").unwrap_or(0.0),
        open: json_f64(&body["openPrice"], "openPrice").unwrap_or(0.0),
        previous_close: json_f64(&body["prevClosePrice"], "prevClosePrice").unwrap_or(0.0),
        timestamp: body["closeTime"].as_i64().unwrap_or(0),
        source: QuoteSource::Binance,
    };

    if !quote.is_coherent() {
        return Err(FeedError::parse("binance ticker failed coherence check"));
    }
    Ok(quote)
}

/// Klines arrive as arrays:
/// [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume, ...
fn parse_klines(body: &Value) -> Result<Vec<Candle>, FeedError> {
    let rows = body
        .as_array()
        .ok_or_else(|| FeedError::parse("klines response is not an array"))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let arr = match row.as_array() {
            Some(a) if a.len() >= 6 => a,
            _ => {
                warn!("skipping malformed kline row");
                continue;
            }
        };

        candles.push(Candle::new(
            arr[0].as_i64().unwrap_or(0) / 1000,
            json_f64(&arr[1], "kline.open")?,
            json_f64(&arr[2], "kline.high")?,
            json_f64(&arr[3], "kline.low")?,
            json_f64(&arr[4], "kline.close")?,
            json_f64(&arr[5], "kline.volume")?,
        ));
    }
    Ok(candles)
}

fn parse_depth(symbol: &str, body: &Value, levels: usize) -> Result<OrderBook, FeedError> {
    let side = |field: &str| -> Result<Vec<BookLevel>, FeedError> {
        body[field]
            .as_array()
            .ok_or_else(|| FeedError::parse(format!("depth missing {field}")))?
            .iter()
            .take(levels)
            .map(|pair| {
                Ok(BookLevel {
                    price: json_f64(&pair[0], "depth.price")?,
                    size: json_f64(&pair[1], "depth.size")?,
                    orders: None,
                })
            })
            .collect()
    };

    let bids = side("bids")?;
    let asks = side("asks")?;

    let spread = match (bids.first(), asks.first()) {
        (Some(b), Some(a)) => a.price - b.price,
        _ => return Err(FeedError::parse("depth has an empty side")),
    };

    let book = OrderBook {
        symbol: symbol.to_string(),
        bids,
        asks,
        spread,
        timestamp: crate::types::current_millis(),
    };

    if !book.is_uncrossed() {
        return Err(FeedError::parse("binance depth is crossed"));
    }
    Ok(book)
}

// =============================================================================
// Tests
// =============================================================================
