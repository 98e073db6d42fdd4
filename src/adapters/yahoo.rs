// =============================================================================
// Yahoo Finance Adapter — free-tier stock chart endpoint
// =============================================================================
//
// One chart request carries meta (last price, previous close, day range,
// volume) plus the intraday OHLCV arrays, so quote and candles share the
// same upstream call shape. The free feed has no NBBO; bid/ask are
// synthesized at ±2 bps around last. Requests go out with a browser
// User-Agent because the endpoint rejects generic clients.
//
// Health is probed at most once per 60 s and cached in between.
// =============================================================================

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::adapters::{
    json_f64, json_f64_or, status_error, transport_error, with_single_retry, BrokerAdapter,
};
use crate::rate_limit::{budgets, TokenBucket, TokenBucketSnapshot};
use crate::types::{current_millis, Candle, FeedError, FetchOutcome, Quote, QuoteSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_CACHE: Duration = Duration::from_secs(60);
const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:126.0) Gecko/20100101 Firefox/126.0";

/// Half-spread used to synthesize bid/ask around last.
const SYNTH_HALF_SPREAD_BPS: f64 = 2.0;

pub struct YahooAdapter {
    client: reqwest::Client,
    base_url: String,
    limiter: TokenBucket,
    health: RwLock<Option<(Instant, bool)>>,
}

impl YahooAdapter {
    pub fn new() -> Self {
        Self::with_base_url("https://query1.finance.yahoo.com")
    }

    /// Separate constructor so tests can point at a local server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            limiter: TokenBucket::per_minute(budgets::YAHOO_PER_MIN),
            health: RwLock::new(None),
        }
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    async fn fetch_chart(
        &self,
        symbol: &str,
        interval: &str,
        range: &str,
    ) -> Result<Value, FeedError> {
        if !self.limiter.consume_token() {
            return Err(FeedError::RateLimit {
                source: QuoteSource::Yahoo,
            });
        }

        let url = format!(
            "{}/v8/finance/chart/{}?interval={}&range={}&includePrePost=true",
            self.base_url, symbol, interval, range
        );

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

        serde_json::from_str(&body).map_err(|e| FeedError::parse(format!("chart JSON: {e}")))
    }
}

impl Default for YahooAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerAdapter for YahooAdapter {
    fn name(&self) -> QuoteSource {
        QuoteSource::Yahoo
    }

    fn rate_limit(&self) -> Option<TokenBucketSnapshot> {
        Some(self.limiter.snapshot())
    }

    #[instrument(skip(self), name = "yahoo::get_quote")]
    async fn get_quote(&self, symbol: &str) -> FetchOutcome<Quote> {
        let started = Instant::now();
        let result = with_single_retry(|| async {
            let chart = self.fetch_chart(symbol, "1m", "1d").await?;
            parse_chart_quote(symbol, &chart)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(quote) => {
                debug!(symbol, last = quote.last, latency, "yahoo quote");
                FetchOutcome::ok(QuoteSource::Yahoo, latency, quote)
            }
            Err(e) => {
                warn!(symbol, error = %e, "yahoo quote failed");
                FetchOutcome::err(QuoteSource::Yahoo, latency, e)
            }
        }
    }

    #[instrument(skip(self), name = "yahoo::get_candles")]
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> FetchOutcome<Vec<Candle>> {
        let started = Instant::now();
        let (interval, range) = map_timeframe(timeframe);

        let result = with_single_retry(|| async {
            let chart = self.fetch_chart(symbol, interval, range).await?;
            parse_chart_candles(&chart, limit)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(candles) => {
                debug!(symbol, timeframe, count = candles.len(), "yahoo candles");
                FetchOutcome::ok(QuoteSource::Yahoo, latency, candles)
            }
            Err(e) => FetchOutcome::err(QuoteSource::Yahoo, latency, e),
        }
    }

    async fn check_health(&self) -> bool {
        if let Some((probed_at, healthy)) = *self.health.read() {
            if probed_at.elapsed() < HEALTH_CACHE {
                return healthy;
            }
        }

        let url = format!("{}/v8/finance/chart/SPY?interval=1d&range=1d", self.base_url);
        let healthy = match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        };

        *self.health.write() = Some((Instant::now(), healthy));
        healthy
    }
}

// -----------------------------------------------------------------------------
// Parsing
// -----------------------------------------------------------------------------

/// Map our canonical timeframes onto Yahoo's (interval, range) pairs.
fn map_timeframe(timeframe: &str) -> (&'static str, &'static str) {
    match timeframe {
        "1m" => ("1m", "1d"),
        "5m" => ("5m", "5d"),
        "15m" => ("15m", "5d"),
        "1h" => ("60m", "1mo"),
        "1d" => ("1d", "3mo"),
        other => {
            warn!(timeframe = other, "unknown timeframe — defaulting to 1m/1d");
            ("1m", "1d")
        }
    }
}

fn chart_result(root: &Value) -> Result<&Value, FeedError> {
    let result = &root["chart"]["result"][0];
    if result.is_null() {
        // Yahoo reports symbol errors inside the chart envelope.
        let detail = root["chart"]["error"]["description"]
            .as_str()
            .unwrap_or("empty chart result");
        return Err(FeedError::parse(detail.to_string()));
    }
    Ok(result)
}

fn parse_chart_quote(symbol: &str, root: &Value) -> Result<Quote, FeedError> {
    let result = chart_result(root)?;
    let meta = &result["meta"];

    let last = json_f64(&meta["regularMarketPrice"], "meta.regularMarketPrice")?;
    let previous_close = json_f64_or(
        &meta["chartPreviousClose"],
        "meta.chartPreviousClose",
        json_f64_or(&meta["previousClose"], "meta.previousClose", last),
    );
    let high = json_f64_or(&meta["regularMarketDayHigh"], "meta.regularMarketDayHigh", last);
    let low = json_f64_or(&meta["regularMarketDayLow"], "meta.regularMarketDayLow", last);
    let volume = json_f64_or(&meta["regularMarketVolume"], "meta.regularMarketVolume", 0.0);
    let ts_secs = meta["regularMarketTime"]
        .as_i64()
        .unwrap_or_else(|| current_millis() / 1000);

    // First non-null open of the session, if the arrays are present.
    let open = result["indicators"]["quote"][0]["open"]
        .as_array()
        .and_then(|arr| arr.iter().find_map(Value::as_f64))
        .unwrap_or(previous_close);

    let (bid, ask) = Quote::synth_spread(last, SYNTH_HALF_SPREAD_BPS);
    let change = last - previous_close;

    let quote = Quote {
        symbol: symbol.to_string(),
        bid,
        bid_size: 0.0,
        ask,
        ask_size: 0.0,
        last,
        last_size: 0.0,
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
        timestamp: ts_secs * 1000,
        source: QuoteSource::Yahoo,
    };

    if !quote.is_coherent() {
        return Err(FeedError::parse("yahoo quote failed coherence check"));
    }
    Ok(quote)
}

fn parse_chart_candles(root: &Value, limit: usize) -> Result<Vec<Candle>, FeedError> {
    let result = chart_result(root)?;

    let timestamps = result["timestamp"]
        .as_array()
        .ok_or_else(|| FeedError::parse("chart result missing timestamp array"))?;
    let ohlcv = &result["indicators"]["quote"][0];

    let opens = ohlcv["open"].as_array();
    let highs = ohlcv["high"].as_array();
    let lows = ohlcv["low"].as_array();
    let closes = ohlcv["close"].as_array();
    let volumes = ohlcv["volume"].as_array();

    let (opens, highs, lows, closes, volumes) = match (opens, highs, lows, closes, volumes) {
        (Some(o), Some(h), Some(l), Some(c), Some(v)) => (o, h, l, c, v),
        _ => return Err(FeedError::parse("chart result missing OHLCV arrays")),
    };

    let mut candles = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        // Yahoo pads illiquid minutes with nulls — skip them.
        let (time, o, h, l, c) = match (
            ts.as_i64(),
            opens.get(i).and_then(Value::as_f64),
            highs.get(i).and_then(Value::as_f64),
            lows.get(i).and_then(Value::as_f64),
            closes.get(i).and_then(Value::as_f64),
        ) {
            (Some(t), Some(o), Some(h), Some(l), Some(c)) => (t, o, h, l, c),
            _ => continue,
        };
        let v = volumes.get(i).and_then(Value::as_f64).unwrap_or(0.0);

        let candle = Candle::new(time, o, h, l, c, v);
        if candle.is_valid() {
            candles.push(candle);
        }
    }

    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    Ok(candles)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chart_fixture() -> Value {
        serde_json::json!({
            "chart": {
                "result": [{
                    "meta": {
                        "regularMarketPrice": 185.41,
                        "chartPreviousClose": 183.20,
                        "regularMarketDayHigh": 186.0,
                        "regularMarketDayLow": 182.9,
                        "regularMarketVolume": 41230000,
                        "regularMarketTime": 1700000000
                    },
                    "timestamp": [1699999800, 1699999860, 1699999920],
                    "indicators": {
                        "quote": [{
                            "open":   [183.5, 184.0, null],
                            "high":   [184.2, 184.9, null],
                            "low":    [183.1, 183.8, null],
                            "close":  [184.0, 184.7, null],
                            "volume": [120000, 98000, null]
                        }]
                    }
                }],
                "error": null
            }
        })
    }

    #[test]
    fn quote_parses_and_synthesizes_nbbo() {
        let q = parse_chart_quote("NVDA", &chart_fixture()).unwrap();
        assert_eq!(q.symbol, "NVDA");
        assert_eq!(q.source, QuoteSource::Yahoo);
        assert!((q.last - 185.41).abs() < 1e-9);
        // ±2 bps around last.
        assert!(q.bid < q.last && q.last < q.ask);
        assert!((q.ask - q.bid) / q.last < 0.0005);
        assert!((q.change - 2.21).abs() < 1e-9);
        assert_eq!(q.timestamp, 1_700_000_000_000);
        assert!(q.is_coherent());
    }

    #[test]
    fn candles_skip_null_padding() {
        let candles = parse_chart_candles(&chart_fixture(), 10).unwrap();
        // Third row is null-padded and must be dropped.
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, 1_699_999_800);
        assert!((candles[1].close - 184.7).abs() < 1e-9);
    }

    #[test]
    fn candles_respect_limit() {
        let candles = parse_chart_candles(&chart_fixture(), 1).unwrap();
        assert_eq!(candles.len(), 1);
        // The most recent bar survives.
        assert_eq!(candles[0].time, 1_699_999_860);
    }

    #[test]
    fn chart_error_surfaces_description() {
        let root = serde_json::json!({
            "chart": { "result": null, "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" } }
        });
        let err = parse_chart_quote("ZZZZ", &root).unwrap_err();
        assert_eq!(err.kind(), "parse");
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn timeframe_mapping() {
        assert_eq!(map_timeframe("1m"), ("1m", "1d"));
        assert_eq!(map_timeframe("1h"), ("60m", "1mo"));
        assert_eq!(map_timeframe("bogus"), ("1m", "1d"));
    }
}
