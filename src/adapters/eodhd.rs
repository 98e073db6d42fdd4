// =============================================================================
// EODHD REST Adapter — universal fallback + REST-only futures coverage
// =============================================================================
//
// Serves two roles: real-time quotes/intraday candles for symbols that lack
// WebSocket coverage (oil/gas/copper futures), and the universal fallback
// for everything else. Symbols are mapped onto EODHD's exchange-suffixed
// codes ("EUR/USD" -> "EURUSD.FOREX", "NVDA" -> "NVDA.US"); a symbol with
// no mapping is simply not served here and the provider routes around it.
//
// Key-gated: self-disables without EODHD_API_KEY. The token bucket is held
// at 50/min, far below the published 1000/min, because this adapter backs
// every asset class at once.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::adapters::{
    json_f64, json_f64_or, status_error, transport_error, with_single_retry, BrokerAdapter,
};
use crate::rate_limit::{budgets, TokenBucket, TokenBucketSnapshot};
use crate::types::{
    current_millis, AssetType, Candle, FeedError, FetchOutcome, Quote, QuoteSource,
    SymbolBinding,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Half-spread for synthesized bid/ask; the real-time endpoint has no NBBO.
const SYNTH_HALF_SPREAD_BPS: f64 = 2.0;

/// Commodity futures with an EODHD mapping. Membership is configuration —
/// symbols outside this table fall through to Yahoo.
const COMMODITY_CODES: &[(&str, &str)] = &[
    ("GC=F", "GC.COMM"),
    ("SI=F", "SI.COMM"),
    ("CL=F", "CL.COMM"),
    ("NG=F", "NG.COMM"),
    ("HG=F", "HG.COMM"),
];

pub struct EodhdRestAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    bindings: Arc<HashMap<String, SymbolBinding>>,
    limiter: TokenBucket,
}

impl EodhdRestAdapter {
    pub fn new(api_key: Option<String>, bindings: Arc<HashMap<String, SymbolBinding>>) -> Self {
        Self::with_base_url("https://eodhd.com", api_key, bindings)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: Option<String>,
        bindings: Arc<HashMap<String, SymbolBinding>>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            bindings,
            limiter: TokenBucket::per_minute(budgets::EODHD_PER_MIN),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn limiter(&self) -> &TokenBucket {
        &self.limiter
    }

    /// Whether this adapter can serve `symbol` at all.
    pub fn has_mapping(&self, symbol: &str) -> bool {
        self.map_symbol(symbol).is_some()
    }

    fn map_symbol(&self, symbol: &str) -> Option<String> {
        let asset = self.bindings.get(symbol).map(|b| b.asset_type)?;
        map_code(symbol, asset)
    }

    async fn fetch_json(&self, path_and_query: &str) -> Result<Value, FeedError> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| FeedError::disabled("EODHD_API_KEY not configured"))?;

        if !self.limiter.consume_token() {
            return Err(FeedError::RateLimit {
                source: QuoteSource::Eodhd,
            });
        }

        let sep = if path_and_query.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}{}api_token={}&fmt=json",
            self.base_url, path_and_query, sep, key
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

        serde_json::from_str(&body).map_err(|e| FeedError::parse(format!("eodhd JSON: {e}")))
    }
}

#[async_trait]
impl BrokerAdapter for EodhdRestAdapter {
    fn name(&self) -> QuoteSource {
        QuoteSource::Eodhd
    }

    fn supports(&self, symbol: &str) -> bool {
        self.is_configured() && self.has_mapping(symbol)
    }

    fn rate_limit(&self) -> Option<TokenBucketSnapshot> {
        Some(self.limiter.snapshot())
    }

    #[instrument(skip(self), name = "eodhd::get_quote")]
    async fn get_quote(&self, symbol: &str) -> FetchOutcome<Quote> {
        let started = Instant::now();
        let code = match self.map_symbol(symbol) {
            Some(c) => c,
            None => {
                return FetchOutcome::err(
                    QuoteSource::Eodhd,
                    0,
                    FeedError::parse(format!("no EODHD mapping for {symbol}")),
                )
            }
        };

        let result = with_single_retry(|| async {
            let body = self.fetch_json(&format!("/api/real-time/{code}")).await?;
            parse_real_time(symbol, &body)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(quote) => {
                debug!(symbol, code, last = quote.last, "eodhd quote");
                FetchOutcome::ok(QuoteSource::Eodhd, latency, quote)
            }
            Err(e) => {
                warn!(symbol, code, error = %e, "eodhd quote failed");
                FetchOutcome::err(QuoteSource::Eodhd, latency, e)
            }
        }
    }

    #[instrument(skip(self), name = "eodhd::get_candles")]
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> FetchOutcome<Vec<Candle>> {
        let started = Instant::now();
        let code = match self.map_symbol(symbol) {
            Some(c) => c,
            None => {
                return FetchOutcome::err(
                    QuoteSource::Eodhd,
                    0,
                    FeedError::parse(format!("no EODHD mapping for {symbol}")),
                )
            }
        };
        let interval = map_interval(timeframe);

        let result = with_single_retry(|| async {
            let body = self
                .fetch_json(&format!("/api/intraday/{code}?interval={interval}"))
                .await?;
            parse_intraday(&body, limit)
        })
        .await;

        let latency = started.elapsed().as_millis() as u64;
        match result {
            Ok(candles) => FetchOutcome::ok(QuoteSource::Eodhd, latency, candles),
            Err(e) => FetchOutcome::err(QuoteSource::Eodhd, latency, e),
        }
    }

    async fn check_health(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        let key = self.api_key.as_ref().expect("checked above");
        let url = format!(
            "{}/api/real-time/AAPL.US?api_token={}&fmt=json",
            self.base_url, key
        );
        match self.client.get(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

// -----------------------------------------------------------------------------
// Symbol / interval mapping
// -----------------------------------------------------------------------------

/// Translate a canonical symbol into EODHD's suffixed code.
pub fn map_code(symbol: &str, asset: AssetType) -> Option<String> {
    match asset {
        AssetType::Forex => {
            // "EUR/USD" -> "EURUSD.FOREX"
            let (base, quote) = symbol.split_once('/')?;
            Some(format!("{base}{quote}.FOREX"))
        }
        AssetType::Crypto => Some(format!("{symbol}-USD.CC")),
        AssetType::Stock => Some(format!("{symbol}.US")),
        AssetType::Commodity => COMMODITY_CODES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, code)| (*code).to_string()),
    }
}

fn map_interval(timeframe: &str) -> &'static str {
    match timeframe {
        "1m" => "1m",
        "5m" => "5m",
        "1h" => "1h",
        other => {
            warn!(timeframe = other, "EODHD supports 1m/5m/1h — defaulting to 1m");
            "1m"
        }
    }
}

// -----------------------------------------------------------------------------
// Parsing
// -----------------------------------------------------------------------------

fn parse_real_time(symbol: &str, body: &Value) -> Result<Quote, FeedError> {
    let last = json_f64(&body["close"], "close")?;
    let previous_close = json_f64_or(&body["previousClose"], "previousClose", last);
    let ts_secs = body["timestamp"]
        .as_i64()
        .unwrap_or_else(|| current_millis() / 1000);

    let (bid, ask) = Quote::synth_spread(last, SYNTH_HALF_SPREAD_BPS);

    let quote = Quote {
        symbol: symbol.to_string(),
        bid,
        bid_size: 0.0,
        ask,
        ask_size: 0.0,
        last,
        last_size: 0.0,
        volume: json_f64_or(&body["volume"], "volume", 0.0),
        change: json_f64_or(&body["change"], "change", last - previous_close),
        change_percent: json_f64_or(&body["change_p"], "change_p", 0.0),
        high: json_f64_or(&body["high"], "high", last),
        low: json_f64_or(&body["low"], "low", last),
        open: json_f64_or(&body["open"], "open", previous_close),
        previous_close,
        timestamp: ts_secs * 1000,
        source: QuoteSource::Eodhd,
    };

    if !quote.is_coherent() {
        return Err(FeedError::parse("eodhd quote failed coherence check"));
    }
    Ok(quote)
}

fn parse_intraday(body: &Value, limit: usize) -> Result<Vec<Candle>, FeedError> {
    let rows = body
        .as_array()
        .ok_or_else(|| FeedError::parse("intraday response is not an array"))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let time = match row["timestamp"].as_i64() {
            Some(t) => t,
            None => continue,
        };
        let candle = Candle::new(
            time,
            json_f64(&row["open"], "open")?,
            json_f64(&row["high"], "high")?,
            json_f64(&row["low"], "low")?,
            json_f64(&row["close"], "close")?,
            json_f64_or(&row["volume"], "volume", 0.0),
        );
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
