// =============================================================================
// Binance REST API Client — historical klines + HMAC-SHA256 signing
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift. Public kline retrieval is unsigned.
// =============================================================================

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::market_data::Candle;
use crate::settings::ServiceSettings;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Largest page the klines endpoint serves.
pub const MAX_KLINES_LIMIT: usize = 1000;

/// Minimum fields per kline row: openTime, O, H, L, C, V, closeTime.
const KLINE_MIN_FIELDS: usize = 7;

/// Binance REST API client with bounded retry and HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct BinanceClient {
    secret: String,
    base_url: String,
    attempts: u32,
    retry_delay: Duration,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(settings: &ServiceSettings) -> EngineResult<Self> {
        let mut default_headers = HeaderMap::new();
        if !settings.api_key.is_empty() {
            let val = HeaderValue::from_str(&settings.api_key)
                .map_err(|e| EngineError::Protocol(format!("invalid API key header: {e}")))?;
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(settings.http_timeout())
            .build()
            .map_err(|e| EngineError::Protocol(format!("failed to build HTTP client: {e}")))?;

        debug!(base_url = %settings.rest_base_url, "BinanceClient initialised");

        Ok(Self {
            secret: settings.api_secret.clone(),
            base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            attempts: settings.fetch_attempts.max(1),
            retry_delay: settings.fetch_retry_delay(),
            client,
        })
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> String {
        sign_with(&self.secret, query)
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    pub fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public, unsigned).
    ///
    /// Returns candles oldest-first. Transport failures and non-success
    /// statuses are retried a fixed number of times with a fixed delay; a body
    /// with an unexpected shape fails immediately.
    #[instrument(skip(self), name = "binance::fetch_candles")]
    pub async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> EngineResult<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINES_LIMIT);
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            interval,
            limit
        );

        let mut last_error = String::new();
        let mut body = None;
        for attempt in 1..=self.attempts {
            match self.get_body(&url).await {
                Ok(text) => {
                    debug!(symbol, interval, attempt, bytes = text.len(), "klines response received");
                    body = Some(text);
                    break;
                }
                Err(e) => {
                    warn!(symbol, interval, attempt, error = %e, "klines request failed");
                    last_error = e;
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let Some(body) = body else {
            return Err(EngineError::TransientNetwork {
                attempts: self.attempts,
                message: last_error,
            });
        };

        // A successful response that does not decode is not retried.
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| EngineError::Protocol(format!("klines response is not JSON: {e}")))?;
        let candles = parse_klines(&value)?;
        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// One GET round trip returning the raw body. Every failure mode here is
    /// retryable, so it is reported as a plain message.
    async fn get_body(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("GET /api/v3/klines returned {status}: {body}"));
        }

        resp.text()
            .await
            .map_err(|e| format!("failed to read klines response: {e}"))
    }
}

fn sign_with(secret: &str, query: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Parse Binance's array-of-arrays klines body.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
///   [6] closeTime, ...
pub fn parse_klines(body: &Value) -> EngineResult<Vec<Candle>> {
    let rows = body
        .as_array()
        .ok_or_else(|| EngineError::Protocol("klines response is not an array".into()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let fields = row
                .as_array()
                .ok_or_else(|| EngineError::Protocol(format!("kline row {i} is not an array")))?;
            if fields.len() < KLINE_MIN_FIELDS {
                return Err(EngineError::Protocol(format!(
                    "kline row {i} has {} fields, expected at least {KLINE_MIN_FIELDS}",
                    fields.len()
                )));
            }

            Ok(Candle {
                open_time: parse_i64(&fields[0], "openTime")?,
                open: parse_str_f64(&fields[1], "open")?,
                high: parse_str_f64(&fields[2], "high")?,
                low: parse_str_f64(&fields[3], "low")?,
                close: parse_str_f64(&fields[4], "close")?,
                volume: parse_str_f64(&fields[5], "volume")?,
                close_time: parse_i64(&fields[6], "closeTime")?,
            })
        })
        .collect()
}

fn parse_i64(val: &Value, name: &str) -> EngineResult<i64> {
    val.as_i64()
        .ok_or_else(|| EngineError::Protocol(format!("{name} is not an integer: {val}")))
}

/// Parse a JSON value that may be either a numeric string or a number.
pub(crate) fn parse_str_f64(val: &Value, name: &str) -> EngineResult<f64> {
    match val {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| EngineError::Protocol(format!("failed to parse {name} '{s}' as f64"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| EngineError::Protocol(format!("{name} is not a valid f64"))),
        _ => Err(EngineError::Protocol(format!(
            "{name} has unexpected JSON type: {val}"
        ))),
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("attempts", &self.attempts)
            .finish()
    }
}
