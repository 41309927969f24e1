use super::{ExchangeError, MarketData, OrderReceipt, OrderSubmitter};
use crate::models::{BalanceSnapshot, Candle, OrderSide};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use rust_decimal::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// Kraken Spot REST API
// Docs: https://docs.kraken.com/api/docs/rest-api/add-order
pub const KRAKEN_API_BASE: &str = "https://api.kraken.com";
const MAX_RETRIES: u32 = 3;
/// Kraken lot precision for the tracked pairs; volumes are truncated to this
pub const VOLUME_DECIMALS: u32 = 8;

type HmacSha512 = Hmac<Sha512>;

type KrakenRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Clone)]
pub struct KrakenConfig {
    pub base_url: String,
    pub api_key: String,
    /// Base64-encoded private key as issued by Kraken
    pub api_secret: String,
    /// Ask Kraken to validate orders without placing them
    pub dry_run: bool,
    pub requests_per_minute: u32,
    pub timeout: Duration,
    /// First backoff for retried public requests, doubled per attempt
    pub retry_backoff: Duration,
}

impl KrakenConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: KRAKEN_API_BASE.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            dry_run: false,
            requests_per_minute: 15,
            timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

impl fmt::Debug for KrakenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KrakenConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("dry_run", &self.dry_run)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("timeout", &self.timeout)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

/// Kraken REST client for balances, OHLC candles and market orders
///
/// Public requests are retried on network errors, 429 and 5xx. Private
/// requests are sent once: a retried order could be placed twice.
#[derive(Clone)]
pub struct KrakenClient {
    client: Client,
    config: KrakenConfig,
    secret: Vec<u8>,
    rate_limiter: Arc<KrakenRateLimiter>,
    last_nonce: Arc<AtomicU64>,
}

#[derive(Debug, Deserialize)]
struct KrakenResponse<T> {
    #[serde(default)]
    error: Vec<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AddOrderResult {
    #[serde(default)]
    descr: Option<OrderDescription>,
    #[serde(default)]
    txid: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OrderDescription {
    order: String,
}

impl KrakenClient {
    pub fn new(config: KrakenConfig) -> Result<Self, ExchangeError> {
        if config.api_key.trim().is_empty() {
            return Err(ExchangeError::Credentials("API key is empty".to_string()));
        }
        let secret = STANDARD
            .decode(config.api_secret.trim())
            .map_err(|e| ExchangeError::Credentials(format!("private key is not base64: {}", e)))?;

        let rpm = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            ExchangeError::Config("requests_per_minute must be greater than zero".to_string())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            secret,
            rate_limiter,
            last_nonce: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Millisecond nonce, strictly increasing across calls
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let mut previous = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(previous + 1);
            match self.last_nonce.compare_exchange_weak(
                previous,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }

    /// Rate-limited public GET with retry logic
    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let url = format!("{}{}", self.config.base_url, path);

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;
            let backoff = self.config.retry_backoff * 2u32.pow(attempt - 1);

            match self.client.get(&url).query(query).send().await {
                Ok(response) => {
                    let status = response.status();
                    let retryable = status.as_u16() == 429 || status.is_server_error();

                    if retryable && attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Kraken returned {} for {}, retrying in {:?} (attempt {}/{})",
                            status,
                            path,
                            backoff,
                            attempt,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    return read_envelope(response).await;
                }
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        "Network error on {}: {}, retrying in {:?} (attempt {}/{})",
                        path,
                        e,
                        backoff,
                        attempt,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ExchangeError::Decode(format!(
            "no response from {} after {} attempts",
            path, MAX_RETRIES
        )))
    }

    /// Signed private POST, sent exactly once
    async fn private_post<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<(&str, String)>,
    ) -> Result<T, ExchangeError> {
        let path = format!("/0/private/{}", method);

        self.rate_limiter.until_ready().await;
        let nonce = self.next_nonce();

        let mut form = Vec::with_capacity(params.len() + 1);
        form.push(("nonce", nonce.to_string()));
        form.extend(params);
        let post_data = serde_urlencoded::to_string(&form)
            .map_err(|e| ExchangeError::Decode(format!("cannot encode request: {}", e)))?;

        let signature = sign_request(&self.secret, &path, nonce, &post_data)?;

        let response = self
            .client
            .post(format!("{}{}", self.config.base_url, path))
            .header("API-Key", &self.config.api_key)
            .header("API-Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(post_data)
            .send()
            .await?;

        read_envelope(response).await
    }
}

#[async_trait]
impl MarketData for KrakenClient {
    async fn get_balances(&self) -> Result<BalanceSnapshot, ExchangeError> {
        let raw: HashMap<String, String> = self.private_post("Balance", Vec::new()).await?;

        let balances = raw
            .into_iter()
            .map(|(asset, amount)| {
                amount
                    .trim()
                    .parse::<f64>()
                    .map(|value| (asset.clone(), value))
                    .map_err(|e| {
                        ExchangeError::Decode(format!("balance for {} ('{}'): {}", asset, amount, e))
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        tracing::debug!("Fetched {} balances", balances.len());

        Ok(BalanceSnapshot::new(balances))
    }

    async fn get_candles(
        &self,
        pair_id: &str,
        interval_minutes: u32,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = [
            ("pair", pair_id.to_string()),
            ("interval", interval_minutes.to_string()),
        ];
        let result: serde_json::Map<String, Value> = self.public_get("/0/public/OHLC", &query).await?;

        let candles = parse_ohlc(pair_id, &result)?;
        tracing::debug!("Fetched {} candles for {}", candles.len(), pair_id);

        Ok(candles)
    }
}

#[async_trait]
impl OrderSubmitter for KrakenClient {
    async fn submit_market_order(
        &self,
        pair_id: &str,
        side: OrderSide,
        volume: f64,
    ) -> Result<OrderReceipt, ExchangeError> {
        let volume_text = format_volume(volume)?;
        let submitted: f64 = volume_text
            .parse()
            .map_err(|_| ExchangeError::InvalidVolume(volume))?;
        let client_order_id = Uuid::new_v4().to_string();

        let mut params = vec![
            ("ordertype", "market".to_string()),
            ("type", side.as_str().to_string()),
            ("volume", volume_text),
            ("pair", pair_id.to_string()),
            ("cl_ord_id", client_order_id.clone()),
        ];
        if self.config.dry_run {
            params.push(("validate", "true".to_string()));
        }

        let result: AddOrderResult = self.private_post("AddOrder", params).await?;

        Ok(OrderReceipt {
            txids: result.txid,
            description: result.descr.map(|d| d.order).unwrap_or_default(),
            client_order_id,
            volume: submitted,
            validated_only: self.config.dry_run,
        })
    }
}

/// Compute Kraken's `API-Sign` header:
/// base64(HMAC-SHA512(secret, path + SHA256(nonce + post_data)))
pub fn sign_request(
    secret: &[u8],
    path: &str,
    nonce: u64,
    post_data: &str,
) -> Result<String, ExchangeError> {
    let mut sha = Sha256::new();
    sha.update(nonce.to_string().as_bytes());
    sha.update(post_data.as_bytes());
    let digest = sha.finalize();

    let mut mac = HmacSha512::new_from_slice(secret)
        .map_err(|e| ExchangeError::Credentials(e.to_string()))?;
    mac.update(path.as_bytes());
    mac.update(&digest);

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Decimal text for an order volume, truncated so it never exceeds `volume`
///
/// Truncation starts from the shortest decimal text of the float, so 0.3
/// stays 0.3 instead of becoming 0.29999999.
pub fn format_volume(volume: f64) -> Result<String, ExchangeError> {
    if !volume.is_finite() {
        return Err(ExchangeError::InvalidVolume(volume));
    }
    let decimal =
        Decimal::from_str(&volume.to_string()).map_err(|_| ExchangeError::InvalidVolume(volume))?;
    let truncated = decimal
        .round_dp_with_strategy(VOLUME_DECIMALS, RoundingStrategy::ToZero)
        .normalize();

    if truncated <= Decimal::ZERO {
        return Err(ExchangeError::InvalidVolume(volume));
    }

    Ok(truncated.to_string())
}

async fn read_envelope<T: DeserializeOwned>(response: Response) -> Result<T, ExchangeError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ExchangeError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let envelope: KrakenResponse<T> = serde_json::from_str(&body)
        .map_err(|e| ExchangeError::Decode(format!("{}: {}", e, body)))?;

    if !envelope.error.is_empty() {
        return Err(ExchangeError::Api(envelope.error));
    }

    envelope
        .result
        .ok_or_else(|| ExchangeError::Decode("response has no result".to_string()))
}

/// Kraken keys the series by its own pair name (e.g. `XDGCAD` for
/// `DOGECAD`) next to a `last` cursor, so take the first array value.
fn parse_ohlc(
    pair_id: &str,
    result: &serde_json::Map<String, Value>,
) -> Result<Vec<Candle>, ExchangeError> {
    let rows = result
        .iter()
        .filter(|(key, _)| key.as_str() != "last")
        .find_map(|(_, value)| value.as_array())
        .ok_or_else(|| ExchangeError::Decode(format!("no OHLC series for {}", pair_id)))?;

    let mut candles = rows
        .iter()
        .map(|row| parse_ohlc_row(pair_id, row))
        .collect::<Result<Vec<_>, _>>()?;
    candles.sort_by_key(|c| c.timestamp);

    Ok(candles)
}

// [time, open, high, low, close, vwap, volume, count]
fn parse_ohlc_row(pair_id: &str, row: &Value) -> Result<Candle, ExchangeError> {
    let fields = row
        .as_array()
        .filter(|fields| fields.len() >= 7)
        .ok_or_else(|| ExchangeError::Decode(format!("malformed OHLC row: {}", row)))?;

    let seconds = fields[0]
        .as_i64()
        .or_else(|| fields[0].as_f64().map(|t| t as i64))
        .ok_or_else(|| ExchangeError::Decode(format!("bad OHLC time: {}", fields[0])))?;
    let timestamp: DateTime<Utc> = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ExchangeError::Decode(format!("OHLC time out of range: {}", seconds)))?;

    Ok(Candle {
        pair: pair_id.to_string(),
        timestamp,
        open: number(&fields[1])?,
        high: number(&fields[2])?,
        low: number(&fields[3])?,
        close: number(&fields[4])?,
        volume: number(&fields[6])?,
    })
}

/// Kraken sends prices as strings
fn number(value: &Value) -> Result<f64, ExchangeError> {
    match value {
        Value::String(s) => s
            .parse()
            .map_err(|e| ExchangeError::Decode(format!("'{}' is not a number: {}", s, e))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Decode(format!("'{}' is not a number", n))),
        other => Err(ExchangeError::Decode(format!("'{}' is not a number", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_config(base_url: String) -> KrakenConfig {
        KrakenConfig {
            base_url,
            retry_backoff: Duration::from_millis(1),
            requests_per_minute: 600,
            ..KrakenConfig::new("test-key", STANDARD.encode("test-secret"))
        }
    }

    #[test]
    fn test_signature_matches_kraken_example() {
        let secret = STANDARD
            .decode("kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==")
            .unwrap();
        let signature = sign_request(
            &secret,
            "/0/private/AddOrder",
            1616492376594,
            "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25",
        )
        .unwrap();

        assert_eq!(
            signature,
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn test_format_volume_truncates() {
        assert_eq!(format_volume(7.5).unwrap(), "7.5");
        assert_eq!(format_volume(30.0).unwrap(), "30");
        assert_eq!(format_volume(0.123456789).unwrap(), "0.12345678");
        assert_eq!(format_volume(0.1).unwrap(), "0.1");
        assert_eq!(format_volume(0.3).unwrap(), "0.3");
        assert_eq!(format_volume(0.1 + 0.2).unwrap(), "0.3");
        assert_eq!(format_volume(1.2 * 0.75).unwrap(), "0.89999999");
        assert_eq!(format_volume(6_075_331.123456789).unwrap(), "6075331.12345678");
    }

    #[test]
    fn test_format_volume_rejects_untradable() {
        assert!(matches!(format_volume(0.0), Err(ExchangeError::InvalidVolume(_))));
        assert!(matches!(format_volume(-2.0), Err(ExchangeError::InvalidVolume(_))));
        assert!(matches!(format_volume(1e-9), Err(ExchangeError::InvalidVolume(_))));
        assert!(matches!(format_volume(f64::NAN), Err(ExchangeError::InvalidVolume(_))));
    }

    #[test]
    fn test_bad_secret_rejected() {
        let config = KrakenConfig::new("key", "not base64 at all!");
        assert!(matches!(KrakenClient::new(config), Err(ExchangeError::Credentials(_))));

        let config = KrakenConfig::new("", STANDARD.encode("secret"));
        assert!(matches!(KrakenClient::new(config), Err(ExchangeError::Credentials(_))));
    }

    #[test]
    fn test_nonce_strictly_increases() {
        let client = KrakenClient::new(test_config(KRAKEN_API_BASE.to_string())).unwrap();
        let first = client.next_nonce();
        let second = client.next_nonce();
        let third = client.next_nonce();
        assert!(first < second && second < third);
    }

    #[tokio::test]
    async fn test_get_candles_parses_ohlc() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/0/public/OHLC")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("pair".into(), "DOGECAD".into()),
                Matcher::UrlEncoded("interval".into(), "1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":[],"result":{"XDGCAD":[
                    [1710410760,"0.2210","0.2215","0.2208","0.2212","0.2211","1520.5",12],
                    [1710410820,"0.2212","0.2220","0.2211","0.2219","0.2216","980.0",7]
                ],"last":1710410760}}"#,
            )
            .create_async()
            .await;

        let client = KrakenClient::new(test_config(server.url())).unwrap();
        let candles = client.get_candles("DOGECAD", 1).await.unwrap();

        mock.assert_async().await;
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].pair, "DOGECAD");
        assert_eq!(candles[0].close, 0.2212);
        assert_eq!(candles[1].close, 0.2219);
        assert_eq!(candles[1].volume, 980.0);
        assert!(candles[0].timestamp < candles[1].timestamp);
    }

    #[tokio::test]
    async fn test_api_error_array_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/0/public/OHLC")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error":["EQuery:Unknown asset pair"]}"#)
            .create_async()
            .await;

        let client = KrakenClient::new(test_config(server.url())).unwrap();
        let err = client.get_candles("NOPEUSD", 1).await.unwrap_err();

        match err {
            ExchangeError::Api(messages) => assert_eq!(messages, vec!["EQuery:Unknown asset pair"]),
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_public_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/0/public/OHLC")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("unavailable")
            .expect(3)
            .create_async()
            .await;

        let client = KrakenClient::new(test_config(server.url())).unwrap();
        let err = client.get_candles("DOGECAD", 1).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, ExchangeError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_get_balances_signs_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/Balance")
            .match_header("API-Key", "test-key")
            .match_header("API-Sign", Matcher::Regex(r"^[A-Za-z0-9+/]{86}==$".to_string()))
            .match_body(Matcher::Regex(r"^nonce=\d+$".to_string()))
            .with_status(200)
            .with_body(r#"{"error":[],"result":{"ZCAD":"152.2500","XXDG":"1200.00000000"}}"#)
            .create_async()
            .await;

        let client = KrakenClient::new(test_config(server.url())).unwrap();
        let balances = client.get_balances().await.unwrap();

        mock.assert_async().await;
        assert_eq!(balances.get("ZCAD"), 152.25);
        assert_eq!(balances.get("XXDG"), 1200.0);
    }

    #[tokio::test]
    async fn test_private_requests_are_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/Balance")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let client = KrakenClient::new(test_config(server.url())).unwrap();
        let err = client.get_balances().await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, ExchangeError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_submit_market_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/AddOrder")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("ordertype=market".to_string()),
                Matcher::Regex("type=buy".to_string()),
                Matcher::Regex("volume=7.5".to_string()),
                Matcher::Regex("pair=DOGECAD".to_string()),
                Matcher::Regex("cl_ord_id=[0-9a-f-]{36}".to_string()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"error":[],"result":{"descr":{"order":"buy 7.50000000 DOGECAD @ market"},"txid":["OUF4EM-FRGI2-MQMWZD"]}}"#,
            )
            .create_async()
            .await;

        let client = KrakenClient::new(test_config(server.url())).unwrap();
        let receipt = client
            .submit_market_order("DOGECAD", OrderSide::Buy, 7.5)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(receipt.txids, vec!["OUF4EM-FRGI2-MQMWZD"]);
        assert_eq!(receipt.description, "buy 7.50000000 DOGECAD @ market");
        assert_eq!(receipt.volume, 7.5);
        assert!(!receipt.validated_only);
    }

    #[tokio::test]
    async fn test_dry_run_only_validates() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/AddOrder")
            .match_body(Matcher::Regex("validate=true".to_string()))
            .with_status(200)
            .with_body(r#"{"error":[],"result":{"descr":{"order":"sell 30.00000000 DOGECAD @ market"}}}"#)
            .create_async()
            .await;

        let config = KrakenConfig {
            dry_run: true,
            ..test_config(server.url())
        };
        let client = KrakenClient::new(config).unwrap();
        let receipt = client
            .submit_market_order("DOGECAD", OrderSide::Sell, 30.0)
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(receipt.validated_only);
        assert!(receipt.txids.is_empty());
    }

    #[tokio::test]
    async fn test_untradable_volume_never_sent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/0/private/AddOrder")
            .expect(0)
            .create_async()
            .await;

        let client = KrakenClient::new(test_config(server.url())).unwrap();
        let err = client
            .submit_market_order("DOGECAD", OrderSide::Buy, 1e-12)
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, ExchangeError::InvalidVolume(_)));
    }
}
