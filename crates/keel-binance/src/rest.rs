//! Binance USDT-margined futures REST client.
//!
//! Provides listen-key management, market/account queries, and signed order
//! requests against the `/fapi` API.
//!
//! # REST endpoints
//!
//! | Operation          | Method | Path                          |
//! |--------------------|--------|-------------------------------|
//! | Exchange info      | GET    | `/fapi/v1/exchangeInfo`       |
//! | Leverage brackets  | GET    | `/fapi/v1/leverageBracket`    |
//! | 24h tickers        | GET    | `/fapi/v1/ticker/24hr`        |
//! | Book tickers       | GET    | `/fapi/v1/ticker/bookTicker`  |
//! | Mark/index/funding | GET    | `/fapi/v1/premiumIndex`       |
//! | Account            | GET    | `/fapi/v2/account`            |
//! | Open orders        | GET    | `/fapi/v1/openOrders`         |
//! | Position mode      | GET/POST | `/fapi/v1/positionSide/dual` |
//! | Leverage           | POST   | `/fapi/v1/leverage`           |
//! | Order              | POST/DELETE | `/fapi/v1/order`         |
//! | Batch orders       | POST/DELETE | `/fapi/v1/batchOrders`   |
//! | All symbol orders  | DELETE | `/fapi/v1/allOpenOrders`      |
//! | Klines             | GET    | `/fapi/v1/klines`             |
//! | Listen key         | POST/PUT/DELETE | `/fapi/v1/listenKey` |
//!
//! Two client instances exist per adapter: one paced at 3 requests/second
//! for non-order traffic, one unpaced for order placement (the venue limits
//! orders by count, which the dispatch queue governs separately).

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use keel_core::error::AdapterError;
use keel_core::types::BatchOutcome;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};
use tracing::{debug, info};

use crate::payload::PayloadOrder;
use crate::queue::BatchSubmit;
use crate::{auth, config::BinanceConfig};

/// Request rate for the paced (non-order) client instance.
const PACED_REQUESTS_PER_SEC: u32 = 3;

// ---------------------------------------------------------------------------
// Request pacer
// ---------------------------------------------------------------------------

/// Interval pacer: spaces requests at least `min_interval` apart.
struct RequestPacer {
    min_interval: Duration,
    next_allowed: Instant,
}

impl RequestPacer {
    fn new(requests_per_sec: u32) -> Self {
        let per_second = requests_per_sec.max(1) as f64;
        Self {
            min_interval: Duration::from_secs_f64(1.0 / per_second),
            next_allowed: Instant::now(),
        }
    }

    /// Reserve the next slot and return how long the caller must wait.
    fn reserve_delay(&mut self) -> Duration {
        let now = Instant::now();
        let base = self.next_allowed.max(now);
        let delay = base - now;
        self.next_allowed = base + self.min_interval;
        delay
    }
}

// ---------------------------------------------------------------------------
// FuturesRest
// ---------------------------------------------------------------------------

/// Binance futures REST client.
pub struct FuturesRest {
    /// Shared HTTP client.
    http: reqwest::Client,
    /// API key (sent in `X-MBX-APIKEY` header).
    api_key: String,
    /// Secret key for HMAC-SHA256 signing.
    secret_key: String,
    /// REST base URL (e.g. `https://fapi.binance.com`).
    base_url: String,
    /// `recvWindow` for signed requests.
    recv_window: u64,
    /// Present on the non-order instance; absent on the placement instance.
    pacer: Option<Mutex<RequestPacer>>,
    /// Active listen key for the user-data stream.
    listen_key: Mutex<Option<String>>,
}

impl FuturesRest {
    /// Create a client instance.
    ///
    /// `paced` selects the 3 RPS non-order instance; placement traffic uses
    /// an unpaced instance because order counts are governed by the
    /// dispatch queue's rolling windows instead.
    pub fn new(config: &BinanceConfig, paced: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: config.effective_rest_url(),
            recv_window: config.recv_window,
            pacer: paced.then(|| Mutex::new(RequestPacer::new(PACED_REQUESTS_PER_SEC))),
            listen_key: Mutex::new(None),
        }
    }

    /// Wait for the pacer slot, if this instance is paced.
    async fn throttle(&self) {
        if let Some(pacer) = &self.pacer {
            let delay = pacer.lock().await.reserve_delay();
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
    }

    /// Decode a venue response, mapping error bodies to [`AdapterError`].
    async fn decode_response(resp: reqwest::Response) -> Result<Value> {
        let status = resp.status();
        let text = resp.text().await.context("read response body")?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let code = body
                .get("code")
                .and_then(|c| c.as_i64())
                .unwrap_or_else(|| i64::from(status.as_u16()));
            let msg = body
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed"))
                .to_string();
            return Err(AdapterError::Venue { code, msg }.into());
        }

        Ok(body)
    }

    /// Unsigned GET (public market data).
    async fn public_get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        self.throttle().await;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("GET {path} failed"))?;
        Self::decode_response(resp).await
    }

    /// Signed request with timestamp and recvWindow appended.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Value> {
        self.throttle().await;

        let timestamp = current_timestamp_ms();
        let recv_str = self.recv_window.to_string();
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("recvWindow", &recv_str));
        all.push(("timestamp", &timestamp));

        let query = auth::build_signed_query(&all, &self.secret_key);
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .http
            .request(method.clone(), &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .with_context(|| format!("{method} {path} failed"))?;
        Self::decode_response(resp).await
    }

    // -----------------------------------------------------------------------
    // Market data
    // -----------------------------------------------------------------------

    /// Fetch exchange info (symbol list, filters).
    pub async fn get_exchange_info(&self) -> Result<Value> {
        self.public_get("/fapi/v1/exchangeInfo", &[]).await
    }

    /// Fetch the leverage brackets for every symbol (signed).
    pub async fn get_leverage_brackets(&self) -> Result<Value> {
        self.signed_request(reqwest::Method::GET, "/fapi/v1/leverageBracket", &[])
            .await
    }

    /// Fetch 24h rolling tickers for every symbol.
    pub async fn get_tickers_24h(&self) -> Result<Value> {
        self.public_get("/fapi/v1/ticker/24hr", &[]).await
    }

    /// Fetch best bid/ask for every symbol.
    pub async fn get_tickers_book(&self) -> Result<Value> {
        self.public_get("/fapi/v1/ticker/bookTicker", &[]).await
    }

    /// Fetch mark price, index price, and funding rate for every symbol.
    pub async fn get_premium_index(&self) -> Result<Value> {
        self.public_get("/fapi/v1/premiumIndex", &[]).await
    }

    /// Fetch OHLCV candles.
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Value> {
        let limit_str = limit.to_string();
        self.public_get(
            "/fapi/v1/klines",
            &[
                ("symbol", symbol),
                ("interval", interval),
                ("limit", &limit_str),
            ],
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Account
    // -----------------------------------------------------------------------

    /// Fetch account information: balance assets and position slots in one call.
    pub async fn get_account(&self) -> Result<Value> {
        self.signed_request(reqwest::Method::GET, "/fapi/v2/account", &[])
            .await
    }

    /// Query all open orders (optionally filtered by symbol).
    pub async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Value> {
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(sym) = symbol {
            params.push(("symbol", sym));
        }
        self.signed_request(reqwest::Method::GET, "/fapi/v1/openOrders", &params)
            .await
    }

    /// Query the position mode: `true` when the account is hedged.
    pub async fn get_position_mode(&self) -> Result<bool> {
        let v = self
            .signed_request(reqwest::Method::GET, "/fapi/v1/positionSide/dual", &[])
            .await?;
        v.get("dualSidePosition")
            .and_then(|d| d.as_bool())
            .ok_or_else(|| anyhow!("dualSidePosition not found in response"))
    }

    /// Switch the position mode.
    pub async fn set_position_mode(&self, hedged: bool) -> Result<()> {
        let flag = if hedged { "true" } else { "false" };
        self.signed_request(
            reqwest::Method::POST,
            "/fapi/v1/positionSide/dual",
            &[("dualSidePosition", flag)],
        )
        .await?;
        Ok(())
    }

    /// Set leverage for a symbol.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let lev_str = leverage.to_string();
        self.signed_request(
            reqwest::Method::POST,
            "/fapi/v1/leverage",
            &[("symbol", symbol), ("leverage", &lev_str)],
        )
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Place a single order.
    pub async fn place_order(&self, payload: &PayloadOrder) -> Result<Value> {
        let params: Vec<(&str, &str)> = payload.pairs().collect();
        self.signed_request(reqwest::Method::POST, "/fapi/v1/order", &params)
            .await
    }

    /// Place up to 5 orders through the batch endpoint.
    pub async fn place_batch(&self, payloads: &[PayloadOrder]) -> Result<Value> {
        let batch = Value::Array(payloads.iter().map(|p| p.to_json()).collect()).to_string();
        self.signed_request(
            reqwest::Method::POST,
            "/fapi/v1/batchOrders",
            &[("batchOrders", &batch)],
        )
        .await
    }

    /// Cancel one order by client ID.
    pub async fn cancel_order(&self, symbol: &str, client_id: &str) -> Result<Value> {
        self.signed_request(
            reqwest::Method::DELETE,
            "/fapi/v1/order",
            &[("symbol", symbol), ("origClientOrderId", client_id)],
        )
        .await
    }

    /// Cancel a batch of orders by client ID.
    pub async fn cancel_batch(&self, symbol: &str, client_ids: &[String]) -> Result<Value> {
        let id_list = Value::Array(
            client_ids
                .iter()
                .map(|id| Value::String(id.clone()))
                .collect(),
        )
        .to_string();
        self.signed_request(
            reqwest::Method::DELETE,
            "/fapi/v1/batchOrders",
            &[("symbol", symbol), ("origClientOrderIdList", &id_list)],
        )
        .await
    }

    /// Cancel every open order on a symbol.
    pub async fn cancel_symbol_orders(&self, symbol: &str) -> Result<Value> {
        self.signed_request(
            reqwest::Method::DELETE,
            "/fapi/v1/allOpenOrders",
            &[("symbol", symbol)],
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Listen key management
    // -----------------------------------------------------------------------

    /// Create a new listen key for the user-data stream.
    pub async fn create_listen_key(&self) -> Result<String> {
        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .context("create listen key request failed")?;
        let body = Self::decode_response(resp).await?;

        let key = body
            .get("listenKey")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("listenKey not found in response"))?
            .to_string();

        *self.listen_key.lock().await = Some(key.clone());
        info!("[binance-rest] listen key created");
        Ok(key)
    }

    /// Send a keepalive ping for the current listen key.
    pub async fn keepalive_listen_key(&self) -> Result<()> {
        let key = self.listen_key.lock().await;
        let Some(ref listen_key) = *key else {
            return Err(anyhow!("no active listen key"));
        };

        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        let resp = self
            .http
            .put(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", listen_key.as_str())])
            .send()
            .await
            .context("keepalive listen key request failed")?;
        Self::decode_response(resp).await?;

        debug!("[binance-rest] listen key keepalive sent");
        Ok(())
    }

    /// Close (delete) the current listen key.
    pub async fn close_listen_key(&self) -> Result<()> {
        let key = self.listen_key.lock().await;
        let Some(ref listen_key) = *key else {
            return Ok(());
        };

        let url = format!("{}/fapi/v1/listenKey", self.base_url);
        let resp = self
            .http
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .query(&[("listenKey", listen_key.as_str())])
            .send()
            .await
            .context("close listen key request failed")?;
        Self::decode_response(resp).await?;

        info!("[binance-rest] listen key closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fast-path submission (dispatch queue seam)
// ---------------------------------------------------------------------------

#[async_trait]
impl BatchSubmit for FuturesRest {
    /// Submit a lot through the single-order or batch endpoint and map the
    /// response to per-payload outcomes. Endpoint-level failures charge the
    /// same error to every payload in the lot; this method never errors.
    async fn submit_batch(&self, batch: &[PayloadOrder]) -> Vec<BatchOutcome> {
        match batch.len() {
            0 => Vec::new(),
            1 => {
                let payload = &batch[0];
                let error = self.place_order(payload).await.err().map(|e| format!("{e:#}"));
                vec![BatchOutcome {
                    order_id: payload.client_order_id().to_string(),
                    error,
                }]
            }
            _ => match self.place_batch(batch).await {
                Ok(Value::Array(items)) => batch
                    .iter()
                    .enumerate()
                    .map(|(i, payload)| BatchOutcome {
                        order_id: payload.client_order_id().to_string(),
                        error: items.get(i).and_then(item_error),
                    })
                    .collect(),
                Ok(other) => fail_all(batch, &format!("unexpected batch response: {other}")),
                Err(e) => fail_all(batch, &format!("{e:#}")),
            },
        }
    }
}

/// Extract the error message from one batch response item, if it is one.
fn item_error(item: &Value) -> Option<String> {
    let code = item.get("code")?.as_i64()?;
    if code < 0 {
        let msg = item
            .get("msg")
            .and_then(|m| m.as_str())
            .unwrap_or("order rejected");
        Some(format!("venue error (code {code}): {msg}"))
    } else {
        None
    }
}

/// Charge the same error to every payload of a lot.
fn fail_all(batch: &[PayloadOrder], error: &str) -> Vec<BatchOutcome> {
    batch
        .iter()
        .map(|p| BatchOutcome {
            order_id: p.client_order_id().to_string(),
            error: Some(error.to_string()),
        })
        .collect()
}

/// Returns the current Unix timestamp in milliseconds.
fn current_timestamp_ms() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .to_string()
}
