//! Binance adapter configuration.
//!
//! Holds API credentials, endpoint URLs, and timing knobs. All URL fields
//! have production defaults so only `api_key` and `secret_key` need to be
//! specified; `testnet` swaps in the futures test-network endpoints.

use serde::Deserialize;

/// Configuration for the Binance USDT-margined futures adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    /// Binance API key.
    pub api_key: String,

    /// Binance API secret (HMAC-SHA256 signing).
    pub secret_key: String,

    /// Use the futures test network endpoints.
    #[serde(default)]
    pub testnet: bool,

    /// REST API base URL.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// User-data stream WebSocket base URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// `recvWindow` for signed requests (milliseconds).
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,

    /// Balance/position refresh interval, milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Listen-key keepalive interval, seconds.
    #[serde(default = "default_listen_key_refresh_secs")]
    pub listen_key_refresh_secs: u64,
}

impl BinanceConfig {
    /// REST base URL honoring the `testnet` toggle.
    pub fn effective_rest_url(&self) -> String {
        if self.testnet && self.rest_url == default_rest_url() {
            "https://testnet.binancefuture.com".into()
        } else {
            self.rest_url.clone()
        }
    }

    /// WebSocket base URL honoring the `testnet` toggle.
    pub fn effective_ws_url(&self) -> String {
        if self.testnet && self.ws_url == default_ws_url() {
            "wss://stream.binancefuture.com/ws".into()
        } else {
            self.ws_url.clone()
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            recv_window: default_recv_window(),
            tick_interval_ms: default_tick_interval_ms(),
            listen_key_refresh_secs: default_listen_key_refresh_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default helpers (used by serde)
// ---------------------------------------------------------------------------

fn default_rest_url() -> String {
    "https://fapi.binance.com".into()
}

fn default_ws_url() -> String {
    "wss://fstream.binance.com/ws".into()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_tick_interval_ms() -> u64 {
    5000
}

fn default_listen_key_refresh_secs() -> u64 {
    1800 // 30 minutes (the key expires at 60 if not renewed)
}
