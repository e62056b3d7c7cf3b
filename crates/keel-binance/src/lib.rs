//! # keel-binance
//!
//! Binance USDT-margined perpetual futures adapter.
//!
//! Maintains a live projection of the trader's account in a
//! [`keel_core::store::Store`] and exposes a uniform placement surface that
//! tolerates the venue's size limits, rate limits, hedge-mode quirks, and
//! split-order scaling semantics.
//!
//! # Architecture
//!
//! ```text
//! BinanceUsdm
//! ├── FuturesRest (paced)     (catalog, tickers, account, open orders)
//! ├── FuturesRest (unpaced)   (order placement / cancellation)
//! ├── OrderFormatter          (intents → venue payloads)
//! ├── DispatchQueue           (rate-windowed batch submission)
//! ├── UserStream              (listen key + private WS → store + events)
//! └── tick loop               (periodic balance/position refresh)
//! ```
//!
//! All placement methods take `&self` and are safe to call from multiple
//! tasks concurrently; the store follows a single-writer convention.

pub mod adapter;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod format;
mod json_util;
pub mod payload;
pub mod queue;
pub mod rest;
pub mod user_stream;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use keel_core::types::{Candle, SimpleIntent, SplitIntent, UpdateIntent};

pub use adapter::BinanceUsdm;
pub use config::BinanceConfig;

/// Trait implemented by perpetual-futures venue adapters.
///
/// # Lifecycle
///
/// 1. Construct via venue-specific `new(config, store, events)`.
/// 2. Call [`start`](PerpVenue::start) to load the catalog, connect the
///    private stream, and enter the refresh loop.
/// 3. Use the placement and cancellation methods; observe outcomes on the
///    event channel and in the store.
/// 4. Call [`dispose`](PerpVenue::dispose) to close all connections and
///    stop background tasks.
#[async_trait]
pub trait PerpVenue: Send + Sync {
    /// Load markets, tickers, and the initial account state, connect
    /// streams, start the tick loop.
    ///
    /// Returns `true` if the bootstrap completed within `timeout`.
    /// Venue and network failures are emitted on the event channel and
    /// resolve to `false`; the store keeps whatever state was loaded.
    async fn start(&mut self, timeout: Duration) -> Result<bool>;

    /// Format and submit placement intents through the dispatch queue.
    ///
    /// Resolves once every resulting payload has been dispatched; returns
    /// the client IDs of the successfully placed orders.
    async fn place_orders(&self, intents: Vec<SimpleIntent>) -> Result<Vec<String>>;

    /// Format and submit a scaled split order.
    ///
    /// Infeasible scales emit an error event and resolve to an empty list.
    async fn place_split_order(&self, intent: SplitIntent) -> Result<Vec<String>>;

    /// Amend open orders (cancel + re-place with updated price/amount).
    async fn update_orders(&self, updates: Vec<UpdateIntent>) -> Result<Vec<String>>;

    /// Cancel orders by client ID.
    async fn cancel_orders(&self, symbol: &str, client_ids: &[String]) -> Result<()>;

    /// Cancel every open order on a symbol.
    async fn cancel_symbol_orders(&self, symbol: &str) -> Result<()>;

    /// Set the leverage for a symbol.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// Switch between hedge and one-way position mode.
    ///
    /// Refused (error event, no-op) while any position is open.
    async fn set_position_mode(&self, hedged: bool) -> Result<()>;

    /// Fetch OHLCV candles for a symbol.
    async fn fetch_ohlcv(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Gracefully shut down — close the stream, stop timers and tasks.
    async fn dispose(&mut self) -> Result<()>;
}
