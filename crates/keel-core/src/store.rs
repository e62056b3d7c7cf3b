//! Process-local projection of the trader's account.
//!
//! The [`Store`] holds markets, tickers, positions, balance, open orders,
//! and adapter settings behind per-sub-tree `RwLock`s. Convention: a single
//! writer (the owning adapter), many readers (host, formatter, streams).
//! Updates replace sub-trees rather than mutating shared state in place, so
//! readers always observe a consistent snapshot of each sub-tree.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{
    Balance, Market, Order, OrderStatus, Position, PositionSide, Ticker,
};

/// Stable-value assets credited at par during USD conversion.
pub const STABLE_ASSETS: [&str; 3] = ["USDT", "USDC", "FDUSD"];

/// Adapter settings and stream health.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Hedge mode: simultaneous long and short positions per symbol.
    pub hedged: bool,
    /// Half round-trip latency of the private stream, milliseconds.
    pub latency_ms: u64,
}

/// Bootstrap progress flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadedFlags {
    pub markets: bool,
    pub tickers: bool,
    pub orders: bool,
}

/// The account projection. Cheap to share via `Arc`.
#[derive(Default)]
pub struct Store {
    markets: RwLock<Vec<Market>>,
    tickers: RwLock<HashMap<String, Ticker>>,
    positions: RwLock<Vec<Position>>,
    balance: RwLock<Balance>,
    orders: RwLock<Vec<Order>>,
    options: RwLock<StoreOptions>,
    loaded: RwLock<LoadedFlags>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Markets
    // -----------------------------------------------------------------------

    /// Replace the market catalog (initial load or full re-catalog).
    pub fn set_markets(&self, markets: Vec<Market>) {
        *self.markets.write().unwrap() = markets;
        self.loaded.write().unwrap().markets = true;
    }

    pub fn markets(&self) -> Vec<Market> {
        self.markets.read().unwrap().clone()
    }

    /// Look up one market by venue symbol.
    pub fn market(&self, symbol: &str) -> Option<Market> {
        self.markets
            .read()
            .unwrap()
            .iter()
            .find(|m| m.symbol == symbol)
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Tickers
    // -----------------------------------------------------------------------

    pub fn set_tickers(&self, tickers: Vec<Ticker>) {
        let map = tickers.into_iter().map(|t| (t.symbol.clone(), t)).collect();
        *self.tickers.write().unwrap() = map;
        self.loaded.write().unwrap().tickers = true;
    }

    /// Insert or replace a single ticker (public stream write-through).
    pub fn update_ticker(&self, ticker: Ticker) {
        self.tickers
            .write()
            .unwrap()
            .insert(ticker.symbol.clone(), ticker);
    }

    pub fn ticker(&self, symbol: &str) -> Option<Ticker> {
        self.tickers.read().unwrap().get(symbol).cloned()
    }

    // -----------------------------------------------------------------------
    // Positions
    // -----------------------------------------------------------------------

    /// Replace the position set (bootstrap / tick refresh).
    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.write().unwrap() = positions;
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.read().unwrap().clone()
    }

    pub fn position(&self, symbol: &str, side: PositionSide) -> Option<Position> {
        self.positions
            .read()
            .unwrap()
            .iter()
            .find(|p| p.symbol == symbol && p.side == side)
            .cloned()
    }

    /// Fold one venue position slot into an existing position.
    ///
    /// Slots for unknown `(symbol, side)` pairs are ignored; the periodic
    /// account refresh picks those up. `contracts` is stored non-negative
    /// and `notional` is recomputed as `|contracts · entry + upnl|`.
    pub fn apply_position_slot(
        &self,
        symbol: &str,
        side: PositionSide,
        entry_price: f64,
        contracts: f64,
        unrealized_pnl: f64,
    ) {
        let mut positions = self.positions.write().unwrap();
        if let Some(p) = positions
            .iter_mut()
            .find(|p| p.symbol == symbol && p.side == side)
        {
            p.entry_price = entry_price;
            p.contracts = contracts.abs();
            p.notional = (p.contracts * entry_price + unrealized_pnl).abs();
            p.unrealized_pnl = unrealized_pnl;
        }
    }

    // -----------------------------------------------------------------------
    // Balance
    // -----------------------------------------------------------------------

    pub fn set_balance(&self, balance: Balance) {
        *self.balance.write().unwrap() = balance;
    }

    pub fn balance(&self) -> Balance {
        self.balance.read().unwrap().clone()
    }

    /// Fold one venue balance slot (wallet balance change for one asset).
    pub fn apply_balance_slot(&self, asset: &str, wallet_balance: f64) {
        let mut balance = self.balance.write().unwrap();
        if let Some(a) = balance.assets.iter_mut().find(|a| a.symbol == asset) {
            a.wallet_balance = wallet_balance;
        }
    }

    /// Re-value every asset and restore `total == Σ usd_value`.
    ///
    /// Stables are credited at par; other assets are valued at the last
    /// price of `{ASSET}USDT`. An asset with no loaded ticker keeps its
    /// previous valuation rather than dropping to zero.
    pub fn recompute_balance_total(&self) {
        let tickers = self.tickers.read().unwrap();
        let mut balance = self.balance.write().unwrap();
        for a in balance.assets.iter_mut() {
            if STABLE_ASSETS.contains(&a.symbol.as_str()) {
                a.usd_value = a.wallet_balance;
            } else if let Some(t) = tickers.get(&format!("{}USDT", a.symbol)) {
                a.usd_value = a.wallet_balance * t.last;
            }
        }
        balance.total = balance.assets.iter().map(|a| a.usd_value).sum();
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    pub fn set_orders(&self, orders: Vec<Order>) {
        *self.orders.write().unwrap() = orders;
        self.loaded.write().unwrap().orders = true;
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.read().unwrap().clone()
    }

    pub fn order(&self, client_id: &str) -> Option<Order> {
        self.orders
            .read()
            .unwrap()
            .iter()
            .find(|o| o.id == client_id)
            .cloned()
    }

    /// Insert or replace an order keyed by client ID.
    pub fn upsert_order(&self, order: Order) {
        let mut orders = self.orders.write().unwrap();
        match orders.iter_mut().find(|o| o.id == order.id) {
            Some(existing) => *existing = order,
            None => orders.push(order),
        }
    }

    /// Fold a partial-fill quantity into an open order.
    pub fn update_order_fill(&self, client_id: &str, filled: f64) {
        let mut orders = self.orders.write().unwrap();
        if let Some(o) = orders.iter_mut().find(|o| o.id == client_id) {
            o.filled = filled;
            o.remaining = (o.amount - filled).max(0.0);
            if o.remaining == 0.0 {
                o.status = OrderStatus::Closed;
            }
        }
    }

    /// Remove an order by client ID (terminal status from the stream).
    pub fn remove_order(&self, client_id: &str) {
        self.orders.write().unwrap().retain(|o| o.id != client_id);
    }

    // -----------------------------------------------------------------------
    // Options / load progress
    // -----------------------------------------------------------------------

    pub fn set_hedged(&self, hedged: bool) {
        self.options.write().unwrap().hedged = hedged;
    }

    pub fn hedged(&self) -> bool {
        self.options.read().unwrap().hedged
    }

    pub fn set_latency(&self, latency_ms: u64) {
        self.options.write().unwrap().latency_ms = latency_ms;
    }

    pub fn latency_ms(&self) -> u64 {
        self.options.read().unwrap().latency_ms
    }

    pub fn loaded(&self) -> LoadedFlags {
        *self.loaded.read().unwrap()
    }
}
