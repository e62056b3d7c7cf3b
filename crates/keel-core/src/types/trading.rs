//! Trading data structures — tickers, orders, positions, balances, and the
//! placement intents accepted by the order formatter.
//!
//! These types flow between the host application and the exchange adapters;
//! numerics are `f64` throughout, quantized at the payload boundary.

use serde::{Deserialize, Serialize};

use super::enums::{OrderKind, OrderSide, OrderStatus, PositionSide, TimeInForce};

// ---------------------------------------------------------------------------
// Market state
// ---------------------------------------------------------------------------

/// A 24h ticker snapshot for one symbol.
///
/// `open_interest` is `0.0` when the venue omits it from the source feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub mark: f64,
    pub index: f64,
    /// 24h price change, percent.
    pub percentage: f64,
    pub funding_rate: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub open_interest: f64,
}

/// One OHLCV candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, milliseconds since epoch.
    pub timestamp: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// An open order as projected in the store.
///
/// Invariant: `filled + remaining == amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client-assigned order ID (unique per process session).
    pub id: String,
    /// Venue-assigned order ID.
    pub order_id: u64,
    pub status: OrderStatus,
    pub symbol: String,
    pub kind: OrderKind,
    pub side: OrderSide,
    pub price: f64,
    pub amount: f64,
    pub filled: f64,
    pub remaining: f64,
    pub reduce_only: bool,
}

/// An open position as projected in the store.
///
/// `contracts` is always non-negative; direction is encoded in `side`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub contracts: f64,
    /// `|contracts · entry_price + unrealized_pnl|`, quote currency.
    pub notional: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    pub liquidation_price: f64,
}

/// One wallet asset with its USD valuation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceAsset {
    pub symbol: String,
    pub wallet_balance: f64,
    pub usd_value: f64,
}

/// Account balance snapshot, USD-denominated.
///
/// Invariant: `total == Σ assets[i].usd_value` after every update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub total: f64,
    pub free: f64,
    pub used: f64,
    pub upnl: f64,
    pub assets: Vec<BalanceAsset>,
}

// ---------------------------------------------------------------------------
// Stream-derived records
// ---------------------------------------------------------------------------

/// A fill (full or partial) derived from the private order-update stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRecord {
    pub symbol: String,
    /// Client-assigned ID of the filled order.
    pub order_id: String,
    pub side: OrderSide,
    /// Average fill price of this execution.
    pub price: f64,
    /// Quantity filled by this execution.
    pub amount: f64,
    /// `amount · price`, quote currency.
    pub notional: f64,
    pub realized_pnl: f64,
    /// Present only when the venue reports a commission on the execution.
    pub commission: Option<f64>,
    pub maker: bool,
    pub reduce_only: bool,
}

/// Per-payload outcome of a dispatched batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Client-assigned order ID of the payload.
    pub order_id: String,
    /// `None` on success; the venue or transport error otherwise.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Placement intents
// ---------------------------------------------------------------------------

/// A single-order placement intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleIntent {
    pub symbol: String,
    pub kind: OrderKind,
    pub side: OrderSide,
    /// Limit price, stop trigger, or trailing reference, depending on `kind`.
    pub price: Option<f64>,
    pub amount: f64,
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: bool,
    /// Attached stop-loss trigger price — emitted as an extra payload.
    pub stop_loss: Option<f64>,
    /// Attached take-profit trigger price — emitted as an extra payload.
    pub take_profit: Option<f64>,
}

/// A scaled split-order intent: `orders` rungs priced from `from_price` to
/// `to_price`, sizes weighted linearly from `from_scale` to `to_scale`,
/// distributing a quote-denominated `amount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    /// Total quote-currency amount to distribute across the rungs.
    pub amount: f64,
    pub orders: u32,
    pub from_price: f64,
    pub to_price: f64,
    pub from_scale: f64,
    pub to_scale: f64,
    /// Shrink the rung count until the smallest slice is tradable.
    #[serde(default)]
    pub auto_re_adjust: bool,
}

/// A price/amount amendment to an existing open order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateIntent {
    pub order: Order,
    pub price: Option<f64>,
    pub amount: Option<f64>,
}
