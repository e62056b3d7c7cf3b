//! Per-symbol contract metadata.
//!
//! A [`Market`] is immutable after the initial catalog load; a refresh
//! replaces the whole catalog rather than mutating entries in place.

use serde::{Deserialize, Serialize};

/// Step sizes for amount and price quantization.
///
/// Both are expressed as the smallest tradable increment (e.g. `0.001`
/// contracts, `0.1` quote units), not as decimal-place counts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketPrecision {
    pub amount: f64,
    pub price: f64,
}

/// Minimum and maximum order size in contracts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AmountLimits {
    pub min: f64,
    pub max: f64,
}

/// Allowed leverage range for the symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LeverageLimits {
    pub min: u32,
    pub max: u32,
}

/// Venue-imposed order constraints for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketLimits {
    pub amount: AmountLimits,
    /// Minimum `quantity · price` in quote currency for priced orders.
    pub min_notional: f64,
    pub leverage: LeverageLimits,
}

/// Immutable contract metadata for one perpetual instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// Composite identifier, `"BASE/QUOTE:MARGIN"` (e.g. `"BTC/USDT:USDT"`).
    pub id: String,
    /// Venue symbol (e.g. `"BTCUSDT"`).
    pub symbol: String,
    /// Base asset (e.g. `"BTC"`).
    pub base: String,
    /// Quote asset (e.g. `"USDT"`).
    pub quote: String,
    /// Whether the instrument is currently trading.
    pub active: bool,
    pub precision: MarketPrecision,
    pub limits: MarketLimits,
}
