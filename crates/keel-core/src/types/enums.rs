//! Enumerations used throughout the keel trading system.
//!
//! These enums are exchange-independent; each adapter maps them to the
//! venue's wire strings at the payload boundary.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order enums
// ---------------------------------------------------------------------------

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The opposing side (used for attached stop-loss / take-profit legs).
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
    TrailingStopLoss,
}

impl OrderKind {
    /// Whether this kind closes an existing position rather than opening one.
    pub fn is_protective(self) -> bool {
        matches!(self, Self::StopLoss | Self::TakeProfit | Self::TrailingStopLoss)
    }
}

/// Order lifecycle status — unified across exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
}

/// Time-in-force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeInForce {
    #[default]
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
    PostOnly,
}

// ---------------------------------------------------------------------------
// Position enums
// ---------------------------------------------------------------------------

/// Direction of an open position. Contract counts are stored non-negative;
/// the sign lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}
