//! Venue order payloads.
//!
//! Binance order payloads are heterogeneous string maps whose legal fields
//! depend on the order type. [`PayloadOrder`] keeps them as an ordered list
//! of `(field, value)` pairs so the query string and batch JSON serialize
//! in a stable field order.

use keel_core::types::{OrderKind, OrderSide, TimeInForce};
use serde_json::Value;
use uuid::Uuid;

/// The venue field carrying the client-assigned order ID.
pub const CLIENT_ID_FIELD: &str = "newClientOrderId";

// ---------------------------------------------------------------------------
// Venue vocabulary
// ---------------------------------------------------------------------------

/// Venue wire string for an order side.
pub fn venue_side(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

/// Venue wire string for an order type.
pub fn venue_order_type(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "MARKET",
        OrderKind::Limit => "LIMIT",
        OrderKind::StopLoss => "STOP_MARKET",
        OrderKind::TakeProfit => "TAKE_PROFIT_MARKET",
        OrderKind::TrailingStopLoss => "TRAILING_STOP_MARKET",
    }
}

/// Decode a venue order-type string (stream and open-order responses).
pub fn order_kind_from_venue(s: &str) -> Option<OrderKind> {
    match s {
        "MARKET" => Some(OrderKind::Market),
        "LIMIT" => Some(OrderKind::Limit),
        "STOP" | "STOP_MARKET" => Some(OrderKind::StopLoss),
        "TAKE_PROFIT" | "TAKE_PROFIT_MARKET" => Some(OrderKind::TakeProfit),
        "TRAILING_STOP_MARKET" => Some(OrderKind::TrailingStopLoss),
        _ => None,
    }
}

/// Venue wire string for a time-in-force.
pub fn venue_time_in_force(tif: TimeInForce) -> &'static str {
    match tif {
        TimeInForce::GoodTillCancel => "GTC",
        TimeInForce::ImmediateOrCancel => "IOC",
        TimeInForce::FillOrKill => "FOK",
        TimeInForce::PostOnly => "GTX",
    }
}

/// Generate a fresh client order ID (32 hex chars, unique per process).
pub fn fresh_client_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// One venue-shaped order payload: an ordered field-name → value map.
#[derive(Debug, Clone, Default)]
pub struct PayloadOrder {
    fields: Vec<(String, String)>,
}

impl PayloadOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any existing value while keeping its slot.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key.to_string(), value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The client-assigned order ID; empty until assigned.
    pub fn client_order_id(&self) -> &str {
        self.get(CLIENT_ID_FIELD).unwrap_or("")
    }

    /// Assign a fresh client ID (placement does this last, once per payload).
    pub fn assign_client_id(&mut self) {
        self.set(CLIENT_ID_FIELD, fresh_client_id());
    }

    /// Fields in insertion order, for query-string assembly.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// JSON object in field order, for the batch endpoint.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), Value::String(v.clone()));
        }
        Value::Object(map)
    }
}
