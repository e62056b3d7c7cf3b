//! Typed error definitions for the keel adapters.
//!
//! Provides [`AdapterError`] for domain-specific errors that are more
//! informative than plain `anyhow::Error` strings. All variants implement
//! `std::error::Error` via `thiserror`, so they integrate seamlessly with
//! `anyhow::Result` on the I/O paths.

use thiserror::Error;

/// Domain-specific errors for the keel adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The intent references a symbol absent from the market catalog.
    #[error("market not found: {0}")]
    MarketNotFound(String),

    /// A current price was required but no ticker is loaded for the symbol.
    #[error("ticker not found: {0}")]
    TickerNotFound(String),

    /// A trailing order was requested without a matching open position.
    #[error("no matching open position: {0}")]
    PositionNotFound(String),

    /// A split-order scale cannot satisfy the market's size constraints.
    #[error("scale infeasible: {0}")]
    ScaleInfeasible(String),

    /// The venue rejected a request with an error body.
    #[error("venue error (code {code}): {msg}")]
    Venue { code: i64, msg: String },

    /// Transport-level failure (connect, timeout, decode).
    #[error("network error: {0}")]
    Network(String),
}
