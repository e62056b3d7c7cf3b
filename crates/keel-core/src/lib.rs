//! # keel-core
//!
//! Core crate for the keel derivatives-trading adapters, providing:
//!
//! - **Types** (`types`) — enums, market metadata, trading structs, placement intents
//! - **Store** (`store`) — process-local projection of the trader's account
//! - **Events** (`events`) — fan-out bus for fills, batch outcomes, and diagnostics
//! - **Error types** (`error`) — domain-specific `AdapterError` via thiserror
//! - **Logging** (`logging`) — tracing-based structured logging
//!
//! Exchange adapters (e.g. `keel-binance`) consume the store as writers and
//! the event bus as emitters; host applications consume both as readers.

pub mod error;
pub mod events;
pub mod logging;
pub mod store;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
