//! Event types emitted by the adapters to downstream consumers.
//!
//! The host subscribes to an [`EventReceiver`] channel and reacts to fills,
//! batch outcomes, queue depth changes, and diagnostics. Emission never
//! blocks; a dropped receiver silently discards events.

use crate::types::{BatchOutcome, FillRecord};

/// A typed event emitted by an adapter.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    /// An execution (full or partial fill) from the private stream.
    Fill(FillRecord),

    /// The raw venue account-update message, forwarded before folding.
    PositionUpdate(serde_json::Value),

    /// Dispatch queue depth after an enqueue.
    OrderManager {
        /// Payloads waiting in the queue.
        queue_depth: usize,
    },

    /// Per-payload outcomes of one dispatched lot.
    BatchResolved(Vec<BatchOutcome>),

    /// A non-fatal error (bootstrap, tick, or dispatch path).
    Error(String),

    /// Informational diagnostics.
    Info(String),
}

/// Sender half of the adapter event channel.
pub type EventSender = tokio::sync::mpsc::UnboundedSender<AdapterEvent>;

/// Receiver half of the adapter event channel.
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<AdapterEvent>;

/// Cloneable emitter handed to each adapter component.
#[derive(Clone)]
pub struct EventEmitter {
    tx: EventSender,
}

impl EventEmitter {
    /// Create an emitter and the receiver the host should poll.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event. Errors (receiver dropped) are ignored.
    pub fn emit(&self, event: AdapterEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit an [`AdapterEvent::Error`] with the given message.
    pub fn error(&self, msg: impl Into<String>) {
        self.emit(AdapterEvent::Error(msg.into()));
    }

    /// Emit an [`AdapterEvent::Info`] with the given message.
    pub fn info(&self, msg: impl Into<String>) {
        self.emit(AdapterEvent::Info(msg.into()));
    }
}
