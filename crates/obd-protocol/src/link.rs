//! Link Abstraction
//!
//! The link is the byte/line transport between the host and the adapter.
//! Writes are fire-and-forget; everything the adapter says comes back as
//! [`LinkEvent`]s on a broadcast stream.

use crate::error::ObdError;
use tokio::sync::broadcast;

/// Event published by a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Transport came up
    Connected,
    /// One complete response from the adapter, prompt removed
    Data(String),
    /// Transport went away
    Disconnected,
}

/// Bidirectional text transport to an ELM327-compatible adapter
pub trait Link: Send + Sync {
    /// Write `text` to the adapter without waiting for an answer
    fn send(&self, text: &str) -> Result<(), ObdError>;

    /// Subscribe to inbound events
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;

    /// Whether the transport is currently usable
    fn is_connected(&self) -> bool;
}
