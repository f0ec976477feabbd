//! Host-facing event sink
//!
//! One trait with a method per event category. Every method has a no-op
//! default so hosts implement only what they render.

use crate::event::{RegistryEntry, TraceEvent};
use std::fmt;

/// Why a trace connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the stream
    Closed,
    /// `disconnect()` was called locally
    Requested,
    /// Read failed
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "connection closed by peer"),
            DisconnectReason::Requested => write!(f, "disconnected"),
            DisconnectReason::Error(e) => write!(f, "connection error: {e}"),
        }
    }
}

/// Receives trace lifecycle and refresh callbacks
///
/// Callbacks from a [`crate::client::TraceSocketClient`] arrive on its
/// reader thread; callbacks forwarded by the pipeline arrive on the host
/// UI thread.
pub trait TraceEventSink: Send + Sync {
    fn on_trace_received(&self, _event: &TraceEvent) {}

    fn on_connected(&self, _peer: &str) {}

    /// Fires exactly once per connection
    fn on_disconnected(&self, _reason: &DisconnectReason) {}

    /// Transport fault; may fire without a disconnect
    fn on_error(&self, _error: &str) {}

    /// Aggregates changed; time to re-render
    fn on_refresh(&self) {}

    /// The traced program finished a logical cycle
    fn on_cycle_complete(&self, _event: &TraceEvent) {}

    /// A new static registry replaced the defined set
    fn on_registry(&self, _entries: &[RegistryEntry]) {}
}

/// Sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceEventSink for NullSink {}

impl<S: TraceEventSink + ?Sized> TraceEventSink for std::sync::Arc<S> {
    fn on_trace_received(&self, event: &TraceEvent) {
        (**self).on_trace_received(event);
    }

    fn on_connected(&self, peer: &str) {
        (**self).on_connected(peer);
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        (**self).on_disconnected(reason);
    }

    fn on_error(&self, error: &str) {
        (**self).on_error(error);
    }

    fn on_refresh(&self) {
        (**self).on_refresh();
    }

    fn on_cycle_complete(&self, event: &TraceEvent) {
        (**self).on_cycle_complete(event);
    }

    fn on_registry(&self, entries: &[RegistryEntry]) {
        (**self).on_registry(entries);
    }
}
