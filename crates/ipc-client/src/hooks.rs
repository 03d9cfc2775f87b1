//! Collaborator hooks: metrics notifications and request-envelope reuse.
//!
//! Neither hook influences control flow. A client without a pool allocates
//! fresh envelopes; a client without a metrics sink uses [`NoopMetrics`].

use std::time::Duration;

use nl_protocol::JsonRpcRequest;

use crate::connection::ConnectionEvent;
use crate::error::ErrorKind;

/// Connection lifecycle notifications reported to a [`MetricsSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Reconnected,
    MaxRetriesExceeded,
    Closed,
    /// The frame parser dropped its buffer.
    BufferOverflow,
}

impl ConnectionEventKind {
    /// `None` for data events, which are not lifecycle transitions.
    pub fn of(event: &ConnectionEvent) -> Option<Self> {
        Some(match event {
            ConnectionEvent::Connected => Self::Connected,
            ConnectionEvent::Data(_) => return None,
            ConnectionEvent::Disconnected { .. } => Self::Disconnected,
            ConnectionEvent::Reconnecting { .. } => Self::Reconnecting,
            ConnectionEvent::Reconnected { .. } => Self::Reconnected,
            ConnectionEvent::MaxRetriesExceeded { .. } => Self::MaxRetriesExceeded,
            ConnectionEvent::Closed => Self::Closed,
        })
    }
}

/// Receives per-call and per-connection notifications.
///
/// Every method defaults to a no-op so a sink only overrides what it
/// records. Calls happen on the caller's task (call notifications) or the
/// engine's dispatcher task (connection notifications); keep them cheap.
pub trait MetricsSink: Send + Sync {
    fn on_call_start(&self, _method: &str) {}

    /// `cached` is `true` when the result came from the response cache.
    fn on_call_success(&self, _method: &str, _elapsed: Duration, _cached: bool) {}

    fn on_call_failure(&self, _method: &str, _kind: ErrorKind) {}

    fn on_connection_event(&self, _kind: ConnectionEventKind) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Source of reusable request envelopes.
///
/// `acquire` may return a previously released envelope with stale fields;
/// the engine overwrites all of them before use.
pub trait RequestPool: Send + Sync {
    fn acquire(&self) -> JsonRpcRequest;
    fn release(&self, request: JsonRpcRequest);
}
