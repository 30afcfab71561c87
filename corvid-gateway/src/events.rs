//! Events surfaced by the gateway and the dispatcher seam they sink into.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// A raw event forwarded to the dispatcher without schema interpretation.
#[derive(Debug, Clone)]
pub struct RawGatewayEvent {
    /// The dispatch payload (`d` field) as received.
    pub data: Value,
    /// The name the event is dispatched under, e.g. `raw_message_create`.
    pub override_name: String,
}

impl RawGatewayEvent {
    /// Create a raw event.
    pub fn new(data: Value, override_name: impl Into<String>) -> Self {
        Self {
            data,
            override_name: override_name.into(),
        }
    }
}

/// Lifecycle and raw events emitted by a session.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The WebSocket transport was opened.
    Connect,
    /// The session authenticated and received READY.
    WebsocketReady(Value),
    /// A previous session was successfully resumed.
    Resume,
    /// A dispatch event forwarded without interpretation.
    Raw(RawGatewayEvent),
}

/// An async callback registered for a `raw_<event>` name.
pub type Processor = Arc<dyn Fn(RawGatewayEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Sink for decoded gateway events.
///
/// The session never interprets event payloads beyond the envelope; it
/// hands them to this seam by name.
pub trait EventDispatcher: Send + Sync {
    /// Sink one event.
    fn dispatch(&self, event: GatewayEvent);

    /// Look up the processor registered for a `raw_<event>` name.
    fn processor(&self, name: &str) -> Option<Processor>;
}
