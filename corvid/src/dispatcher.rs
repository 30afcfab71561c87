//! Channel-backed event dispatcher.

use corvid_gateway::{EventDispatcher, GatewayEvent, Processor, RawGatewayEvent};
use dashmap::DashMap;
use flume::{Receiver, Sender};
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Dispatcher that forwards gateway events into a channel and keeps a
/// registry of `raw_<event>` processors.
///
/// The channel end is handed to the application; processors are async
/// callbacks the session spawns per matching raw event.
pub struct ChannelDispatcher {
    events: Sender<GatewayEvent>,
    processors: DashMap<String, Processor>,
}

impl ChannelDispatcher {
    /// Create a dispatcher and the receiver the application consumes.
    pub fn new() -> (Arc<Self>, Receiver<GatewayEvent>) {
        let (events, receiver) = flume::unbounded();
        (
            Arc::new(Self {
                events,
                processors: DashMap::new(),
            }),
            receiver,
        )
    }

    /// Register an async processor for a `raw_<event>` name.
    pub fn register_processor<F, Fut>(&self, name: impl Into<String>, processor: F)
    where
        F: Fn(RawGatewayEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let processor: Processor = Arc::new(move |event| processor(event).boxed());
        self.processors.insert(name.into(), processor);
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, event: GatewayEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped, discarding event");
        }
    }

    fn processor(&self, name: &str) -> Option<Processor> {
        self.processors.get(name).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatch_flows_through_the_channel() {
        let (dispatcher, events) = ChannelDispatcher::new();

        dispatcher.dispatch(GatewayEvent::Connect);
        dispatcher.dispatch(GatewayEvent::Raw(RawGatewayEvent::new(
            json!({"a": 1}),
            "raw_socket_receive",
        )));

        assert!(matches!(events.recv_async().await, Ok(GatewayEvent::Connect)));
        match events.recv_async().await {
            Ok(GatewayEvent::Raw(raw)) => {
                assert_eq!(raw.override_name, "raw_socket_receive");
                assert_eq!(raw.data["a"], 1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn registered_processors_are_found_and_run() {
        let (dispatcher, _events) = ChannelDispatcher::new();
        let (seen_tx, seen_rx) = flume::unbounded::<String>();

        dispatcher.register_processor("raw_message_create", move |event: RawGatewayEvent| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(event.override_name);
            }
        });

        assert!(dispatcher.processor("raw_unknown").is_none());
        let processor = dispatcher.processor("raw_message_create").expect("registered");

        processor(RawGatewayEvent::new(json!({}), "raw_message_create")).await;
        assert_eq!(seen_rx.recv_async().await.unwrap(), "raw_message_create");
    }
}
