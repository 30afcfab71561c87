//! Client-level connection state shared with the session.

use crate::events::EventDispatcher;
use corvid_cache::MemberCache;
use corvid_http::HttpClient;
use corvid_model::Intents;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shard identity, subscription intents, and collaborator handles.
///
/// One `ConnectionState` outlives many sessions: the closure flag is the
/// client saying "stop reconnecting", not an individual transport closing.
pub struct ConnectionState {
    shard_id: u16,
    total_shards: u16,
    intents: Intents,
    closed: AtomicBool,
    http: Arc<HttpClient>,
    dispatcher: Arc<dyn EventDispatcher>,
    cache: Arc<dyn MemberCache>,
}

impl ConnectionState {
    /// Create connection state for one shard.
    pub fn new(
        shard_id: u16,
        total_shards: u16,
        intents: Intents,
        http: Arc<HttpClient>,
        dispatcher: Arc<dyn EventDispatcher>,
        cache: Arc<dyn MemberCache>,
    ) -> Self {
        Self {
            shard_id,
            total_shards,
            intents,
            closed: AtomicBool::new(false),
            http,
            dispatcher,
            cache,
        }
    }

    /// This shard's id.
    pub fn shard_id(&self) -> u16 {
        self.shard_id
    }

    /// Total number of shards the client runs.
    pub fn total_shards(&self) -> u16 {
        self.total_shards
    }

    /// Subscribed intents.
    pub fn intents(&self) -> Intents {
        self.intents
    }

    /// Whether the client has shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the client as shut down; running receive loops drain and exit.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// REST collaborator.
    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    /// Event sink.
    pub fn dispatcher(&self) -> &Arc<dyn EventDispatcher> {
        &self.dispatcher
    }

    /// Member cache.
    pub fn cache(&self) -> &Arc<dyn MemberCache> {
        &self.cache
    }
}
