//! Bot client and session supervisor.
//!
//! The [`Client`] owns the collaborators (REST, cache, dispatcher) and
//! supervises the gateway session lifecycle: it decides after every session
//! exit whether to resume with the retained session id and sequence, start
//! over with a fresh identify, back off and retry, or give up.

use crate::dispatcher::ChannelDispatcher;
use crate::error::ClientError;

use corvid_cache::InMemoryCache;
use corvid_gateway::{
    exponential_backoff, with_jitter, CloseCode, ConnectionState, GatewayError, GatewayEvent,
    Session,
};
use corvid_http::HttpClient;
use corvid_model::Intents;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// A bot client for one shard.
pub struct Client {
    state: Arc<ConnectionState>,
    http: Arc<HttpClient>,
    cache: Arc<InMemoryCache>,
    dispatcher: Arc<ChannelDispatcher>,
    max_reconnect_attempts: u32,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
}

impl Client {
    /// Create a new client builder.
    pub fn builder(token: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(token)
    }

    /// Client-level connection state.
    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    /// REST client.
    pub fn http(&self) -> &Arc<HttpClient> {
        &self.http
    }

    /// Entity cache.
    pub fn cache(&self) -> &Arc<InMemoryCache> {
        &self.cache
    }

    /// Event dispatcher, for registering `raw_<event>` processors.
    pub fn dispatcher(&self) -> &Arc<ChannelDispatcher> {
        &self.dispatcher
    }

    /// Ask the supervisor to stop after the current session ends.
    pub fn shutdown(&self) {
        self.state.mark_closed();
    }

    /// Connect and keep the shard online until shutdown or a fatal error.
    ///
    /// Sessions that close with resume intent reconnect with the retained
    /// session id and sequence; invalidated sessions reconnect fresh;
    /// close codes the service marks unrecoverable end the loop.
    pub async fn run(&self) -> Result<(), ClientError> {
        let mut session_id: Option<String> = None;
        let mut sequence: Option<u64> = None;
        let mut attempts: u32 = 0;

        while !self.state.is_closed() {
            let guard = match Session::connect(
                self.state.clone(),
                session_id.clone(),
                sequence,
                None,
            )
            .await
            {
                Ok(guard) => guard,
                Err(error) => {
                    attempts += 1;
                    if attempts > self.max_reconnect_attempts {
                        error!(attempts, "max reconnect attempts exceeded");
                        return Err(ClientError::MaxReconnectAttempts { attempts });
                    }
                    let backoff = with_jitter(
                        exponential_backoff(
                            attempts - 1,
                            self.reconnect_base_delay.as_millis() as u64,
                            self.reconnect_max_delay.as_millis() as u64,
                        ),
                        0.25,
                    );
                    warn!(
                        %error,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "connect failed, retrying"
                    );
                    sleep(backoff).await;
                    continue;
                }
            };
            attempts = 0;

            let session = guard.session().clone();
            let result = guard.run().await;
            drop(guard);

            // whether the remote close code itself permits a resume
            let mut close_resumable = false;
            match result {
                Ok(()) => {}
                Err(GatewayError::Closed { code, reason }) => {
                    if let Some(close_code) = CloseCode::from_code(code) {
                        if !close_code.can_reconnect() {
                            error!(code, reason = %reason, "fatal close code");
                            return Err(ClientError::FatalClose { code, reason });
                        }
                        close_resumable = close_code.is_resumable();
                    }
                    warn!(code, reason = %reason, "connection closed, reconnecting");
                }
                Err(error) => {
                    warn!(%error, "session ended with an error, reconnecting");
                }
            }

            if self.state.is_closed() {
                break;
            }

            if session.resume_flag() || close_resumable {
                session_id = session.session_id();
                sequence = session.sequence_number();
                info!(
                    session_id = session_id.as_deref(),
                    sequence, "reconnecting to resume session"
                );
            } else {
                session_id = None;
                sequence = None;
                info!("reconnecting with a fresh session");
            }

            sleep(with_jitter(self.reconnect_base_delay, 0.25)).await;
        }

        Ok(())
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    token: String,
    intents: Intents,
    shard_id: u16,
    total_shards: u16,
    gateway_url: Option<String>,
    max_reconnect_attempts: u32,
    reconnect_base_delay: Duration,
    reconnect_max_delay: Duration,
}

impl ClientBuilder {
    /// Start a builder with the bot token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            intents: Intents::default(),
            shard_id: 0,
            total_shards: 1,
            gateway_url: None,
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }

    /// Set the gateway intents.
    #[must_use]
    pub const fn intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Run as one shard of a larger deployment.
    #[must_use]
    pub const fn shard(mut self, shard_id: u16, total_shards: u16) -> Self {
        self.shard_id = shard_id;
        self.total_shards = total_shards;
        self
    }

    /// Preset the gateway URL instead of fetching it.
    #[must_use]
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Cap the consecutive failed connect attempts before giving up.
    #[must_use]
    pub const fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Tune the reconnect backoff window.
    #[must_use]
    pub const fn reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    /// Build the client and the event receiver the application consumes.
    pub fn build(self) -> Result<(Client, flume::Receiver<GatewayEvent>), ClientError> {
        let mut http = HttpClient::new(self.token)?;
        if let Some(url) = self.gateway_url {
            http = http.with_gateway_url(url);
        }
        let http = Arc::new(http);
        let cache = Arc::new(InMemoryCache::new());
        let (dispatcher, events) = ChannelDispatcher::new();

        let state = Arc::new(ConnectionState::new(
            self.shard_id,
            self.total_shards,
            self.intents,
            http.clone(),
            dispatcher.clone(),
            cache.clone(),
        ));

        Ok((
            Client {
                state,
                http,
                cache,
                dispatcher,
                max_reconnect_attempts: self.max_reconnect_attempts,
                reconnect_base_delay: self.reconnect_base_delay,
                reconnect_max_delay: self.reconnect_max_delay,
            },
            events,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    /// Loopback gateway accepting any number of connections. Each gets a
    /// HELLO; the first connection answers the client's auth frame with
    /// READY and then asks for a reconnect.
    async fn spawn_reconnecting_gateway() -> (String, flume::Receiver<(usize, Value)>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = flume::unbounded();

        tokio::spawn(async move {
            let mut conn_id = 0usize;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                conn_id += 1;
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };
                    let hello = r#"{"op":10,"d":{"heartbeat_interval":45000}}"#;
                    if ws.send(Message::Text(hello.into())).await.is_err() {
                        return;
                    }

                    let mut answered = false;
                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Text(text) = message {
                            let value: Value = serde_json::from_str(text.as_str()).unwrap();
                            let op = value["op"].as_u64();
                            let _ = tx.send((conn_id, value));

                            // greet the first session, then kick it
                            if conn_id == 1 && !answered && matches!(op, Some(2) | Some(6)) {
                                answered = true;
                                let ready = r#"{"op":0,"t":"READY","s":1,"d":{"session_id":"sess-9"}}"#;
                                let _ = ws.send(Message::Text(ready.into())).await;
                                // give the client a beat to process READY
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                let _ = ws.send(Message::Text(r#"{"op":7}"#.into())).await;
                            }
                        }
                    }
                });
            }
        });

        (format!("ws://{}", addr), rx)
    }

    async fn next_frame_from(
        frames: &flume::Receiver<(usize, Value)>,
        conn_id: usize,
    ) -> Value {
        timeout(Duration::from_secs(5), async {
            loop {
                let (id, value) = frames.recv_async().await.unwrap();
                if id == conn_id && value["op"] != 1 {
                    return value;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for a frame on connection {}", conn_id))
    }

    #[tokio::test]
    async fn reconnect_after_server_request_reuses_the_session() {
        let (url, frames) = spawn_reconnecting_gateway().await;
        let (client, _events) = Client::builder("test_token")
            .intents(Intents::GUILDS)
            .shard(0, 1)
            .gateway_url(&url)
            .reconnect_delays(Duration::from_millis(10), Duration::from_millis(50))
            .build()
            .unwrap();

        let client = Arc::new(client);
        let runner = tokio::spawn({
            let client = client.clone();
            async move { client.run().await }
        });

        // fresh connect carries no session id, so the session resumes
        let first = next_frame_from(&frames, 1).await;
        assert_eq!(first["op"], 6);
        assert!(first["d"]["session_id"].is_null());

        // after READY + reconnect request the supervisor retains the
        // session id, and a present session id authenticates via identify
        let second = next_frame_from(&frames, 2).await;
        assert_eq!(second["op"], 2);

        runner.abort();
        let _ = runner.await;
    }

    #[tokio::test]
    async fn unreachable_gateway_exhausts_reconnect_attempts() {
        let (client, _events) = Client::builder("test_token")
            .gateway_url("ws://127.0.0.1:1")
            .max_reconnect_attempts(2)
            .reconnect_delays(Duration::from_millis(5), Duration::from_millis(20))
            .build()
            .unwrap();

        let result = timeout(Duration::from_secs(10), client.run()).await.unwrap();
        assert!(matches!(
            result,
            Err(ClientError::MaxReconnectAttempts { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn run_returns_immediately_after_shutdown() {
        let (client, _events) = Client::builder("test_token")
            .gateway_url("ws://127.0.0.1:1")
            .build()
            .unwrap();

        client.shutdown();
        let result = timeout(Duration::from_secs(1), client.run()).await.unwrap();
        assert!(result.is_ok());
    }
}
