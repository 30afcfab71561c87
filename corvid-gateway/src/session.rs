//! Gateway session.
//!
//! A [`Session`] owns one WebSocket connection to the gateway: it performs
//! the HELLO handshake, authenticates (identify or resume), drives the
//! receive loop, and keeps the heartbeat and outbound command gate honest.
//! Opcode and event handling run on spawned tasks so a slow consumer can
//! never stall the receive side and starve the heartbeat ack path.

use crate::chunk::ChunkAssembler;
use crate::compression::ZlibStreamDecoder;
use crate::error::GatewayError;
use crate::events::{GatewayEvent, RawGatewayEvent};
use crate::heartbeat::Heartbeater;
use crate::opcode::OpCode;
use crate::payload::{
    heartbeat_json, Activity, GatewayPayload, GuildMembersRequest, HelloPayload, IdentifyFrame,
    IncomingPayload, PresenceUpdate, ResumePayload, Status,
};
use crate::ratelimit::GatewayRateLimiter;
use crate::state::ConnectionState;

use corvid_http::WsStream;
use corvid_model::Flag;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

/// How long to wait for the HELLO payload after the transport opens.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// One gateway WebSocket session.
///
/// Created through [`Session::connect`], which yields a [`SessionGuard`]
/// guaranteeing cleanup on every exit path. The `resume` and `shutdown`
/// flags record why the session closed so the supervisor can decide between
/// resuming, re-identifying, and stopping.
pub struct Session {
    state: Arc<ConnectionState>,
    sink: AsyncMutex<SplitSink<WsStream, Message>>,
    stream: AsyncMutex<SplitStream<WsStream>>,
    decoder: Mutex<ZlibStreamDecoder>,
    rate_limiter: GatewayRateLimiter,
    heartbeater: RwLock<Option<Arc<Heartbeater>>>,
    chunks: ChunkAssembler,

    /// Last sequence seen; 0 means none yet.
    sequence: AtomicU64,
    session_id: RwLock<Option<String>>,
    trace: RwLock<Vec<String>>,

    ready: Flag,
    resume: AtomicBool,
    shutdown: AtomicBool,
    closed: AtomicBool,
}

impl Session {
    /// Connect to the gateway and authenticate.
    ///
    /// Fetches the gateway URL, opens the transport, waits for HELLO,
    /// starts the heartbeater with a random start offset, then sends
    /// IDENTIFY when `session_id` is present and RESUME otherwise.
    pub async fn connect(
        state: Arc<ConnectionState>,
        session_id: Option<String>,
        sequence: Option<u64>,
        presence: Option<PresenceUpdate>,
    ) -> Result<SessionGuard, GatewayError> {
        let url = state.http().get_gateway().await?;
        let ws = state.http().websocket_connect(&url).await?;
        let (sink, stream) = ws.split();

        let session = Arc::new(Self {
            state: state.clone(),
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(stream),
            decoder: Mutex::new(ZlibStreamDecoder::new()),
            rate_limiter: GatewayRateLimiter::new(),
            heartbeater: RwLock::new(None),
            chunks: ChunkAssembler::new(),
            sequence: AtomicU64::new(0),
            session_id: RwLock::new(None),
            trace: RwLock::new(Vec::new()),
            ready: Flag::new(),
            resume: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        state.dispatcher().dispatch(GatewayEvent::Connect);

        // the guard owns cleanup from here on, even if the handshake fails
        let guard = SessionGuard {
            session: session.clone(),
        };

        let hello = session.wait_for_hello().await?;
        let interval = Duration::from_millis(hello.heartbeat_interval);
        debug!(
            shard_id = state.shard_id(),
            interval_ms = hello.heartbeat_interval,
            "received hello"
        );

        let heartbeater = Arc::new(Heartbeater::new(interval, state.shard_id()));
        *session.heartbeater.write() = Some(heartbeater.clone());
        heartbeater.start(session.clone());

        if session_id.is_some() {
            session
                .identify((state.shard_id(), state.total_shards()), presence)
                .await?;
        } else {
            session.resume_connection(sequence, session_id).await?;
        }

        Ok(guard)
    }

    /// Wait for the HELLO payload after connecting.
    async fn wait_for_hello(&self) -> Result<HelloPayload, GatewayError> {
        let payload = timeout(HELLO_TIMEOUT, self.receive())
            .await
            .map_err(|_| GatewayError::Closed {
                code: 0,
                reason: "timeout waiting for hello".to_string(),
            })??
            .ok_or_else(|| GatewayError::Closed {
                code: 0,
                reason: "connection closed before hello".to_string(),
            })?;

        if OpCode::from_u8(payload.op) != Some(OpCode::Hello) {
            return Err(GatewayError::Closed {
                code: 0,
                reason: "expected hello payload".to_string(),
            });
        }

        let data = payload
            .d
            .ok_or_else(|| GatewayError::JsonDecode("hello payload without data".to_string()))?;
        Ok(serde_json::from_value(data)?)
    }

    /// Pull one decoded envelope off the transport.
    ///
    /// Returns `Ok(None)` when the stream ended or the client shut down;
    /// the receive loop treats that as its termination sentinel.
    async fn receive(&self) -> Result<Option<IncomingPayload>, GatewayError> {
        let mut stream = self.stream.lock().await;

        while !self.state.is_closed() {
            let Some(message) = stream.next().await else {
                return Ok(None);
            };
            let message = message?;

            match message {
                Message::Binary(data) => {
                    let decoded = self.decoder.lock().push(&data)?;
                    if let Some(text) = decoded {
                        return Ok(Some(self.parse_envelope(&text)?));
                    }
                    // message isn't complete yet, keep buffering
                }
                Message::Text(text) => {
                    return Ok(Some(self.parse_envelope(text.as_str())?));
                }
                Message::Close(frame) => {
                    if self.closed.load(Ordering::SeqCst) {
                        // the peer acknowledging a close we initiated
                        return Ok(None);
                    }

                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .unwrap_or_default();
                    debug!(
                        shard_id = self.shard_id(),
                        code,
                        reason = %reason,
                        "gateway closed the connection"
                    );

                    match code {
                        Some(1000) | None => self.close(Some(1000), false, false).await,
                        Some(code) => {
                            self.close(None, true, false).await;
                            return Err(GatewayError::Closed { code, reason });
                        }
                    }
                }
                Message::Ping(data) => {
                    let _ = self.sink.lock().await.send(Message::Pong(data)).await;
                }
                Message::Pong(_) | Message::Frame(_) => {}
            }
        }

        Ok(None)
    }

    fn parse_envelope(&self, text: &str) -> Result<IncomingPayload, GatewayError> {
        trace!(shard_id = self.shard_id(), bytes = text.len(), "received envelope");
        Ok(serde_json::from_str(text)?)
    }

    /// Drive the receive loop until the session closes.
    ///
    /// Sequence updates happen here, before the payload is handed off, so a
    /// heartbeat emitted after an event always carries at least that
    /// event's sequence.
    pub async fn run(self: Arc<Self>) -> Result<(), GatewayError> {
        while !self.state.is_closed() {
            let Some(payload) = self.receive().await? else {
                return Ok(());
            };

            if let Some(seq) = payload.s {
                self.sequence.store(seq, Ordering::SeqCst);
            }

            let session = Arc::clone(&self);
            if OpCode::from_u8(payload.op) == Some(OpCode::Dispatch) {
                tokio::spawn(async move { session.dispatch_event(payload).await });
            } else {
                tokio::spawn(async move { session.dispatch_opcode(payload).await });
            }
        }

        Ok(())
    }

    /// Handle a non-dispatch control payload.
    async fn dispatch_opcode(self: Arc<Self>, payload: IncomingPayload) {
        match OpCode::from_u8(payload.op) {
            Some(OpCode::Heartbeat) => {
                if let Err(error) = self.send_heartbeat().await {
                    warn!(
                        shard_id = self.shard_id(),
                        %error,
                        "failed to answer heartbeat request"
                    );
                }
            }
            Some(OpCode::HeartbeatAck) => {
                if let Some(heartbeater) = self.heartbeater.read().clone() {
                    heartbeater.ack();
                }
            }
            Some(OpCode::Reconnect) => {
                info!(shard_id = self.shard_id(), "gateway requested reconnect");
                self.close(None, false, true).await;
            }
            Some(OpCode::InvalidateSession) => {
                warn!(shard_id = self.shard_id(), "gateway invalidated the session");
                self.close(None, false, false).await;
            }
            _ => {
                debug!(shard_id = self.shard_id(), op = payload.op, "unhandled opcode");
            }
        }
    }

    /// Handle a dispatch payload.
    ///
    /// READY, RESUMED, and member chunks are interpreted here; everything
    /// else is forwarded to the dispatcher by name without touching the
    /// payload.
    async fn dispatch_event(self: Arc<Self>, payload: IncomingPayload) {
        let Some(name) = payload.t else { return };
        let data = payload.d.unwrap_or(Value::Null);

        match name.as_str() {
            "READY" => {
                let trace = data
                    .get("_trace")
                    .and_then(Value::as_array)
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|entry| entry.as_str().map(str::to_owned))
                            .collect()
                    })
                    .unwrap_or_default();
                *self.trace.write() = trace;

                if let Some(seq) = payload.s {
                    self.sequence.store(seq, Ordering::SeqCst);
                }
                *self.session_id.write() = data
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned);

                info!(shard_id = self.shard_id(), "connected to gateway");
                self.ready.set();
                self.state
                    .dispatcher()
                    .dispatch(GatewayEvent::WebsocketReady(data));
            }
            "RESUMED" => {
                debug!(
                    shard_id = self.shard_id(),
                    session_id = self.session_id.read().as_deref(),
                    "successfully resumed session"
                );
                self.ready.set();
                self.state.dispatcher().dispatch(GatewayEvent::Resume);
            }
            "GUILD_MEMBERS_CHUNK" => {
                self.chunks
                    .process(self.state.cache().as_ref(), data)
                    .await;
            }
            _ => {
                let event_name = format!("raw_{}", name.to_lowercase());
                match self.state.dispatcher().processor(&event_name) {
                    Some(processor) => {
                        let event = RawGatewayEvent::new(data.clone(), event_name);
                        tokio::spawn(processor(event));
                    }
                    None => {
                        debug!(
                            shard_id = self.shard_id(),
                            event = %event_name,
                            "no processor registered"
                        );
                    }
                }
                self.state.dispatcher().dispatch(GatewayEvent::Raw(
                    RawGatewayEvent::new(data, "raw_socket_receive"),
                ));
            }
        }
    }

    // ========================================================================
    // Outbound surface
    // ========================================================================

    /// Send a text frame.
    ///
    /// Non-bypass traffic waits for the session to be ready and consumes a
    /// rate-gate grant first; heartbeats and authentication bypass both.
    pub async fn send(&self, data: &str, bypass: bool) -> Result<(), GatewayError> {
        if !bypass {
            self.ready.wait().await;
            self.rate_limiter.acquire().await;
        }

        if self.closed.load(Ordering::SeqCst) {
            debug!(shard_id = self.shard_id(), "dropping send on closed session");
            return Ok(());
        }

        trace!(shard_id = self.shard_id(), bytes = data.len(), "sending payload");
        self.sink
            .lock()
            .await
            .send(Message::Text(data.to_owned().into()))
            .await?;
        Ok(())
    }

    /// JSON-encode a payload and send it.
    pub async fn send_json<T: Serialize>(&self, payload: &T, bypass: bool) -> Result<(), GatewayError> {
        let json = serde_json::to_string(payload)?;
        self.send(&json, bypass).await
    }

    /// Send an IDENTIFY for the given shard.
    pub async fn identify(
        &self,
        shard: (u16, u16),
        presence: Option<PresenceUpdate>,
    ) -> Result<(), GatewayError> {
        let frame = IdentifyFrame::new(
            self.state.http().token().to_owned(),
            self.state.intents(),
            shard,
            presence,
        );
        self.send_json(&frame, true).await?;
        debug!(
            shard_id = shard.0,
            intents = ?self.state.intents(),
            "identified with gateway"
        );
        Ok(())
    }

    /// Send a RESUME replaying a previous session.
    pub async fn resume_connection(
        &self,
        sequence: Option<u64>,
        session_id: Option<String>,
    ) -> Result<(), GatewayError> {
        let payload = GatewayPayload::new(
            OpCode::Resume,
            ResumePayload {
                token: Cow::Borrowed(self.state.http().token()),
                seq: sequence,
                session_id: session_id.map(Cow::Owned),
            },
        );
        self.send_json(&payload, true).await?;
        debug!(shard_id = self.shard_id(), "attempting to resume session");
        Ok(())
    }

    /// Send a heartbeat carrying the current sequence.
    pub async fn send_heartbeat(&self) -> Result<(), GatewayError> {
        let seq = self.sequence_number();
        debug!(shard_id = self.shard_id(), seq, "sending heartbeat");
        self.send(&heartbeat_json(seq)?, true).await
    }

    /// Update the client's presence.
    pub async fn change_presence(
        &self,
        activity: Option<Activity>,
        status: Status,
        since: Option<u64>,
    ) -> Result<(), GatewayError> {
        let presence = PresenceUpdate {
            since: Some(since.unwrap_or_else(unix_millis)),
            activities: activity.into_iter().collect(),
            status,
            afk: false,
        };
        self.send_json(&GatewayPayload::new(OpCode::PresenceUpdate, presence), false)
            .await
    }

    /// Request member chunks for a guild.
    pub async fn request_member_chunks(
        &self,
        request: GuildMembersRequest,
    ) -> Result<(), GatewayError> {
        self.send_json(&GatewayPayload::new(OpCode::RequestGuildMembers, request), false)
            .await
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Close the session.
    ///
    /// Clears the ready gate, records the `shutdown`/`resume` intent, closes
    /// the transport (default code 1000 on shutdown, 1012 on resume) and
    /// stops the heartbeater. Idempotent: the transport is closed at most
    /// once.
    pub async fn close(&self, code: Option<u16>, shutdown: bool, resume: bool) {
        self.ready.clear();
        self.resume.store(resume, Ordering::SeqCst);
        self.shutdown.store(shutdown, Ordering::SeqCst);

        let code = code.or(if shutdown {
            Some(1000)
        } else if resume {
            Some(1012)
        } else {
            None
        });

        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(shard_id = self.shard_id(), code, shutdown, resume, "closing session");
            let frame = code.map(|code| CloseFrame {
                code: code.into(),
                reason: "".into(),
            });
            let mut sink = self.sink.lock().await;
            if let Err(error) = sink.send(Message::Close(frame)).await {
                debug!(
                    shard_id = self.shard_id(),
                    %error,
                    "transport already gone during close"
                );
            }
        }

        if let Some(heartbeater) = self.heartbeater.read().clone() {
            heartbeater.stop();
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Client-level connection state.
    pub fn state(&self) -> &Arc<ConnectionState> {
        &self.state
    }

    /// This shard's id.
    pub fn shard_id(&self) -> u16 {
        self.state.shard_id()
    }

    /// Total shards the client runs.
    pub fn total_shards(&self) -> u16 {
        self.state.total_shards()
    }

    /// Subscribed intents.
    pub fn intents(&self) -> corvid_model::Intents {
        self.state.intents()
    }

    /// Last sequence number received, if any.
    pub fn sequence_number(&self) -> Option<u64> {
        match self.sequence.load(Ordering::SeqCst) {
            0 => None,
            seq => Some(seq),
        }
    }

    /// The session id established by READY, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Gateway trace received with READY.
    pub fn trace(&self) -> Vec<String> {
        self.trace.read().clone()
    }

    /// Whether READY or RESUMED has been observed.
    pub fn is_ready(&self) -> bool {
        self.ready.is_set()
    }

    /// Whether the transport has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the session closed intending to resume.
    pub fn resume_flag(&self) -> bool {
        self.resume.load(Ordering::SeqCst)
    }

    /// Whether the session closed shutting down.
    pub fn shutdown_flag(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Latest heartbeat latency in seconds, infinite before the first ack.
    pub fn latency(&self) -> f64 {
        self.heartbeater
            .read()
            .as_ref()
            .map_or(f64::INFINITY, |hb| hb.latency())
    }

    /// Mean heartbeat latency in seconds, infinite before the first ack.
    pub fn average_latency(&self) -> f64 {
        self.heartbeater
            .read()
            .as_ref()
            .map_or(f64::INFINITY, |hb| hb.average_latency())
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Scoped handle to a connected [`Session`].
///
/// Guarantees the transport is closed on every exit path: run the session
/// to completion and close explicitly, or let the guard fall out of scope
/// (including through task cancellation) and the close is spawned from
/// `Drop`.
pub struct SessionGuard {
    session: Arc<Session>,
}

impl SessionGuard {
    /// The session behind this guard.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Drive the session's receive loop until it closes.
    pub async fn run(&self) -> Result<(), GatewayError> {
        self.session.clone().run().await
    }

    /// Close the session explicitly.
    pub async fn close(&self, code: Option<u16>, shutdown: bool, resume: bool) {
        self.session.close(code, shutdown, resume).await;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.is_closed() {
            return;
        }
        let session = self.session.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                session.close(None, false, false).await;
            });
        }
    }
}
