//! Gateway payload structures.
//!
//! Inbound envelopes keep their data as raw [`serde_json::Value`]: the
//! session only interprets the envelope, event payload schemas belong to
//! higher layers. Outbound payloads are typed.

use crate::opcode::OpCode;
use corvid_model::{Intents, Snowflake};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Library identification tag sent in IDENTIFY properties.
pub const LIBRARY_TAG: &str = "corvid";

/// A decoded inbound envelope.
///
/// `op` stays a raw number so unknown opcodes survive the decode and can be
/// logged and ignored by the session.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingPayload {
    /// Opcode for the payload.
    pub op: u8,

    /// Event data.
    #[serde(default)]
    pub d: Option<Value>,

    /// Sequence number (set on dispatch events).
    #[serde(default)]
    pub s: Option<u64>,

    /// Event name (set on dispatch events).
    #[serde(default)]
    pub t: Option<String>,
}

/// An outbound envelope.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayPayload<D> {
    /// Opcode for the payload.
    pub op: OpCode,

    /// Payload data.
    pub d: D,
}

impl<D: Serialize> GatewayPayload<D> {
    /// Create a new payload with opcode and data.
    pub fn new(op: OpCode, data: D) -> Self {
        Self { op, d: data }
    }
}

/// Payload of the HELLO opcode, received right after connecting.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    /// Interval (in milliseconds) at which to send heartbeats.
    pub heartbeat_interval: u64,
}

// ============================================================================
// Identify
// ============================================================================

/// The full IDENTIFY frame.
///
/// The transport-compression acknowledgement rides at the envelope level,
/// next to `op` and `d`.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyFrame<'a> {
    /// Always [`OpCode::Identify`].
    pub op: OpCode,

    /// Identify data.
    pub d: IdentifyPayload<'a>,

    /// Whether the session expects zlib-stream frames.
    pub compress: bool,
}

/// Payload of the IDENTIFY opcode.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyPayload<'a> {
    /// Authentication token.
    pub token: Cow<'a, str>,

    /// Event families to subscribe to.
    pub intents: Intents,

    /// Shard information: `[shard_id, total_shards]`.
    pub shard: [u16; 2],

    /// Member-list threshold for large guilds.
    pub large_threshold: u8,

    /// Client identity properties.
    pub properties: IdentityProperties<'a>,

    /// Initial presence, if any.
    pub presence: Option<PresenceUpdate>,
}

impl<'a> IdentifyFrame<'a> {
    /// Build an identify frame for a shard.
    pub fn new(
        token: impl Into<Cow<'a, str>>,
        intents: Intents,
        shard: (u16, u16),
        presence: Option<PresenceUpdate>,
    ) -> Self {
        Self {
            op: OpCode::Identify,
            d: IdentifyPayload {
                token: token.into(),
                intents,
                shard: [shard.0, shard.1],
                large_threshold: 250,
                properties: IdentityProperties::default(),
                presence,
            },
            compress: true,
        }
    }
}

/// Client identity properties sent with IDENTIFY.
#[derive(Debug, Clone, Serialize)]
pub struct IdentityProperties<'a> {
    /// Operating system.
    #[serde(rename = "$os")]
    pub os: Cow<'a, str>,

    /// Library name.
    #[serde(rename = "$browser")]
    pub browser: Cow<'a, str>,

    /// Library name again, for the device slot.
    #[serde(rename = "$device")]
    pub device: Cow<'a, str>,
}

impl Default for IdentityProperties<'_> {
    fn default() -> Self {
        Self {
            os: Cow::Borrowed(std::env::consts::OS),
            browser: Cow::Borrowed(LIBRARY_TAG),
            device: Cow::Borrowed(LIBRARY_TAG),
        }
    }
}

// ============================================================================
// Resume
// ============================================================================

/// Payload of the RESUME opcode.
///
/// Fields are serialized even when absent; the service distinguishes a null
/// sequence from a missing one.
#[derive(Debug, Clone, Serialize)]
pub struct ResumePayload<'a> {
    /// Authentication token.
    pub token: Cow<'a, str>,

    /// Last sequence number seen on the previous connection.
    pub seq: Option<u64>,

    /// Session id from the previous READY.
    pub session_id: Option<Cow<'a, str>>,
}

// ============================================================================
// Presence
// ============================================================================

/// Payload of the PRESENCE_UPDATE opcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdate {
    /// Unix timestamp (milliseconds) of when the client went idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// Current activities; at most one for a bot.
    pub activities: Vec<Activity>,

    /// Online status.
    pub status: Status,

    /// Whether the client is AFK.
    pub afk: bool,
}

/// A presence activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,

    /// Activity type.
    #[serde(rename = "type")]
    pub kind: ActivityType,

    /// Stream URL, only meaningful for the streaming type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Activity type, numeric on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ActivityType {
    /// Playing {name}
    Playing,
    /// Streaming {name}
    Streaming,
    /// Listening to {name}
    Listening,
    /// Watching {name}
    Watching,
    /// {emoji} {name}
    Custom,
    /// Competing in {name}
    Competing,
}

impl From<u8> for ActivityType {
    fn from(value: u8) -> Self {
        match value {
            1 => ActivityType::Streaming,
            2 => ActivityType::Listening,
            3 => ActivityType::Watching,
            4 => ActivityType::Custom,
            5 => ActivityType::Competing,
            _ => ActivityType::Playing,
        }
    }
}

impl From<ActivityType> for u8 {
    fn from(value: ActivityType) -> Self {
        match value {
            ActivityType::Playing => 0,
            ActivityType::Streaming => 1,
            ActivityType::Listening => 2,
            ActivityType::Watching => 3,
            ActivityType::Custom => 4,
            ActivityType::Competing => 5,
        }
    }
}

/// Online status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online.
    #[default]
    Online,
    /// Do not disturb.
    Dnd,
    /// Away.
    Idle,
    /// Shown as offline.
    Invisible,
    /// Offline.
    Offline,
}

// ============================================================================
// Member chunk request
// ============================================================================

/// Payload of the REQUEST_MEMBERS opcode.
///
/// Optional fields are elided from the wire when unset.
#[derive(Debug, Clone, Serialize)]
pub struct GuildMembersRequest {
    /// Guild to query.
    pub guild_id: Snowflake,

    /// Whether to include presences in the response.
    pub presences: bool,

    /// Maximum members to return (0 = all matching).
    pub limit: u32,

    /// Correlation nonce echoed back in the chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Specific user ids to fetch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,

    /// Username prefix filter; empty matches everyone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl GuildMembersRequest {
    /// Request every member of a guild (empty prefix query, no presences).
    pub fn new(guild_id: Snowflake, limit: u32) -> Self {
        Self {
            guild_id,
            presences: false,
            limit,
            nonce: None,
            user_ids: None,
            query: Some(String::new()),
        }
    }

    /// Filter by username prefix.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Fetch specific users. The empty prefix query stays on the wire
    /// alongside the id list; the service ignores it.
    #[must_use]
    pub fn with_user_ids(mut self, user_ids: Vec<Snowflake>) -> Self {
        self.user_ids = Some(user_ids);
        self
    }

    /// Include presences in the response.
    #[must_use]
    pub fn with_presences(mut self) -> Self {
        self.presences = true;
        self
    }

    /// Attach a correlation nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}

// ============================================================================
// Heartbeat
// ============================================================================

/// Render a heartbeat frame.
///
/// The payload is the bare sequence number, sent through the envelope
/// serializer so a missing sequence is emitted as an explicit `null`
/// rather than elided.
pub fn heartbeat_json(sequence: Option<u64>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&GatewayPayload::new(OpCode::Heartbeat, sequence))
}
