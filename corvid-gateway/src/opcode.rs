//! Gateway opcodes.
//!
//! Opcodes tag every payload crossing the gateway WebSocket.

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Gateway operation codes spoken by the session core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum OpCode {
    /// An event was dispatched. Receive.
    Dispatch = 0,

    /// Connection liveness probe. Send and receive.
    Heartbeat = 1,

    /// Start a new session. Send.
    Identify = 2,

    /// Update the client's presence. Send.
    PresenceUpdate = 3,

    /// Replay a previous session. Send.
    Resume = 6,

    /// Server asked us to reconnect. Receive.
    Reconnect = 7,

    /// Request guild member chunks. Send.
    RequestGuildMembers = 8,

    /// Session was invalidated. Receive.
    InvalidateSession = 9,

    /// First payload after connecting, carries the heartbeat interval. Receive.
    Hello = 10,

    /// Heartbeat acknowledgement. Receive.
    HeartbeatAck = 11,
}

impl OpCode {
    /// Map a raw wire opcode to the enum.
    ///
    /// Inbound envelopes carry the raw number so an unknown code can be
    /// logged and ignored instead of failing the whole decode.
    pub const fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => OpCode::Dispatch,
            1 => OpCode::Heartbeat,
            2 => OpCode::Identify,
            3 => OpCode::PresenceUpdate,
            6 => OpCode::Resume,
            7 => OpCode::Reconnect,
            8 => OpCode::RequestGuildMembers,
            9 => OpCode::InvalidateSession,
            10 => OpCode::Hello,
            11 => OpCode::HeartbeatAck,
            _ => return None,
        })
    }
}
