//! Gateway error types.

use thiserror::Error;

/// Errors that can occur while a gateway session is running.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// WebSocket protocol or I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// REST collaborator failure (gateway URL fetch, transport open).
    #[error("HTTP error: {0}")]
    Http(#[from] corvid_http::HttpError),

    /// A payload could not be decoded.
    #[error("JSON decode error: {0}")]
    JsonDecode(String),

    /// The zlib stream could not be inflated.
    #[error("decompression error: {0}")]
    Decompress(#[from] std::io::Error),

    /// The service closed the connection.
    #[error("connection closed: code={code}, reason={reason}")]
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason, if any.
        reason: String,
    },

    /// No heartbeat acknowledgement arrived within one interval.
    #[error("heartbeat acknowledgement timeout")]
    HeartbeatTimeout,
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::JsonDecode(err.to_string())
    }
}

/// Service close codes, used by the supervisor to decide whether a session
/// is worth reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error.
    UnknownError = 4000,
    /// Invalid opcode sent.
    UnknownOpcode = 4001,
    /// Invalid payload sent.
    DecodeError = 4002,
    /// Payload sent before identifying.
    NotAuthenticated = 4003,
    /// Invalid token.
    AuthenticationFailed = 4004,
    /// Identify sent twice.
    AlreadyAuthenticated = 4005,
    /// Invalid resume sequence.
    InvalidSeq = 4007,
    /// Commands sent too fast.
    RateLimited = 4008,
    /// Session timed out.
    SessionTimedOut = 4009,
    /// Invalid shard configuration.
    InvalidShard = 4010,
    /// Sharding required.
    ShardingRequired = 4011,
    /// Invalid API version.
    InvalidApiVersion = 4012,
    /// Invalid intents.
    InvalidIntents = 4013,
    /// Privileged intent not enabled.
    DisallowedIntents = 4014,
}

impl CloseCode {
    /// Whether the session can be resumed after this code.
    pub const fn is_resumable(self) -> bool {
        matches!(
            self,
            CloseCode::UnknownError | CloseCode::InvalidSeq | CloseCode::SessionTimedOut
        )
    }

    /// Whether any reconnect (resume or fresh identify) is possible.
    pub const fn can_reconnect(self) -> bool {
        !matches!(
            self,
            CloseCode::AuthenticationFailed
                | CloseCode::InvalidShard
                | CloseCode::ShardingRequired
                | CloseCode::InvalidApiVersion
                | CloseCode::InvalidIntents
                | CloseCode::DisallowedIntents
        )
    }

    /// Map a raw close code to the enum.
    pub const fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            4000 => CloseCode::UnknownError,
            4001 => CloseCode::UnknownOpcode,
            4002 => CloseCode::DecodeError,
            4003 => CloseCode::NotAuthenticated,
            4004 => CloseCode::AuthenticationFailed,
            4005 => CloseCode::AlreadyAuthenticated,
            4007 => CloseCode::InvalidSeq,
            4008 => CloseCode::RateLimited,
            4009 => CloseCode::SessionTimedOut,
            4010 => CloseCode::InvalidShard,
            4011 => CloseCode::ShardingRequired,
            4012 => CloseCode::InvalidApiVersion,
            4013 => CloseCode::InvalidIntents,
            4014 => CloseCode::DisallowedIntents,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes_cannot_reconnect() {
        assert!(!CloseCode::AuthenticationFailed.can_reconnect());
        assert!(!CloseCode::DisallowedIntents.can_reconnect());
        assert!(CloseCode::SessionTimedOut.can_reconnect());
        assert!(CloseCode::SessionTimedOut.is_resumable());
        assert!(!CloseCode::RateLimited.is_resumable());
    }

    #[test]
    fn unknown_close_codes_are_none() {
        assert_eq!(CloseCode::from_code(4009), Some(CloseCode::SessionTimedOut));
        assert_eq!(CloseCode::from_code(1000), None);
    }
}
