//! Client error types.

use thiserror::Error;

/// Errors surfaced by the client supervisor.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Gateway session failure.
    #[error("gateway error: {0}")]
    Gateway(#[from] corvid_gateway::GatewayError),

    /// REST collaborator failure.
    #[error("HTTP error: {0}")]
    Http(#[from] corvid_http::HttpError),

    /// The gateway closed with a code that forbids reconnecting.
    #[error("fatal gateway close: code={code}, reason={reason}")]
    FatalClose {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },

    /// Gave up reconnecting.
    #[error("max reconnect attempts exceeded after {attempts} tries")]
    MaxReconnectAttempts {
        /// Attempts made before giving up.
        attempts: u32,
    },
}
