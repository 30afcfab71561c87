//! HTTP client error types.

use thiserror::Error;

/// Errors produced by the REST client and transport opener.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Underlying HTTP request failure.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-success status.
    #[error("API error: status {status}")]
    Api {
        /// HTTP status code.
        status: u16,
    },

    /// The token could not be encoded into an auth header.
    #[error("invalid token")]
    InvalidToken,

    /// A gateway URL could not be parsed.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The WebSocket handshake failed.
    #[error("WebSocket connect error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
