//! Corvid HTTP - REST client and WebSocket transport opener.
#![deny(unsafe_code)]

mod client;
mod error;
mod routes;

pub use client::{HttpClient, WsStream};
pub use error::HttpError;
pub use routes::GatewayInfo;
