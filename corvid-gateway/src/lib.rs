//! Corvid Gateway - WebSocket client core for the corvid chat framework.
#![deny(unsafe_code)]
//!
//! This crate maintains a persistent, zlib-stream-compressed session with
//! the chat service's event gateway:
//!
//! - HELLO handshake, identify/resume authentication, and session close
//!   semantics with resume/shutdown intent flags
//! - heartbeat loop with zombie-connection detection and a rolling latency
//!   window
//! - streaming zlib decompression with partial-frame buffering
//! - outbound command rate limiting with heartbeat bypass
//! - member chunk reassembly fed into the cache in cooperative slices
//!
//! Decoded events are surfaced through the [`EventDispatcher`] seam; REST
//! and cache concerns live with the `corvid-http` and `corvid-cache`
//! collaborators.

mod chunk;
mod compression;
pub mod error;
mod events;
mod heartbeat;
mod opcode;
mod payload;
mod ratelimit;
mod session;
mod state;

// Public re-exports
pub use chunk::ChunkAssembler;
pub use compression::ZlibStreamDecoder;
pub use error::{CloseCode, GatewayError};
pub use events::{EventDispatcher, GatewayEvent, Processor, RawGatewayEvent};
pub use heartbeat::Heartbeater;
pub use opcode::OpCode;
pub use payload::{
    heartbeat_json, Activity, ActivityType, GatewayPayload, GuildMembersRequest, HelloPayload,
    IdentifyFrame, IncomingPayload, PresenceUpdate, ResumePayload, Status, LIBRARY_TAG,
};
pub use ratelimit::{exponential_backoff, with_jitter, GatewayRateLimiter};
pub use session::{Session, SessionGuard};
pub use state::ConnectionState;
