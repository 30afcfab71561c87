//! Corvid - a chat-service bot framework.
#![deny(unsafe_code)]
//!
//! The framework's core is a resilient gateway client: a compressed,
//! heartbeat-kept WebSocket session that resumes across disconnects and
//! surfaces decoded events to the application through a channel.
//!
//! # Example
//!
//! ```no_run
//! use corvid::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let token = std::env::var("BOT_TOKEN")?;
//!     let (client, events) = Client::builder(token)
//!         .intents(Intents::GUILDS | Intents::GUILD_MESSAGES)
//!         .build()?;
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv_async().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod dispatcher;
mod error;
pub mod prelude;

pub use client::{Client, ClientBuilder};
pub use dispatcher::ChannelDispatcher;
pub use error::ClientError;

pub use corvid_cache::{Guild, InMemoryCache, MemberCache};
pub use corvid_gateway::{
    GatewayError, GatewayEvent, RawGatewayEvent, Session, SessionGuard,
};
pub use corvid_http::HttpClient;
pub use corvid_model::{Intents, Snowflake};
