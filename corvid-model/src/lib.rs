//! Corvid Model - shared core types for the corvid chat framework.
#![deny(unsafe_code)]

mod intents;
mod snowflake;
pub mod signal;

pub use intents::Intents;
pub use signal::Flag;
pub use snowflake::Snowflake;
