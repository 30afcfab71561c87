//! Commonly used types, in one import.

pub use crate::{Client, ClientBuilder, ClientError};
pub use corvid_gateway::{GatewayEvent, RawGatewayEvent};
pub use corvid_model::{Intents, Snowflake};
