//! Response types for the routes the framework core needs.

use serde::Deserialize;

/// Response of the `/gateway` route.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayInfo {
    /// Base WebSocket URL to connect to.
    pub url: String,
}
