//! REST client implementation.

use crate::error::HttpError;
use crate::routes::GatewayInfo;

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

/// API base URL.
const API_BASE: &str = "https://chat.example.com/api/v10";

/// Gateway protocol version requested on connect.
const GATEWAY_VERSION: u8 = 10;

/// User agent for REST requests.
const USER_AGENT_VALUE: &str = concat!(
    "CorvidBot (https://github.com/corvid-rs/corvid, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Type alias for the WebSocket transport handed to the gateway.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// REST API client.
///
/// The gateway core uses two routes: `get_gateway` for the WebSocket URL and
/// `websocket_connect` to open the transport itself.
pub struct HttpClient {
    /// Inner HTTP client.
    client: Client,
    /// Bot token.
    token: String,
    /// Cached gateway URL; the route's answer is stable for a process
    /// lifetime so one fetch is enough.
    gateway_url: RwLock<Option<String>>,
}

impl HttpClient {
    /// Create a new client with the given bot token.
    pub fn new(token: impl Into<String>) -> Result<Self, HttpError> {
        let token = token.into();

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bot {}", token))
                .map_err(|_| HttpError::InvalidToken)?,
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            token,
            gateway_url: RwLock::new(None),
        })
    }

    /// Get the bot token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Preset the gateway URL, skipping the `/gateway` fetch.
    #[must_use]
    pub fn with_gateway_url(self, url: impl Into<String>) -> Self {
        *self.gateway_url.write() = Some(url.into());
        self
    }

    /// Get the gateway WebSocket URL, fetching `/gateway` on first use.
    pub async fn get_gateway(&self) -> Result<String, HttpError> {
        if let Some(url) = self.gateway_url.read().clone() {
            return Ok(url);
        }

        let response = self
            .client
            .get(format!("{}/gateway", API_BASE))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Api {
                status: status.as_u16(),
            });
        }

        let info: GatewayInfo = response.json().await?;
        debug!(url = %info.url, "fetched gateway URL");

        *self.gateway_url.write() = Some(info.url.clone());
        Ok(info.url)
    }

    /// Open the gateway WebSocket transport.
    ///
    /// Appends the protocol version, encoding, and zlib-stream transport
    /// compression query parameters to the base URL.
    pub async fn websocket_connect(&self, base_url: &str) -> Result<WsStream, HttpError> {
        let mut url = Url::parse(base_url)?;
        url.query_pairs_mut()
            .append_pair("v", &GATEWAY_VERSION.to_string())
            .append_pair("encoding", "json")
            .append_pair("compress", "zlib-stream");

        info!(url = %url, "connecting to gateway");
        let (stream, _response) = connect_async(url.as_str()).await?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn preset_gateway_url_is_returned_without_fetching() {
        let client = HttpClient::new("test_token")
            .unwrap()
            .with_gateway_url("ws://127.0.0.1:1/");

        let url = client.get_gateway().await.unwrap();
        assert_eq!(url, "ws://127.0.0.1:1/");
    }

    #[test]
    fn token_accessor() {
        let client = HttpClient::new("test_token").unwrap();
        assert_eq!(client.token(), "test_token");
    }

    #[tokio::test]
    async fn websocket_connect_appends_protocol_parameters() {
        use futures_util::StreamExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut path = None;
            let mut ws = tokio_tungstenite::accept_hdr_async(
                stream,
                |request: &tokio_tungstenite::tungstenite::handshake::server::Request,
                 response| {
                    path = Some(request.uri().to_string());
                    Ok(response)
                },
            )
            .await
            .unwrap();
            // hold the connection until the client hangs up
            let _ = ws.next().await;
            path.unwrap()
        });

        let client = HttpClient::new("test_token").unwrap();
        let stream = client
            .websocket_connect(&format!("ws://{}", addr))
            .await
            .unwrap();
        drop(stream);

        let path = server.await.unwrap();
        assert!(path.contains("v=10"));
        assert!(path.contains("encoding=json"));
        assert!(path.contains("compress=zlib-stream"));
    }
}
