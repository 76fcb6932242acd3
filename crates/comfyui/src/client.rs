//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance.  Call [`ComfyUIClient::connect`] to establish a
//! live [`ComfyUIConnection`] over WebSocket.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::session::ClientId;

/// The raw event stream type produced by [`ComfyUIClient::connect`].
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
///
/// Stores the WebSocket and HTTP API URLs needed to communicate with
/// one ComfyUI server. Create a [`ComfyUIConnection`] by calling
/// [`connect`](Self::connect).
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    api_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake.
    pub client_id: ClientId,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a new client from explicit base URLs.
    ///
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `api_url` - HTTP base URL, e.g. `http://host:8188`.
    pub fn new(ws_url: String, api_url: String) -> Self {
        Self { ws_url, api_url }
    }

    /// Create a client from a bare `host:port` server address.
    ///
    /// Plain `ws://` and `http://` schemes are used for both endpoints.
    pub fn from_address(address: &str) -> Self {
        Self::new(format!("ws://{address}"), format!("http://{address}"))
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Full event endpoint URL for a session.
    pub fn events_url(&self, client_id: &ClientId) -> String {
        format!("{}/ws?clientId={}", self.ws_url, client_id)
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// The `client_id` is passed as a query parameter so that ComfyUI
    /// can address messages back to this specific client; the same id
    /// must be used when submitting prompts.
    pub async fn connect(
        &self,
        client_id: &ClientId,
    ) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.events_url(client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: client_id.clone(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_maps_to_both_schemes() {
        let client = ComfyUIClient::from_address("127.0.0.1:8188");
        assert_eq!(client.ws_url(), "ws://127.0.0.1:8188");
        assert_eq!(client.api_url(), "http://127.0.0.1:8188");
    }

    #[test]
    fn events_url_carries_client_id() {
        let client = ComfyUIClient::from_address("gpu-box:8188");
        let id = ClientId::new();
        assert_eq!(
            client.events_url(&id),
            format!("ws://gpu-box:8188/ws?clientId={id}")
        );
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        // Port 9 (discard) is essentially never listening on localhost.
        let client = ComfyUIClient::from_address("127.0.0.1:9");
        let result = client.connect(&ClientId::new()).await;
        assert!(matches!(result, Err(ComfyUIClientError::Connection(_))));
    }
}
