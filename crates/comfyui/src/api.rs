//! HTTP side of the ComfyUI protocol.
//!
//! [`ComfyUIApi`] covers the four REST calls a download needs: queue a
//! workflow (`POST /prompt`), drop a queued prompt (`POST /queue`), read
//! a prompt's history (`GET /history/{id}`) and fetch one stored image
//! (`GET /view`). Calls are never retried.

use serde::{Deserialize, Serialize};

use crate::history::{HistoryResponse, ImageRef};
use crate::session::ClientId;

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of `POST /prompt`.
#[derive(Serialize)]
struct PromptRequest<'a> {
    prompt: &'a serde_json::Value,
    client_id: &'a str,
}

/// Body of `POST /queue`.
#[derive(Serialize)]
struct QueueDelete<'a> {
    delete: [&'a str; 1],
}

/// Reply to `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub prompt_id: String,
    /// Queue position assigned by the server.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation problems the server accepted the prompt with.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// Network, DNS, or body decoding failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI answered with a non-2xx status.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl ComfyUIApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Reuse an existing [`reqwest::Client`] (connection pool, proxy setup).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url)
    }

    /// Queue `workflow` under `client_id`.
    ///
    /// Events for the new prompt are delivered to the event stream opened
    /// with the same `client_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &ClientId,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let request = self.client.post(self.endpoint("prompt")).json(&PromptRequest {
            prompt: workflow,
            client_id: client_id.as_str(),
        });
        let submitted: SubmitResponse = send_checked(request).await?.json().await?;

        if submitted
            .node_errors
            .as_object()
            .is_some_and(|errors| !errors.is_empty())
        {
            tracing::warn!(
                prompt_id = %submitted.prompt_id,
                node_errors = %submitted.node_errors,
                "ComfyUI accepted the workflow with node errors",
            );
        }
        Ok(submitted)
    }

    /// Ask the server to drop `prompt_id` from its queue. A prompt that is
    /// already running is not interrupted.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let request = self.client.post(self.endpoint("queue")).json(&QueueDelete {
            delete: [prompt_id],
        });
        send_checked(request).await?;
        Ok(())
    }

    /// History record for `prompt_id`. The map is empty when the server
    /// has no record of it.
    pub async fn get_history(&self, prompt_id: &str) -> Result<HistoryResponse, ComfyUIApiError> {
        let request = self
            .client
            .get(self.endpoint(&format!("history/{prompt_id}")));
        Ok(send_checked(request).await?.json().await?)
    }

    /// Raw bytes of one stored image.
    pub async fn get_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let request = self.client.get(self.endpoint("view")).query(image);
        let bytes = send_checked(request).await?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

/// Send `request`, turning a non-2xx answer into [`ComfyUIApiError::ApiError`].
async fn send_checked(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ComfyUIApiError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}
