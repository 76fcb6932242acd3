//! Result collection from the ComfyUI history store.
//!
//! After a prompt finishes, its history record is the authoritative
//! list of everything it produced. [`collect_outputs`] fetches that
//! record and downloads each listed image, one request at a time, in
//! listed order. The result is a standalone mapping; merging it with
//! inline previews happens in [`comfydl_core::outputs::merge_outputs`].

use async_trait::async_trait;

use comfydl_core::outputs::OutputMap;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::{HistoryResponse, ImageRef};

/// Where history records and artifact bytes come from.
#[async_trait]
pub trait ArtifactSource {
    /// Fetch the history response for `prompt_id`.
    async fn history(&self, prompt_id: &str) -> Result<HistoryResponse, ComfyUIApiError>;

    /// Fetch the bytes of one stored artifact.
    async fn artifact(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError>;
}

#[async_trait]
impl ArtifactSource for ComfyUIApi {
    async fn history(&self, prompt_id: &str) -> Result<HistoryResponse, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }

    async fn artifact(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.get_image(image).await
    }
}

/// Errors from result collection.
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The server has no history record for the prompt.
    #[error("no history recorded for prompt {0}")]
    MissingHistory(String),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),
}

/// Fetch every image listed in `prompt_id`'s history.
///
/// Every node in the history record appears in the result, in history
/// order. A node without images maps to an empty list.
pub async fn collect_outputs<A>(source: &A, prompt_id: &str) -> Result<OutputMap, CollectError>
where
    A: ArtifactSource + Sync + ?Sized,
{
    let mut history = source.history(prompt_id).await?;
    let entry = history
        .remove(prompt_id)
        .ok_or_else(|| CollectError::MissingHistory(prompt_id.to_string()))?;

    let mut outputs = OutputMap::with_capacity(entry.outputs.len());
    for (node, output) in entry.outputs {
        let mut artifacts = Vec::with_capacity(output.images.len());
        for image in &output.images {
            let bytes = source.artifact(image).await?;
            tracing::debug!(
                prompt_id,
                node = %node,
                filename = %image.filename,
                bytes = bytes.len(),
                "Fetched artifact",
            );
            artifacts.push(bytes);
        }
        outputs.insert(node, artifacts);
    }

    tracing::info!(
        prompt_id,
        nodes = outputs.len(),
        artifacts = comfydl_core::outputs::artifact_count(&outputs),
        "Collected history outputs",
    );
    Ok(outputs)
}
