//! One end-to-end job: connect, submit, track, collect, merge.

use tokio_util::sync::CancellationToken;

use comfydl_core::outputs::{artifact_count, merge_outputs, OutputMap};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError};
use crate::collector::{collect_outputs, CollectError};
use crate::session::ClientId;
use crate::tracker::{CompletionTracker, TrackError};

/// Everything produced by one finished job.
#[derive(Debug)]
pub struct JobOutputs {
    pub prompt_id: String,
    /// Inline previews merged with history; history wins per node.
    pub outputs: OutputMap,
}

/// Errors from [`run_job`], tagged by the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("failed to open event stream: {0}")]
    Connect(#[from] ComfyUIClientError),

    #[error("failed to submit workflow: {0}")]
    Submit(#[source] ComfyUIApiError),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error("failed to collect outputs: {0}")]
    Collect(#[from] CollectError),

    /// The token was tripped outside tracking; the field names the stage.
    #[error("cancelled while {0}")]
    Cancelled(&'static str),
}

/// Run `workflow` on the server and gather its outputs.
///
/// The event stream is opened before submission so no event for the
/// new prompt can be missed. `cancel` is honoured at every stage: while
/// tracking it yields [`TrackError::Cancelled`] and the prompt is removed
/// from the server queue on a best-effort basis; anywhere else it yields
/// [`JobError::Cancelled`].
pub async fn run_job(
    client: &ComfyUIClient,
    api: &ComfyUIApi,
    workflow: &serde_json::Value,
    cancel: &CancellationToken,
) -> Result<JobOutputs, JobError> {
    let client_id = ClientId::new();
    let mut conn = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled("connecting")),
        conn = client.connect(&client_id) => conn?,
    };

    let submitted = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled("submitting")),
        submitted = api.submit_workflow(workflow, &client_id) => {
            submitted.map_err(JobError::Submit)?
        }
    };
    let prompt_id = submitted.prompt_id;

    tracing::info!(
        client_id = %client_id,
        prompt_id = %prompt_id,
        queue_number = submitted.number,
        "Workflow submitted to ComfyUI",
    );

    let tracked = CompletionTracker::new(prompt_id.as_str())
        .run(&mut conn.ws_stream, cancel)
        .await;

    if let Err(e) = conn.ws_stream.close(None).await {
        tracing::debug!(error = %e, "Error closing ComfyUI WebSocket");
    }

    let inline = match tracked {
        Ok(inline) => inline,
        Err(e @ TrackError::Cancelled { .. }) => {
            if let Err(cancel_err) = api.cancel_execution(&prompt_id).await {
                tracing::warn!(
                    prompt_id = %prompt_id,
                    error = %cancel_err,
                    "Failed to remove cancelled prompt from queue",
                );
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let history = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(JobError::Cancelled("collecting outputs")),
        history = collect_outputs(api, &prompt_id) => history?,
    };
    let outputs = merge_outputs(inline, history);

    tracing::info!(
        prompt_id = %prompt_id,
        nodes = outputs.len(),
        artifacts = artifact_count(&outputs),
        "Job outputs ready",
    );

    Ok(JobOutputs { prompt_id, outputs })
}
