//! Completion tracking over the ComfyUI event stream.
//!
//! Reads frames from a ComfyUI WebSocket connection until the server
//! signals that one specific prompt has finished (`executing` with a
//! null node). The stream is shared by every job the server runs, so
//! events are correlated by `prompt_id`. While the designated save-node
//! is active, binary frames carry preview images; those are collected
//! into an inline output mapping returned on completion.
//!
//! The read is raced against a [`CancellationToken`] so callers can
//! impose a deadline.

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use comfydl_core::outputs::{push_artifact, OutputMap};

use crate::messages::{parse_event, ExecutingData, ProgressData, ServerEvent};

/// Node id whose binary frames are kept as inline artifacts.
pub const SAVE_NODE_ID: &str = "save_image_websocket_node";

/// Size of the header preceding image bytes in a binary frame
/// (big-endian event type + image format, 4 bytes each).
pub const PREVIEW_HEADER_LEN: usize = 8;

/// Errors that end tracking before the prompt finished.
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    /// The cancellation token fired (deadline or user interrupt).
    #[error("tracking of prompt {prompt_id} was cancelled")]
    Cancelled { prompt_id: String },

    /// The server closed the connection or the stream ended.
    #[error("event stream closed before prompt {prompt_id} finished")]
    Disconnected { prompt_id: String },

    /// A protocol-level error on the established connection.
    #[error("WebSocket receive error: {0}")]
    Transport(#[from] tungstenite::Error),
}

/// Whether the tracked prompt has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished,
}

/// Per-prompt tracking state.
#[derive(Debug)]
pub struct CompletionTracker {
    prompt_id: String,
    save_node: String,
    /// Most recent node reported executing for this prompt.
    current_node: Option<String>,
    inline: OutputMap,
}

impl CompletionTracker {
    /// Track `prompt_id`, keeping binary frames from [`SAVE_NODE_ID`].
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            save_node: SAVE_NODE_ID.to_string(),
            current_node: None,
            inline: OutputMap::new(),
        }
    }

    /// Override which node's binary frames are kept.
    pub fn with_save_node(mut self, node: impl Into<String>) -> Self {
        self.save_node = node.into();
        self
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    /// Inline artifacts collected so far.
    pub fn inline(&self) -> &OutputMap {
        &self.inline
    }

    /// Read `stream` until the prompt finishes, the stream ends, or
    /// `cancel` fires. Returns the inline artifacts on completion.
    pub async fn run<S>(
        mut self,
        stream: &mut S,
        cancel: &CancellationToken,
    ) -> Result<OutputMap, TrackError>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(prompt_id = %self.prompt_id, "Completion tracking cancelled");
                    return Err(TrackError::Cancelled { prompt_id: self.prompt_id });
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    if self.handle_text(&text) == Step::Finished {
                        return Ok(self.inline);
                    }
                }
                Some(Ok(Message::Binary(payload))) => {
                    self.handle_binary(&payload);
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::warn!(prompt_id = %self.prompt_id, ?frame, "ComfyUI WebSocket closed");
                    return Err(TrackError::Disconnected { prompt_id: self.prompt_id });
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    tracing::error!(prompt_id = %self.prompt_id, error = %e, "WebSocket receive error");
                    return Err(TrackError::Transport(e));
                }
                None => {
                    tracing::warn!(prompt_id = %self.prompt_id, "WebSocket stream exhausted");
                    return Err(TrackError::Disconnected { prompt_id: self.prompt_id });
                }
            }
        }
    }

    /// Apply one text frame. Malformed frames are logged and skipped.
    pub fn handle_text(&mut self, text: &str) -> Step {
        let event = match parse_event(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
                return Step::Continue;
            }
        };
        match event {
            ServerEvent::Executing(data) => self.handle_executing(&data),
            ServerEvent::Progress(data) => {
                handle_progress(&data);
                Step::Continue
            }
            ServerEvent::ExecutionError(data) if data.prompt_id == self.prompt_id => {
                tracing::error!(
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                Step::Continue
            }
            ServerEvent::Status { queue_remaining } => {
                tracing::debug!(queue_remaining, "ComfyUI queue status");
                Step::Continue
            }
            other => {
                tracing::debug!(event = ?other, "Ignoring message");
                Step::Continue
            }
        }
    }

    /// Apply one binary frame: keep it only while the save-node runs.
    pub fn handle_binary(&mut self, payload: &[u8]) {
        let Some(node) = self.current_node.as_deref() else {
            tracing::trace!(bytes = payload.len(), "Dropping binary frame, no active node");
            return;
        };
        if node != self.save_node {
            tracing::trace!(node = %node, bytes = payload.len(), "Dropping binary frame");
            return;
        }
        let Some(image) = payload.get(PREVIEW_HEADER_LEN..) else {
            tracing::warn!(bytes = payload.len(), "Binary frame shorter than its header");
            return;
        };

        tracing::debug!(node = %node, bytes = image.len(), "Collected inline artifact");
        push_artifact(&mut self.inline, &self.save_node, image.to_vec());
    }

    fn handle_executing(&mut self, data: &ExecutingData) -> Step {
        if data.prompt_id != self.prompt_id {
            return Step::Continue;
        }
        match &data.node {
            Some(node) => {
                tracing::debug!(prompt_id = %data.prompt_id, node = %node, "Executing node");
                self.current_node = Some(node.clone());
                Step::Continue
            }
            None => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution completed (all nodes done)");
                Step::Finished
            }
        }
    }
}

/// Read `stream` until `prompt_id` finishes. See [`CompletionTracker::run`].
pub async fn track_completion<S>(
    stream: &mut S,
    prompt_id: &str,
    cancel: &CancellationToken,
) -> Result<OutputMap, TrackError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    CompletionTracker::new(prompt_id).run(stream, cancel).await
}

fn handle_progress(data: &ProgressData) {
    let percent = if data.max > 0 {
        ((data.value as f64 / data.max as f64) * 100.0) as i16
    } else {
        0
    };
    tracing::debug!(
        prompt_id = data.prompt_id.as_deref().unwrap_or(""),
        value = data.value,
        max = data.max,
        percent,
        "Generation progress",
    );
}
