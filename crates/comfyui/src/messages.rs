//! Text frames on the ComfyUI event stream.
//!
//! Every text frame is `{"type": "<kind>", "data": {...}}`. Only the
//! kinds the completion tracker acts on get a typed payload; everything
//! else is kept as [`ServerEvent::Other`] with its tag so it can be
//! logged and skipped.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// One decoded text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Queue depth broadcast, sent on connect and whenever the queue moves.
    Status { queue_remaining: i32 },

    /// A node of some prompt started; `node == None` means that prompt
    /// has finished.
    Executing(ExecutingData),

    /// Step progress inside a long-running node.
    Progress(ProgressData),

    /// A node raised an exception.
    ExecutionError(ErrorData),

    /// Any kind without a typed payload (`execution_start`, `executed`,
    /// custom-node broadcasts, ...).
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct StatusPayload {
    status: QueueState,
}

#[derive(Deserialize)]
struct QueueState {
    exec_info: ExecInfo,
}

#[derive(Deserialize)]
struct ExecInfo {
    queue_remaining: i32,
}

/// Payload of `executing`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Payload of `progress`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    /// Older servers omit it.
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

/// Payload of `execution_error`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_type: Option<String>,
    pub exception_type: String,
    pub exception_message: String,
}

/// Decode one text frame.
///
/// Fails on malformed JSON, a missing `type`, or a typed kind whose
/// `data` does not match. Unknown kinds never fail.
pub fn parse_event(text: &str) -> Result<ServerEvent, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;
    let event = match kind.as_str() {
        "status" => {
            let payload: StatusPayload = payload(data)?;
            ServerEvent::Status {
                queue_remaining: payload.status.exec_info.queue_remaining,
            }
        }
        "executing" => ServerEvent::Executing(payload(data)?),
        "progress" => ServerEvent::Progress(payload(data)?),
        "execution_error" => ServerEvent::ExecutionError(payload(data)?),
        _ => ServerEvent::Other(kind),
    };
    Ok(event)
}

fn payload<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}
