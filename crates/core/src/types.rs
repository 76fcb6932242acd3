/// Server-issued node identifier within a workflow graph.
pub type NodeId = String;

/// Server-issued job identifier returned by `POST /prompt`.
pub type PromptId = String;

/// Raw bytes of one produced artifact (encoded image data).
pub type Artifact = Vec<u8>;
