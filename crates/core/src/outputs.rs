//! Output mapping: `node_id -> ordered artifacts`.
//!
//! Two producers fill output mappings independently: the completion
//! tracker (inline preview frames pushed over the websocket) and the
//! result collector (authoritative listing from the history endpoint).
//! They are combined once, by [`merge_outputs`], after both finished.

use indexmap::IndexMap;

use crate::types::{Artifact, NodeId};

/// Artifacts grouped by producing node, in first-seen node order.
pub type OutputMap = IndexMap<NodeId, Vec<Artifact>>;

/// Append one artifact to a node's list, creating the list on first use.
pub fn push_artifact(map: &mut OutputMap, node: &str, artifact: Artifact) {
    match map.get_mut(node) {
        Some(list) => list.push(artifact),
        None => {
            map.insert(node.to_string(), vec![artifact]);
        }
    }
}

/// Merge inline and history outputs. History always wins.
///
/// Inline entries keep their position. A node present in both has its
/// inline list replaced wholesale by the history list; history-only
/// nodes are appended in history order. Inline-only nodes survive
/// untouched.
pub fn merge_outputs(inline: OutputMap, history: OutputMap) -> OutputMap {
    let mut merged = inline;
    for (node, artifacts) in history {
        if let Some(previous) = merged.insert(node, artifacts) {
            tracing::debug!(
                discarded = previous.len(),
                "Inline artifacts superseded by history"
            );
        }
    }
    merged
}

/// Total number of artifacts across all nodes.
pub fn artifact_count(map: &OutputMap) -> usize {
    map.values().map(Vec::len).sum()
}
