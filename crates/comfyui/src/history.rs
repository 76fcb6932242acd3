//! Typed view of the ComfyUI `/history/{prompt_id}` response.
//!
//! The response is keyed by prompt id; each entry carries an `outputs`
//! map from node id to that node's output record. Only image
//! descriptors are modelled. Other output kinds (text, gifs, latents)
//! are ignored.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Full `/history/{prompt_id}` body: prompt id -> history entry.
pub type HistoryResponse = HashMap<String, HistoryEntry>;

/// History record for one completed prompt.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// Node id -> output record, in the order the server listed them.
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
}

/// Output record of a single node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    /// Absent for nodes that produce no images.
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

/// Descriptor addressing one stored artifact via `GET /view`.
///
/// Serializes to exactly the `/view` query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage folder kind (`output`, `temp`, `input`).
    #[serde(rename = "type")]
    pub folder_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "p-1": {
            "prompt": [1, "p-1", {}, {}, ["9"]],
            "outputs": {
                "9": {"images": [
                    {"filename": "a_00001_.png", "subfolder": "", "type": "output"},
                    {"filename": "a_00002_.png", "subfolder": "run", "type": "output"}
                ]},
                "3": {"text": ["hello"]},
                "12": {"images": [{"filename": "p.png", "subfolder": "", "type": "temp"}]}
            },
            "status": {"status_str": "success", "completed": true, "messages": []}
        }
    }"#;

    #[test]
    fn parses_image_descriptors() {
        let history: HistoryResponse = serde_json::from_str(SAMPLE).unwrap();
        let entry = &history["p-1"];
        let images = &entry.outputs["9"].images;

        assert_eq!(images.len(), 2);
        assert_eq!(images[1].filename, "a_00002_.png");
        assert_eq!(images[1].subfolder, "run");
        assert_eq!(images[1].folder_type, "output");
    }

    #[test]
    fn node_without_images_has_empty_list() {
        let history: HistoryResponse = serde_json::from_str(SAMPLE).unwrap();
        assert!(history["p-1"].outputs["3"].images.is_empty());
    }

    #[test]
    fn preserves_server_node_order() {
        let history: HistoryResponse = serde_json::from_str(SAMPLE).unwrap();
        let order: Vec<&str> = history["p-1"].outputs.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["9", "3", "12"]);
    }

    #[test]
    fn empty_response_has_no_entry() {
        let history: HistoryResponse = serde_json::from_str("{}").unwrap();
        assert!(history.get("p-1").is_none());
    }

    #[test]
    fn image_ref_serializes_to_view_query_keys() {
        let image = ImageRef {
            filename: "a.png".into(),
            subfolder: "run".into(),
            folder_type: "output".into(),
        };
        assert_eq!(
            serde_json::to_value(&image).unwrap(),
            serde_json::json!({"filename": "a.png", "subfolder": "run", "type": "output"})
        );
    }
}
