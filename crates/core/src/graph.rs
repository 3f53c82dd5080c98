//! Typed view over a ComfyUI workflow graph.
//!
//! A workflow is a JSON object mapping node IDs to node objects:
//!
//! ```json
//! {
//!   "3": {
//!     "class_type": "KSampler",
//!     "inputs": { "seed": 42, "model": ["1", 0] },
//!     "_meta": { "title": "Sampler" }
//!   }
//! }
//! ```
//!
//! Inputs hold either scalar values or connection-references encoded as
//! `[source_node_id, output_index]` pairs. [`WorkflowGraph`] keeps the
//! raw JSON intact (unknown node fields survive round-trips) and layers
//! typed accessors and mutators on top.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// A ComfyUI workflow graph keyed by node ID.
///
/// Node IDs are unique by construction (JSON object keys); the graph is
/// otherwise unordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph(pub Map<String, Value>);

/// Returns `true` if an input value is a connection-reference to
/// another node's output (`[source_node_id, output_index]`) rather
/// than a literal scalar.
pub fn is_connection(value: &Value) -> bool {
    matches!(value, Value::Array(arr) if arr.len() == 2)
}

impl WorkflowGraph {
    /// Parse and validate a workflow JSON value.
    ///
    /// The value must be a non-empty object and every node must carry a
    /// string `class_type` field.
    pub fn parse(json: &Value) -> Result<Self, CoreError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CoreError::Validation("Workflow JSON must be an object".to_string()))?;

        if obj.is_empty() {
            return Err(CoreError::Validation(
                "Workflow JSON must contain at least one node".to_string(),
            ));
        }

        for (node_id, node) in obj {
            if node.get("class_type").and_then(Value::as_str).is_none() {
                return Err(CoreError::Validation(format!(
                    "Node '{node_id}' is missing required 'class_type' field"
                )));
            }
        }

        Ok(Self(obj.clone()))
    }

    /// Serialize back to a JSON value for submission.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Node IDs in encounter order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.0.contains_key(node_id)
    }

    /// The `class_type` tag of a node, if the node exists.
    pub fn class_type(&self, node_id: &str) -> Option<&str> {
        self.0
            .get(node_id)?
            .get("class_type")
            .and_then(Value::as_str)
    }

    /// The node's title from `_meta.title`, if present.
    pub fn title(&self, node_id: &str) -> Option<&str> {
        self.0
            .get(node_id)?
            .get("_meta")
            .and_then(|m| m.get("title"))
            .and_then(Value::as_str)
    }

    /// The node's inputs object, if the node exists and has one.
    pub fn inputs(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.0.get(node_id)?.get("inputs").and_then(Value::as_object)
    }

    /// Mutable access to a node's inputs, creating the `inputs` object
    /// if the node exists without one.
    pub fn inputs_mut(&mut self, node_id: &str) -> Option<&mut Map<String, Value>> {
        let node = self.0.get_mut(node_id)?.as_object_mut()?;
        node.entry("inputs".to_string())
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
    }

    /// An input value only when it is a literal scalar, never a
    /// connection-reference.
    pub fn scalar_input(&self, node_id: &str, name: &str) -> Option<&Value> {
        let value = self.inputs(node_id)?.get(name)?;
        if is_connection(value) {
            None
        } else {
            Some(value)
        }
    }

    /// Read the prompt text from a node's `text` input.
    pub fn prompt_text(&self, node_id: &str) -> Option<&str> {
        self.scalar_input(node_id, "text")?.as_str()
    }

    /// Write prompt text into a node's `text` input.
    ///
    /// A missing node is logged and ignored so a stale node ID from a
    /// stored workflow config cannot fail the whole submission.
    pub fn set_prompt_text(&mut self, node_id: &str, text: &str) {
        match self.inputs_mut(node_id) {
            Some(inputs) => {
                inputs.insert("text".to_string(), Value::String(text.to_string()));
                tracing::debug!(node_id, "Set prompt text");
            }
            None => tracing::warn!(node_id, "Node not found, prompt text not set"),
        }
    }

    /// Read the image filename from a node's `image` input.
    pub fn image_filename(&self, node_id: &str) -> Option<&str> {
        self.scalar_input(node_id, "image")?.as_str()
    }

    /// Write an image filename into a node's `image` input.
    pub fn set_image_filename(&mut self, node_id: &str, filename: &str) {
        match self.inputs_mut(node_id) {
            Some(inputs) => {
                inputs.insert("image".to_string(), Value::String(filename.to_string()));
                tracing::debug!(node_id, filename, "Set input image");
            }
            None => tracing::warn!(node_id, "Node not found, input image not set"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn sample_graph() -> WorkflowGraph {
        WorkflowGraph::parse(&json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 42,
                    "steps": 20,
                    "model": ["1", 0]
                }
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "a cat", "clip": ["1", 1] },
                "_meta": { "title": "Positive Prompt" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn parse_rejects_non_object() {
        assert_matches!(WorkflowGraph::parse(&json!([1, 2])), Err(CoreError::Validation(_)));
        assert_matches!(WorkflowGraph::parse(&json!("nope")), Err(CoreError::Validation(_)));
    }

    #[test]
    fn parse_rejects_empty_object() {
        let err = WorkflowGraph::parse(&json!({})).unwrap_err();
        assert_matches!(&err, CoreError::Validation(msg) if msg.contains("at least one node"));
    }

    #[test]
    fn parse_rejects_missing_class_type() {
        let err = WorkflowGraph::parse(&json!({"1": {"inputs": {}}})).unwrap_err();
        assert_matches!(&err, CoreError::Validation(msg) if msg.contains("class_type"));
    }

    #[test]
    fn class_type_and_title_accessors() {
        let graph = sample_graph();
        assert_eq!(graph.class_type("3"), Some("KSampler"));
        assert_eq!(graph.title("6"), Some("Positive Prompt"));
        assert_eq!(graph.title("3"), None);
        assert_eq!(graph.class_type("99"), None);
    }

    #[test]
    fn connection_detection() {
        assert!(is_connection(&json!(["1", 0])));
        assert!(!is_connection(&json!(42)));
        assert!(!is_connection(&json!("euler")));
        assert!(!is_connection(&json!([1, 2, 3])));
    }

    #[test]
    fn scalar_input_excludes_connections() {
        let graph = sample_graph();
        assert_eq!(graph.scalar_input("3", "seed"), Some(&json!(42)));
        assert_eq!(graph.scalar_input("3", "model"), None);
        assert_eq!(graph.scalar_input("3", "missing"), None);
    }

    #[test]
    fn set_prompt_text_overwrites() {
        let mut graph = sample_graph();
        graph.set_prompt_text("6", "a dog");
        assert_eq!(graph.prompt_text("6"), Some("a dog"));
    }

    #[test]
    fn set_prompt_text_creates_missing_inputs() {
        let mut graph = WorkflowGraph::parse(&json!({
            "1": { "class_type": "CLIPTextEncode" }
        }))
        .unwrap();
        graph.set_prompt_text("1", "hello");
        assert_eq!(graph.prompt_text("1"), Some("hello"));
    }

    #[test]
    fn set_prompt_text_on_missing_node_is_noop() {
        let mut graph = sample_graph();
        graph.set_prompt_text("99", "ignored");
        assert!(!graph.contains("99"));
    }

    #[test]
    fn set_image_filename_roundtrip() {
        let mut graph = WorkflowGraph::parse(&json!({
            "4": { "class_type": "LoadImage", "inputs": { "image": "old.png" } }
        }))
        .unwrap();
        graph.set_image_filename("4", "new.png");
        assert_eq!(graph.image_filename("4"), Some("new.png"));
    }

    #[test]
    fn to_value_preserves_unknown_fields() {
        let json = json!({
            "1": { "class_type": "SaveImage", "inputs": {}, "custom_field": true }
        });
        let graph = WorkflowGraph::parse(&json).unwrap();
        assert_eq!(graph.to_value(), json);
    }
}
