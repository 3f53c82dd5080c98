//! Wire model for the ComfyUI progress socket.
//!
//! Every frame on the socket is a JSON object of the shape
//! `{"type": "<kind>", "data": {...}}`; [`ComfyUiMessage`] covers the
//! kinds the monitor cares about. There is no catch-all variant on
//! purpose: a frame with an unlisted `type` (custom-node extensions
//! emit plenty) simply fails to deserialize, and the monitor treats
//! that as "skip".

use serde::{Deserialize, Serialize};

/// A decoded progress-socket frame.
///
/// Internally tagged on `"type"`, payload under `"data"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUiMessage {
    /// Periodic broadcast of queue depth.
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt left the queue and began executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(ExecutionStartData),

    /// Nodes skipped because their prior outputs were reusable.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// The engine moved on to a node; `node: null` marks the end of
    /// the whole prompt.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step counter from inside a long-running node.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node produced output (for our purposes, the final images).
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// The prompt failed at some node.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    /// The prompt was interrupted server-side.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(InterruptedData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    /// Prompts still ahead in the queue.
    pub queue_remaining: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// `executing` payload. A `None` node means the prompt as a whole is
/// done; the outputs arrive separately in `executed`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    #[serde(default)]
    pub node: Option<String>,
    pub prompt_id: String,
}

/// `progress` payload: step `value` of `max` within one node.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
}

/// `executed` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// Node that produced the output, when the engine names one.
    #[serde(default)]
    pub node: Option<String>,
    /// Raw output value; generated images live under `output.images`.
    #[serde(default)]
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// `execution_error` payload. Every descriptive field is defaulted:
/// engines and custom nodes are inconsistent about which ones they
/// fill in, and a sparse error is still an error.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// `execution_interrupted` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
}

/// Descriptor of one generated image, as reported in `executed`
/// messages and history entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// ComfyUI image kind (`output`, `temp`, ...).
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl ExecutedData {
    /// Extract the image descriptors from the raw `output` value.
    /// Missing or malformed `images` lists yield an empty vec.
    pub fn images(&self) -> Vec<ImageRef> {
        self.output
            .get("images")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log unknown types and continue.
pub fn parse_message(text: &str) -> Result<ComfyUiMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}}}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::Status(data) => {
                assert_eq!(data.status.exec_info.queue_remaining, 3);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_executing_with_node() {
        let json = r#"{"type":"executing","data":{"node":"42","prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::Executing(data) => {
                assert_eq!(data.node.as_deref(), Some("42"));
                assert_eq!(data.prompt_id, "xyz");
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::Executing(data) => assert!(data.node.is_none()),
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_executed_without_node_field() {
        let json = r#"{"type":"executed","data":{"prompt_id":"p1","output":{"images":[{"filename":"a.png","subfolder":"","type":"output"}]}}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::Executed(data) => {
                assert_eq!(data.prompt_id, "p1");
                let images = data.images();
                assert_eq!(images.len(), 1);
                assert_eq!(images[0].filename, "a.png");
                assert_eq!(images[0].kind, "output");
            }
            other => panic!("Expected Executed, got {other:?}"),
        }
    }

    #[test]
    fn executed_without_images_yields_empty_vec() {
        let json = r#"{"type":"executed","data":{"prompt_id":"p1","output":{}}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::Executed(data) => assert!(data.images().is_empty()),
            other => panic!("Expected Executed, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::ExecutionError(data) => {
                assert_eq!(data.prompt_id, "abc");
                assert_eq!(data.node_id, "5");
                assert_eq!(data.exception_message, "out of memory");
                assert_eq!(data.exception_type, "RuntimeError");
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_interrupted_message() {
        let json = r#"{"type":"execution_interrupted","data":{"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::ExecutionInterrupted(data) => {
                assert_eq!(data.prompt_id, "abc");
            }
            other => panic!("Expected ExecutionInterrupted, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_cached_message() {
        let json =
            r#"{"type":"execution_cached","data":{"prompt_id":"abc","nodes":["1","2"]}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUiMessage::ExecutionCached(data) => {
                assert_eq!(data.nodes, vec!["1", "2"]);
            }
            other => panic!("Expected ExecutionCached, got {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_type_returns_error() {
        let json = r#"{"type":"crystools.monitor","data":{}}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }
}
