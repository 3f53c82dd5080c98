//! REST surface of the ComfyUI HTTP API.
//!
//! Workflow submission, history (terminal-state) lookup, image
//! download/upload, and queue control, all on [`ComfyUiClient`].

use serde::Deserialize;
use serde_json::{json, Map, Value};

use forge_core::WorkflowGraph;

use crate::client::ComfyUiClient;
use crate::error::{ComfyUiError, EngineDiagnostic};
use crate::messages::ImageRef;

/// One entry of the `/history/{prompt_id}` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: HistoryStatus,
    /// Per-node outputs keyed by node ID.
    #[serde(default)]
    pub outputs: Map<String, Value>,
}

/// Completion status within a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub completed: bool,
}

impl HistoryEntry {
    /// Flatten the per-node `images` lists into one ordered sequence
    /// (node-id order).
    pub fn images(&self) -> Vec<ImageRef> {
        let mut images = Vec::new();
        for node_output in self.outputs.values() {
            let Some(list) = node_output.get("images") else {
                continue;
            };
            if let Ok(mut refs) = serde_json::from_value::<Vec<ImageRef>>(list.clone()) {
                images.append(&mut refs);
            }
        }
        images
    }
}

/// Extract an engine diagnostic from a `/prompt` response body.
///
/// Accepts both observed error shapes:
/// 1. `{"error": {"type": ..., "message": ..., "details": ...}}`
/// 2. `{"type": ..., "message": ..., ...}` (flat, e.g.
///    `prompt_outputs_failed_validation`)
pub(crate) fn extract_diagnostic(body: &Value) -> Option<EngineDiagnostic> {
    let info = if let Some(nested) = body.get("error") {
        nested
    } else if body.get("type").is_some() && body.get("message").is_some() {
        body
    } else {
        return None;
    };

    Some(EngineDiagnostic {
        kind: info
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        message: info
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
        details: info
            .get("details")
            .and_then(Value::as_str)
            .map(str::to_string),
        extra_info: info.get("extra_info").cloned(),
    })
}

impl ComfyUiClient {
    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with the workflow and the job's client
    /// identity. Returns the engine-assigned prompt ID used to
    /// correlate all later events.
    ///
    /// Engine validation failures surface as
    /// [`ComfyUiError::Submission`] with the diagnostic verbatim;
    /// unreachable transport as [`ComfyUiError::Connectivity`].
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<String, ComfyUiError> {
        let body = json!({
            "client_id": client_id,
            "prompt": workflow.to_value(),
        });

        tracing::info!(url = %format!("{}/prompt", self.base_url()), "Submitting workflow");
        let response = self
            .http
            .post(format!("{}/prompt", self.base_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ComfyUiError::Connectivity(format!(
                    "Cannot connect to ComfyUI at {}: {e}",
                    self.base_url()
                ))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ComfyUiError::Protocol(format!("Failed to read response body: {e}")))?;

        // Both success and failure bodies can carry a validation
        // diagnostic; check before anything else so the engine's
        // wording is preserved.
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            if let Some(diag) = extract_diagnostic(&parsed) {
                tracing::error!(error = %diag, "ComfyUI rejected workflow");
                return Err(ComfyUiError::Submission(diag));
            }

            if status.is_success() {
                let prompt_id = parsed
                    .get("prompt_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ComfyUiError::Protocol(format!("No prompt_id in response: {parsed}"))
                    })?
                    .to_string();
                tracing::info!(prompt_id = %prompt_id, "Workflow submitted");
                return Ok(prompt_id);
            }
        }

        Err(ComfyUiError::Protocol(format!(
            "HTTP {}: {}",
            status.as_u16(),
            text.chars().take(200).collect::<String>()
        )))
    }

    /// One-shot terminal-state check via `GET /history/{prompt_id}`.
    ///
    /// Returns `Ok(None)` when the job has no history entry yet.
    /// Lookup failures also degrade to `Ok(None)` with a warning: this
    /// check is a best-effort shortcut, never a reason to abort
    /// monitoring.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUiError> {
        let result: Result<Option<HistoryEntry>, String> = async {
            let response = self
                .http
                .get(format!("{}/history/{}", self.base_url(), prompt_id))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if !response.status().is_success() {
                return Err(format!("HTTP {}", response.status().as_u16()));
            }
            let mut body: Map<String, Value> =
                response.json().await.map_err(|e| e.to_string())?;
            match body.remove(prompt_id) {
                Some(entry) => serde_json::from_value(entry)
                    .map(Some)
                    .map_err(|e| e.to_string()),
                None => Ok(None),
            }
        }
        .await;

        match result {
            Ok(entry) => Ok(entry),
            Err(e) => {
                tracing::warn!(prompt_id, error = %e, "History lookup failed");
                Ok(None)
            }
        }
    }

    /// Download a generated image via `GET /view`.
    pub async fn download_image(
        &self,
        filename: &str,
        subfolder: &str,
    ) -> Result<Vec<u8>, ComfyUiError> {
        let url = if subfolder.is_empty() {
            format!("{}/view?filename={filename}", self.base_url())
        } else {
            format!(
                "{}/view?filename={filename}&subfolder={subfolder}",
                self.base_url()
            )
        };

        tracing::debug!(filename, subfolder, "Downloading image");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ComfyUiError::ImageDownload(format!("{filename}: {e}")))?;

        if !response.status().is_success() {
            return Err(ComfyUiError::ImageDownload(format!(
                "{filename}: HTTP {}",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ComfyUiError::ImageDownload(format!("{filename}: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Upload an input image via multipart `POST /upload/image`.
    ///
    /// Returns the filename ComfyUI assigned, which may differ from
    /// the uploaded name (deduplication suffixes). Callers must use
    /// the returned name when wiring the image into a workflow.
    pub async fn upload_image(
        &self,
        image_data: Vec<u8>,
        filename: &str,
    ) -> Result<String, ComfyUiError> {
        let part = reqwest::multipart::Part::bytes(image_data)
            .file_name(filename.to_string())
            .mime_str("image/png")
            .map_err(|e| ComfyUiError::ImageUpload(format!("{filename}: {e}")))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        tracing::info!(filename, "Uploading image");
        let response = self
            .http
            .post(format!("{}/upload/image", self.base_url()))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ComfyUiError::ImageUpload(format!("{filename}: {e}")))?;

        if !response.status().is_success() {
            return Err(ComfyUiError::ImageUpload(format!(
                "{filename}: HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ComfyUiError::ImageUpload(format!("{filename}: {e}")))?;
        let assigned = body
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(filename)
            .to_string();
        tracing::info!(filename, assigned = %assigned, "Image uploaded");
        Ok(assigned)
    }

    /// Remove a queued prompt via `POST /queue`.
    pub async fn cancel_queued(&self, prompt_id: &str) -> Result<(), ComfyUiError> {
        let body = json!({ "delete": [prompt_id] });
        let response = self
            .http
            .post(format!("{}/queue", self.base_url()))
            .json(&body)
            .send()
            .await
            .map_err(|e| ComfyUiError::Connectivity(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ComfyUiError::Protocol(format!(
                "Cancel failed: HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// Interrupt whatever is currently executing via `POST /interrupt`.
    ///
    /// Note: monitoring timeouts do NOT call this — a local timeout
    /// stops observation only, the remote job keeps running unless the
    /// caller explicitly interrupts it.
    pub async fn interrupt(&self) -> Result<(), ComfyUiError> {
        let response = self
            .http
            .post(format!("{}/interrupt", self.base_url()))
            .send()
            .await
            .map_err(|e| ComfyUiError::Connectivity(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ComfyUiError::Protocol(format!(
                "Interrupt failed: HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_error_shape() {
        let body = json!({
            "error": {
                "type": "invalid_prompt",
                "message": "Cannot execute because node X does not exist",
                "details": "Node ID '#9'",
                "extra_info": {}
            },
            "node_errors": {}
        });
        let diag = extract_diagnostic(&body).unwrap();
        assert_eq!(diag.kind, "invalid_prompt");
        assert_eq!(diag.message, "Cannot execute because node X does not exist");
        assert_eq!(diag.details.as_deref(), Some("Node ID '#9'"));
    }

    #[test]
    fn extracts_flat_error_shape() {
        let body = json!({
            "type": "prompt_outputs_failed_validation",
            "message": "Prompt outputs failed validation",
            "details": "",
            "extra_info": {}
        });
        let diag = extract_diagnostic(&body).unwrap();
        assert_eq!(diag.kind, "prompt_outputs_failed_validation");
        assert_eq!(diag.message, "Prompt outputs failed validation");
    }

    #[test]
    fn success_body_has_no_diagnostic() {
        let body = json!({ "prompt_id": "abc-123", "number": 4 });
        assert!(extract_diagnostic(&body).is_none());
    }

    #[test]
    fn flat_shape_requires_both_type_and_message() {
        // A body with only "type" (e.g. unrelated payloads) is not an error.
        assert!(extract_diagnostic(&json!({ "type": "something" })).is_none());
    }

    #[test]
    fn missing_fields_fall_back_to_unknown() {
        let diag = extract_diagnostic(&json!({ "error": {} })).unwrap();
        assert_eq!(diag.kind, "unknown");
        assert_eq!(diag.message, "Unknown error");
        assert!(diag.details.is_none());
    }

    #[test]
    fn history_entry_flattens_images_across_nodes() {
        let entry: HistoryEntry = serde_json::from_value(json!({
            "status": { "completed": true },
            "outputs": {
                "9": { "images": [
                    { "filename": "a.png", "subfolder": "", "type": "output" }
                ]},
                "12": { "images": [
                    { "filename": "b.png", "subfolder": "batch", "type": "output" }
                ]},
                "13": { "text": ["not an image"] }
            }
        }))
        .unwrap();

        assert!(entry.status.completed);
        let images = entry.images();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].filename, "a.png");
        assert_eq!(images[1].subfolder, "batch");
    }

    #[test]
    fn incomplete_history_entry_defaults() {
        let entry: HistoryEntry = serde_json::from_value(json!({})).unwrap();
        assert!(!entry.status.completed);
        assert!(entry.images().is_empty());
    }
}
