//! Error taxonomy for the ComfyUI protocol client.

use std::fmt;

use serde_json::Value;

/// Engine-provided diagnostic from a rejected submission.
///
/// ComfyUI reports validation failures in two shapes: a nested
/// `{"error": {...}}` object or a flat object with top-level `type` /
/// `message` fields. Both collapse into this struct; the engine's
/// wording is surfaced verbatim.
#[derive(Debug, Clone)]
pub struct EngineDiagnostic {
    /// Engine error type tag (e.g. `prompt_outputs_failed_validation`).
    pub kind: String,
    pub message: String,
    pub details: Option<String>,
    pub extra_info: Option<Value>,
}

impl fmt::Display for EngineDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComfyUI error [{}]: {}", self.kind, self.message)?;
        if let Some(details) = &self.details {
            if !details.is_empty() {
                write!(f, " - Details: {details}")?;
            }
        }
        if let Some(extra) = &self.extra_info {
            write!(f, " - Extra info: {extra}")?;
        }
        Ok(())
    }
}

/// Errors from the ComfyUI client.
///
/// Only `ImageDownload` / `ImageUpload` are recoverable by callers
/// (a single output image may be dropped); everything else terminates
/// the current submission or monitoring sequence. Nothing here is
/// retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUiError {
    /// The transport could not be reached (HTTP or WebSocket).
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// The engine rejected the submitted workflow.
    #[error("{0}")]
    Submission(EngineDiagnostic),

    /// An unexpected response shape from the engine.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No terminal event arrived within the job ceiling.
    #[error("Execution timeout after {0} seconds")]
    ExecutionTimeout(u64),

    /// The engine reported a failed or interrupted execution.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Downloading one generated image failed.
    #[error("Failed to download image: {0}")]
    ImageDownload(String),

    /// Uploading an input image failed.
    #[error("Failed to upload image: {0}")]
    ImageUpload(String),
}
