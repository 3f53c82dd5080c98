use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use forge_comfyui::ComfyUiError;
use forge_orchestrator::OrchestratorError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`OrchestratorError`] for domain errors and adds
/// HTTP-specific variants. Implements [`IntoResponse`] to produce
/// consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid API key.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Orchestrator(OrchestratorError::Engine(engine)) => match engine {
                // The engine's own validation wording goes back to the
                // client verbatim.
                ComfyUiError::Submission(diag) => {
                    (StatusCode::BAD_REQUEST, "ENGINE_REJECTED", diag.to_string())
                }
                ComfyUiError::Connectivity(msg) => (
                    StatusCode::BAD_GATEWAY,
                    "ENGINE_UNAVAILABLE",
                    msg.clone(),
                ),
                other => {
                    tracing::error!(error = %other, "Engine error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            ApiError::Orchestrator(OrchestratorError::Storage(err)) => {
                tracing::error!(error = %err, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }

            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
