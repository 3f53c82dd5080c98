//! HTTP route definitions.
//!
//! ```text
//! POST /api/workflows/analyze       detect prompt/image nodes + parameters
//! POST /api/generate                start a generation
//! GET  /api/generate/ws             progress session (WebSocket)
//! POST /api/generate/upload-image   stage an input image on the engine
//! ```

use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use forge_core::{detect, params, WorkflowGraph};
use forge_orchestrator::{ProgressUpdate, SubmitRequest};

use crate::error::{ApiError, ApiResult};
use crate::session;
use crate::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows/analyze", post(analyze_workflow))
        .route("/generate", post(generate))
        .route("/generate/ws", get(session::ws_handler))
        .route("/generate/upload-image", post(upload_image))
}

/// Resolve the `X-API-Key` header to a user ID.
fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    let key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing X-API-Key header".to_string()))?;
    state
        .api_keys
        .validate(key)
        .map(str::to_string)
        .ok_or_else(|| ApiError::Unauthorized("Invalid API key".to_string()))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    workflow: Value,
}

/// Rank candidate prompt/image nodes and list configurable parameters
/// for a workflow, so the client can prefill its editor.
async fn analyze_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<Value>> {
    authenticate(&state, &headers)?;

    let graph = WorkflowGraph::parse(&request.workflow)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let prompt_nodes = detect::detect_prompt_nodes(&graph);
    let image_nodes = detect::detect_image_nodes(&graph);
    let parameters = params::detect_configurable_params(&graph);

    Ok(Json(json!({
        "prompt_nodes": prompt_nodes,
        "image_nodes": image_nodes,
        "parameters": parameters,
    })))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    /// Workflow graph in ComfyUI API format.
    workflow: Value,
    workflow_id: String,
    workflow_name: String,
    prompt_node_id: String,
    prompt: String,
    #[serde(default)]
    overrides: Map<String, Value>,
    image_node_id: Option<String>,
    /// Engine-assigned name from a prior upload-image call.
    image_filename: Option<String>,
}

async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<ProgressUpdate>> {
    let user_id = authenticate(&state, &headers)?;

    let graph = WorkflowGraph::parse(&request.workflow)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let prompt_id = state
        .service
        .submit(SubmitRequest {
            graph,
            workflow_id: request.workflow_id,
            workflow_name: request.workflow_name,
            prompt_node_id: request.prompt_node_id,
            prompt: request.prompt,
            overrides: request.overrides,
            image_node_id: request.image_node_id,
            image_filename: request.image_filename,
            user_id,
        })
        .await?;

    Ok(Json(ProgressUpdate::queued(&prompt_id)))
}

async fn upload_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    authenticate(&state, &headers)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let original_name = field
            .file_name()
            .unwrap_or("upload.png")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read image field: {e}")))?;

        let assigned = state
            .service
            .upload_input_image(data.to_vec(), &original_name)
            .await?;

        return Ok(Json(json!({
            "name": assigned,
            "original_name": original_name,
        })));
    }

    Err(ApiError::BadRequest(
        "Multipart body must contain an 'image' field".to_string(),
    ))
}
