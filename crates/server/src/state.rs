use std::sync::Arc;

use forge_orchestrator::GenerationService;

use crate::auth::ApiKeyStore;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheaply cloneable (everything is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub service: Arc<GenerationService>,
    pub api_keys: Arc<ApiKeyStore>,
}
