use std::path::PathBuf;
use std::time::Duration;

use forge_comfyui::MonitorConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8290`).
    pub port: u16,
    /// Base URL of the ComfyUI server.
    pub comfyui_base_url: String,
    /// Root directory for saved images, metadata, and the API key file.
    pub data_path: PathBuf,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// Hard ceiling on one generation, in seconds.
    pub job_timeout_secs: u64,
    /// Per-message WebSocket receive timeout, in seconds.
    pub message_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `8290`                     |
    /// | `COMFYUI_BASE_URL`     | `http://localhost:8188`    |
    /// | `DATA_PATH`            | `./data`                   |
    /// | `CORS_ORIGINS`         | `http://localhost:5173`    |
    /// | `JOB_TIMEOUT_SECS`     | `300`                      |
    /// | `MESSAGE_TIMEOUT_SECS` | `5`                        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8290".into())
            .parse()
            .expect("PORT must be a valid u16");

        let comfyui_base_url =
            std::env::var("COMFYUI_BASE_URL").unwrap_or_else(|_| "http://localhost:8188".into());

        let data_path = PathBuf::from(std::env::var("DATA_PATH").unwrap_or_else(|_| "./data".into()));

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let job_timeout_secs: u64 = std::env::var("JOB_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("JOB_TIMEOUT_SECS must be a valid u64");

        let message_timeout_secs: u64 = std::env::var("MESSAGE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("MESSAGE_TIMEOUT_SECS must be a valid u64");

        Self {
            host,
            port,
            comfyui_base_url,
            data_path,
            cors_origins,
            job_timeout_secs,
            message_timeout_secs,
        }
    }

    /// Path of the API key file under the data root.
    pub fn api_keys_path(&self) -> PathBuf {
        self.data_path.join("api_keys.json")
    }

    /// Monitoring timeouts derived from the configured overrides.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            message_timeout: Duration::from_secs(self.message_timeout_secs),
            ..MonitorConfig::default()
        }
    }
}
