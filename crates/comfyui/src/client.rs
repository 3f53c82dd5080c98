//! Connection configuration for a ComfyUI server.

/// Client for a single ComfyUI server.
///
/// Holds the base HTTP URL and a pooled [`reqwest::Client`]. The REST
/// surface lives in [`crate::api`]; per-job progress streaming in
/// [`crate::monitor`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ComfyUiClient {
    base_url: String,
    pub(crate) http: reqwest::Client,
}

impl ComfyUiClient {
    /// Create a client targeting a ComfyUI server.
    ///
    /// * `base_url` - HTTP base URL, e.g. `http://localhost:8188`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (connection pooling across services).
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    /// HTTP base URL (e.g. `http://host:8188`).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket base URL derived from the HTTP one
    /// (`http://` → `ws://`, `https://` → `wss://`).
    pub fn ws_url(&self) -> String {
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        }
    }

    /// Generate a fresh client identity (UUID v4).
    ///
    /// Each submission must use its own identity: the progress socket
    /// is scoped by `clientId`, and sharing one would leak events
    /// across concurrently running jobs.
    pub fn fresh_client_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let client = ComfyUiClient::new("http://localhost:8188/");
        assert_eq!(client.base_url(), "http://localhost:8188");
    }

    #[test]
    fn ws_url_from_http() {
        let client = ComfyUiClient::new("http://host:8188");
        assert_eq!(client.ws_url(), "ws://host:8188");
    }

    #[test]
    fn ws_url_from_https() {
        let client = ComfyUiClient::new("https://host");
        assert_eq!(client.ws_url(), "wss://host");
    }

    #[test]
    fn fresh_client_ids_are_unique() {
        assert_ne!(
            ComfyUiClient::fresh_client_id(),
            ComfyUiClient::fresh_client_id()
        );
    }
}
