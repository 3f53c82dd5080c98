//! API-key authentication.
//!
//! Keys live in a JSON file mapping key to user ID, loaded once at
//! startup. Key issuance and rotation happen outside the server.

use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    #[error("Failed to read API key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("API key file is not a JSON object of key -> user_id: {0}")]
    Format(#[from] serde_json::Error),
}

/// Immutable key -> user-ID lookup.
#[derive(Debug, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, String>,
}

impl ApiKeyStore {
    /// Load the key file. A missing file yields an empty store, so a
    /// fresh deployment starts up but rejects every request.
    pub fn load(path: &Path) -> Result<Self, ApiKeyError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "API key file missing; all requests will be rejected");
            return Ok(Self::default());
        }
        let body = std::fs::read_to_string(path)?;
        let keys: HashMap<String, String> = serde_json::from_str(&body)?;
        tracing::info!(count = keys.len(), "Loaded API keys");
        Ok(Self { keys })
    }

    /// Resolve a key to its user ID.
    pub fn validate(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub fn from_entries(entries: &[(&str, &str)]) -> Self {
        Self {
            keys: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}
