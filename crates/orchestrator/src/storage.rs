//! Output persistence.
//!
//! [`ImageStore`] is the seam between generation and disk: the
//! filesystem implementation writes image bytes under a per-owner,
//! per-workflow directory and a JSON metadata record next to it.
//! [`ImageSource`] is the matching seam for fetching bytes from the
//! engine, so finalization can be exercised without a live server.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use forge_comfyui::{ComfyUiClient, ComfyUiError};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize metadata: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Record describing one saved output image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub id: Uuid,
    /// Filename as assigned by the engine.
    pub filename: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub owner_id: String,
    /// Prompt text the image was generated from.
    pub prompt: String,
    pub prompt_id: String,
    /// Where the image bytes landed on disk.
    pub file_path: PathBuf,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    /// Applied parameter values and anything else worth keeping.
    pub metadata: Value,
}

/// Fetches generated image bytes from the engine.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch_image(&self, filename: &str, subfolder: &str)
        -> Result<Vec<u8>, ComfyUiError>;
}

#[async_trait]
impl ImageSource for ComfyUiClient {
    async fn fetch_image(
        &self,
        filename: &str,
        subfolder: &str,
    ) -> Result<Vec<u8>, ComfyUiError> {
        self.download_image(filename, subfolder).await
    }
}

/// Persists image bytes and their metadata records.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Save image bytes, returning the path they landed at.
    async fn save_image(
        &self,
        data: &[u8],
        owner_id: &str,
        workflow_name: &str,
        filename: &str,
    ) -> Result<PathBuf, StorageError>;

    /// Save the metadata record for an already-saved image.
    async fn save_metadata(&self, meta: &ImageMetadata) -> Result<(), StorageError>;
}

/// Filesystem-backed [`ImageStore`].
///
/// Layout under the data root:
///   `images/{owner_id}/{workflow_name}/{YYYYmmdd_HHMMSS}_{filename}`
///   `metadata/{image_id}.json`
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Keep user-supplied names from escaping the data root.
    fn sanitize(component: &str) -> String {
        let cleaned: String = component
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned.trim_matches(&['.', ' '][..]).is_empty() {
            "unnamed".to_string()
        } else {
            cleaned
        }
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save_image(
        &self,
        data: &[u8],
        owner_id: &str,
        workflow_name: &str,
        filename: &str,
    ) -> Result<PathBuf, StorageError> {
        let dir = self
            .root
            .join("images")
            .join(Self::sanitize(owner_id))
            .join(Self::sanitize(workflow_name));
        tokio::fs::create_dir_all(&dir).await.map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("{timestamp}_{}", Self::sanitize(filename)));
        tokio::fs::write(&path, data).await.map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), size = data.len(), "Saved output image");
        Ok(path)
    }

    async fn save_metadata(&self, meta: &ImageMetadata) -> Result<(), StorageError> {
        let dir = self.root.join("metadata");
        tokio::fs::create_dir_all(&dir).await.map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(format!("{}.json", meta.id));
        let body = serde_json::to_vec_pretty(meta)?;
        tokio::fs::write(&path, body).await.map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(path = %path.display(), "Saved image metadata");
        Ok(())
    }
}
