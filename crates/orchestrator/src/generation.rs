//! Generation lifecycle: submit, monitor, finalize.
//!
//! [`GenerationService::submit`] injects the prompt (and optional
//! input image) into a caller-supplied workflow copy, applies
//! parameter overrides with seed randomization, submits to the engine
//! and registers the job for later correlation.
//! [`GenerationService::monitor`] reattaches to a registered job and
//! adapts the raw protocol stream into client-facing
//! [`ProgressUpdate`]s, saving output images through the configured
//! [`ImageStore`] on completion.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use forge_comfyui::{ComfyUiClient, ImageRef, MonitorConfig, ProgressEvent, ProgressStream};
use forge_core::{overrides::apply_overrides, WorkflowGraph};

use crate::error::OrchestratorError;
use crate::registry::{JobRecord, JobRegistry};
use crate::storage::{ImageMetadata, ImageSource, ImageStore};

/// Everything needed to start one generation.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Private copy of the workflow; mutations never touch the
    /// caller's stored original.
    pub graph: WorkflowGraph,
    pub workflow_id: String,
    pub workflow_name: String,
    /// Node to receive the prompt text.
    pub prompt_node_id: String,
    pub prompt: String,
    /// Parameter overrides, simple (`"steps": 30`) and structured
    /// (`{"node_id", "path", "value"}`) entries mixed.
    pub overrides: Map<String, Value>,
    /// Node to receive the input image, when the workflow takes one.
    pub image_node_id: Option<String>,
    /// Engine-assigned filename of a previously uploaded input image.
    pub image_filename: Option<String>,
    pub user_id: String,
}

/// Context for monitoring a previously submitted job.
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    pub workflow_id: String,
    pub workflow_name: String,
    pub prompt: String,
    pub user_id: String,
    /// When true, completed images are downloaded and persisted;
    /// otherwise the engine-side references are passed through.
    pub save_outputs: bool,
}

/// Client-facing generation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

/// One image in a terminal `Completed` update.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutputImage {
    /// Persisted locally through the [`ImageStore`].
    Saved {
        id: Uuid,
        filename: String,
        file_path: String,
    },
    /// Still on the engine; fetch via its `/view` endpoint.
    Remote {
        filename: String,
        subfolder: String,
        #[serde(rename = "type")]
        kind: String,
    },
}

/// One progress update for a monitored job.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub prompt_id: String,
    pub status: UpdateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<OutputImage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressUpdate {
    /// Initial update for a freshly submitted job.
    pub fn queued(prompt_id: &str) -> Self {
        Self {
            prompt_id: prompt_id.to_string(),
            status: UpdateStatus::Queued,
            current_node: None,
            images: None,
            error: None,
        }
    }
}

/// Submits workflows and hands out monitors for them.
pub struct GenerationService {
    client: ComfyUiClient,
    store: Arc<dyn ImageStore>,
    registry: Arc<JobRegistry>,
    monitor_config: MonitorConfig,
}

impl GenerationService {
    pub fn new(
        client: ComfyUiClient,
        store: Arc<dyn ImageStore>,
        monitor_config: MonitorConfig,
    ) -> Self {
        Self {
            client,
            store,
            registry: Arc::new(JobRegistry::new()),
            monitor_config,
        }
    }

    /// Prepare and submit one generation.
    ///
    /// Pipeline: inject prompt text, wire in the input image when both
    /// halves of the pair are present, apply overrides (seeds are
    /// randomized even with no overrides at all), submit under a fresh
    /// client identity, and register the job. Returns the
    /// engine-assigned prompt ID.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, OrchestratorError> {
        let SubmitRequest {
            mut graph,
            workflow_id,
            workflow_name,
            prompt_node_id,
            prompt,
            overrides,
            image_node_id,
            image_filename,
            user_id,
        } = request;

        graph.set_prompt_text(&prompt_node_id, &prompt);

        if let (Some(node_id), Some(filename)) = (&image_node_id, &image_filename) {
            graph.set_image_filename(node_id, filename);
        }

        let applied = apply_overrides(&mut graph, &overrides);
        if !applied.unmatched.is_empty() {
            tracing::warn!(
                workflow_id,
                unmatched = ?applied.unmatched,
                "Some overrides matched no node input"
            );
        }

        let client_id = ComfyUiClient::fresh_client_id();
        let prompt_id = self.client.submit_workflow(&graph, &client_id).await?;

        self.registry.insert(
            prompt_id.clone(),
            JobRecord {
                client_id,
                applied_params: applied.values,
                submitted_at: Utc::now(),
            },
        );

        tracing::info!(
            prompt_id,
            workflow_id,
            workflow_name,
            user_id,
            "Generation submitted"
        );
        Ok(prompt_id)
    }

    /// Attach a monitor to a submitted job.
    ///
    /// An unregistered prompt ID still gets a monitor, just a degraded
    /// one: without the original client identity the stream misses
    /// node-level events, but history-based completion still works.
    pub fn monitor(&self, prompt_id: &str, request: MonitorRequest) -> GenerationMonitor {
        let record = self.registry.get(prompt_id);
        if record.is_none() {
            tracing::warn!(prompt_id, "Monitoring unregistered job; stream is degraded");
        }
        let (client_id, applied_params) = match record {
            Some(r) => (Some(r.client_id), r.applied_params),
            None => (None, Map::new()),
        };

        let stream = self.client.monitor_progress(
            prompt_id,
            client_id.as_deref(),
            self.monitor_config.clone(),
        );

        GenerationMonitor {
            stream,
            source: Arc::new(self.client.clone()),
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            prompt_id: prompt_id.to_string(),
            request,
            applied_params,
            finished: false,
        }
    }

    /// Stage an input image on the engine. Returns the engine-assigned
    /// filename, which callers must use in [`SubmitRequest`].
    pub async fn upload_input_image(
        &self,
        data: Vec<u8>,
        filename: &str,
    ) -> Result<String, OrchestratorError> {
        Ok(self.client.upload_image(data, filename).await?)
    }
}

/// Adapter from the raw protocol stream to [`ProgressUpdate`]s.
///
/// Yields at most one terminal update (`Completed` or `Error`), then
/// ends. The job registration is evicted on the terminal update, or on
/// drop if the consumer walks away early.
pub struct GenerationMonitor {
    stream: ProgressStream,
    source: Arc<dyn ImageSource>,
    store: Arc<dyn ImageStore>,
    registry: Arc<JobRegistry>,
    prompt_id: String,
    request: MonitorRequest,
    applied_params: Map<String, Value>,
    finished: bool,
}

impl GenerationMonitor {
    /// Next update, or `None` once the sequence has ended.
    pub async fn next_update(&mut self) -> Option<ProgressUpdate> {
        if self.finished {
            return None;
        }

        let Some(event) = self.stream.next().await else {
            // Producer ended without a terminal event; treat as done.
            self.finish();
            return None;
        };

        match event {
            Ok(ProgressEvent::Executing { node }) => Some(ProgressUpdate {
                prompt_id: self.prompt_id.clone(),
                status: UpdateStatus::Processing,
                current_node: Some(node),
                images: None,
                error: None,
            }),
            Ok(ProgressEvent::Executed { images }) => {
                let outputs = self.collect_outputs(images).await;
                self.finish();
                Some(ProgressUpdate {
                    prompt_id: self.prompt_id.clone(),
                    status: UpdateStatus::Completed,
                    current_node: None,
                    images: Some(outputs),
                    error: None,
                })
            }
            Ok(ProgressEvent::Error { message }) => {
                // The stream follows with a terminal Err carrying the
                // same failure; ending here drops it.
                self.finish();
                Some(ProgressUpdate {
                    prompt_id: self.prompt_id.clone(),
                    status: UpdateStatus::Error,
                    current_node: None,
                    images: None,
                    error: Some(message),
                })
            }
            Err(e) => {
                // Connectivity loss or timeout: no Error event
                // preceded this, so surface it as one.
                self.finish();
                Some(ProgressUpdate {
                    prompt_id: self.prompt_id.clone(),
                    status: UpdateStatus::Error,
                    current_node: None,
                    images: None,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.registry.remove(&self.prompt_id);
    }

    /// Turn engine image references into output descriptors.
    ///
    /// With `save_outputs`, each image is downloaded and persisted
    /// best-effort: a failed image is logged and skipped, the rest
    /// still land, and the update stays `Completed` even if every save
    /// failed. Without it, the references pass through untouched.
    async fn collect_outputs(&self, images: Vec<ImageRef>) -> Vec<OutputImage> {
        if !self.request.save_outputs {
            return images
                .into_iter()
                .map(|r| OutputImage::Remote {
                    filename: r.filename,
                    subfolder: r.subfolder,
                    kind: r.kind,
                })
                .collect();
        }

        let mut outputs = Vec::with_capacity(images.len());
        for image in images {
            match self.save_one(&image).await {
                Ok(saved) => outputs.push(saved),
                Err(e) => {
                    tracing::warn!(
                        prompt_id = %self.prompt_id,
                        filename = %image.filename,
                        error = %e,
                        "Failed to save output image; skipping"
                    );
                }
            }
        }
        outputs
    }

    async fn save_one(&self, image: &ImageRef) -> Result<OutputImage, OrchestratorError> {
        let data = self
            .source
            .fetch_image(&image.filename, &image.subfolder)
            .await?;
        let file_size = data.len() as u64;

        let file_path = self
            .store
            .save_image(
                &data,
                &self.request.user_id,
                &self.request.workflow_name,
                &image.filename,
            )
            .await?;

        let meta = ImageMetadata {
            id: Uuid::new_v4(),
            filename: image.filename.clone(),
            workflow_id: self.request.workflow_id.clone(),
            workflow_name: self.request.workflow_name.clone(),
            owner_id: self.request.user_id.clone(),
            prompt: self.request.prompt.clone(),
            prompt_id: self.prompt_id.clone(),
            file_path: file_path.clone(),
            file_size,
            created_at: Utc::now(),
            metadata: Value::Object(self.applied_params.clone()),
        };
        self.store.save_metadata(&meta).await?;

        Ok(OutputImage::Saved {
            id: meta.id,
            filename: image.filename.clone(),
            file_path: file_path.display().to_string(),
        })
    }
}

impl Drop for GenerationMonitor {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(prompt_id = %self.prompt_id, "Monitor dropped early; evicting job");
            self.registry.remove(&self.prompt_id);
        }
    }
}
