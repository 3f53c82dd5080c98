//! Generation orchestration.
//!
//! Composes the graph-mutation logic from `forge-core` with the
//! `forge-comfyui` protocol client: submits mutated workflows,
//! correlates engine-assigned job IDs back to their stream identity
//! and applied parameters ([`registry::JobRegistry`]), and adapts the
//! raw progress stream into client-facing updates with a
//! save-and-finalize step on success ([`generation`]).

pub mod error;
pub mod generation;
pub mod registry;
pub mod storage;

pub use error::OrchestratorError;
pub use generation::{
    GenerationMonitor, GenerationService, MonitorRequest, OutputImage, ProgressUpdate,
    SubmitRequest, UpdateStatus,
};
pub use registry::{JobRecord, JobRegistry};
pub use storage::{FsImageStore, ImageMetadata, ImageSource, ImageStore, StorageError};
