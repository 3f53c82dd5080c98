use forge_comfyui::ComfyUiError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The protocol client failed (connectivity, submission
    /// rejection, execution failure).
    #[error(transparent)]
    Engine(#[from] ComfyUiError),

    /// The persistence collaborator failed.
    #[error(transparent)]
    Storage(#[from] crate::storage::StorageError),
}
