//! Domain logic for ComfyUI workflow graphs.
//!
//! Provides the typed graph view ([`graph::WorkflowGraph`]), heuristic
//! prompt/image node detection ([`detect`]), configurable-parameter
//! discovery ([`params`]), and the parameter override engine
//! ([`overrides`]). Everything here is pure and synchronous; network
//! and persistence concerns live in the `forge-comfyui` and
//! `forge-orchestrator` crates.

pub mod detect;
pub mod error;
pub mod graph;
pub mod overrides;
pub mod params;

pub use error::CoreError;
pub use graph::WorkflowGraph;
