//! ComfyUI protocol client.
//!
//! Wraps the ComfyUI HTTP API (workflow submission, history lookup,
//! image transfer) and the per-job WebSocket progress stream behind
//! typed Rust interfaces. One [`client::ComfyUiClient`] serves a
//! single ComfyUI server; each submitted job gets its own client
//! identity so concurrent jobs never observe each other's events.

pub mod api;
pub mod client;
pub mod error;
pub mod messages;
pub mod monitor;

pub use client::ComfyUiClient;
pub use error::{ComfyUiError, EngineDiagnostic};
pub use messages::ImageRef;
pub use monitor::{MonitorConfig, ProgressEvent, ProgressStream};
