//! HTTP/WebSocket transport for the generation service.
//!
//! Thin boundary crate: request parsing, API-key auth, and the
//! WebSocket session protocol live here; everything else is delegated
//! to `forge-orchestrator`.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod session;
pub mod state;
