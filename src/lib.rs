//! trackr: a multi-tenant job application tracker.
//!
//! - [`board`] is the server: SQLite storage, the position reconciler and
//!   the axum REST/WebSocket surface.
//! - [`drag`] is the client-side optimistic ordering for board views.
//! - [`client`] is the HTTP client the drag session talks through.

pub mod board;
pub mod client;
pub mod config;
pub mod drag;
pub mod errors;
