//! Board service: the HTTP/WebSocket back-end for job application pipelines.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ (client) │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ access::application_for() etc.         │
//!                       │         v                                        │
//!                       │  db.rs  (TrackerDb, DbHandle)                    │
//!                       │         │                                        │
//!                       │         │ positions::move_item() / reorder_group()│
//!                       │         v                                        │
//!                       │  positions.rs  (position reconciler)             │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `models`    | Row and wire types: `Application`, `Stage`, `BoardView` |
//! | `access`    | Workspace membership and role checks                    |
//! | `ws`        | `BoardEvent` enum + `broadcast_event()` helper          |
//!
//! ## Typical Request Flow (drag a card to another stage)
//!
//! 1. `PATCH /api/applications/{id}/move` → `api::move_application()`
//! 2. `access::application_for()` confirms the caller belongs to the
//!    application's workspace.
//! 3. `TrackerDb::move_application()` opens a transaction, checks the target
//!    stage is in the same pipeline, and hands the row to
//!    `positions::move_item()`, which closes the gap in the source stage and
//!    opens one in the target stage.
//! 4. A cross-stage move appends a `STAGE_MOVED` activity in the same
//!    transaction.
//! 5. The handler broadcasts `BoardEvent::ApplicationMoved`; other boards
//!    refetch.

pub mod access;
pub mod api;
pub mod db;
pub mod models;
pub mod positions;
pub mod server;
pub mod ws;
