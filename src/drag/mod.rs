//! Optimistic drag-and-drop ordering for board clients.
//!
//! `DragReducer` mirrors the server's dense ordering rule locally so a card
//! moves the moment it is dragged. `BoardSession` sends the resulting move
//! through a `BoardApi` and either rolls back or refetches.

pub mod reducer;
pub mod session;

pub use reducer::{DragReducer, DropTarget, MoveIntent, OrderedItem, project};
pub use session::{BoardSession, DropOutcome};
