//! Typed error hierarchy for trackr.
//!
//! Two enums cover the two sides of the system:
//! - `TrackerError`: domain failures raised by the board service
//!   (lookups, validation, membership checks)
//! - `DragError`: misuse of the client-side drag reducer

use thiserror::Error;

/// Domain errors from the board service.
///
/// Database code propagates these inside `anyhow::Error`; the API layer
/// downcasts to pick the response status.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Conflict(String),
}

impl TrackerError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Find a `TrackerError` anywhere in an `anyhow` chain.
    pub fn find(err: &anyhow::Error) -> Option<&TrackerError> {
        err.chain().find_map(|cause| cause.downcast_ref::<TrackerError>())
    }
}

/// Errors from the optimistic drag reducer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DragError {
    #[error("Item {0} is not on the board")]
    UnknownItem(String),

    #[error("No drag gesture in progress")]
    NotDragging,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = TrackerError::not_found("Application", "abc");
        assert_eq!(err.to_string(), "Application abc not found");
    }

    #[test]
    fn find_recovers_error_through_context() {
        let result: anyhow::Result<()> =
            Err(TrackerError::validation("stageId is invalid").into());
        let err = result.context("Failed to move application").unwrap_err();
        assert_eq!(
            TrackerError::find(&err),
            Some(&TrackerError::Validation("stageId is invalid".into()))
        );
    }

    #[test]
    fn find_returns_none_for_foreign_errors() {
        let err = anyhow::anyhow!("disk on fire");
        assert!(TrackerError::find(&err).is_none());
    }
}
