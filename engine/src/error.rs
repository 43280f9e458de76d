//! Error types for the tasksync engine.

use crate::{ClientId, ServerId};
use thiserror::Error;

/// All possible errors from the tasksync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Identity errors
    #[error(
        "mapping violation: client id '{client_id}' already maps to '{existing}', refusing '{attempted}'"
    )]
    MappingViolation {
        client_id: ClientId,
        existing: ServerId,
        attempted: ServerId,
    },

    // Log errors
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::MissingRequiredField("title".into());
        assert_eq!(err.to_string(), "missing required field: title");

        let err = Error::MappingViolation {
            client_id: "c-1".into(),
            existing: "srv-1".into(),
            attempted: "srv-2".into(),
        };
        assert_eq!(
            err.to_string(),
            "mapping violation: client id 'c-1' already maps to 'srv-1', refusing 'srv-2'"
        );

        let err = Error::TypeMismatch {
            field: "title".into(),
            expected: "String".into(),
            got: "Int".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'title': expected String, got Int"
        );
    }
}
