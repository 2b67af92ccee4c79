use thiserror::Error;

use crate::value::ValueKind;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("value kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: ValueKind,
        actual: ValueKind,
    },
}
