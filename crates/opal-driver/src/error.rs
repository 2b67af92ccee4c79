use thiserror::Error;

use opal_types::ObjectId;

/// Errors produced by storage drivers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The backend has not been initialized yet. The engine recovers from
    /// this exactly once per call: initialize, then retry.
    #[error("driver not initialized")]
    NotInitialized,

    #[error("container {0} does not exist")]
    UnknownContainer(String),

    #[error("container {0} already exists")]
    DuplicateContainer(String),

    #[error("record {id} not found in container {container}")]
    MissingRecord { container: String, id: ObjectId },

    #[error("record {id} already exists in container {container}")]
    DuplicateRecord { container: String, id: ObjectId },

    #[error("a transaction is already active")]
    NestedTransaction,

    #[error("no active transaction")]
    NoTransaction,

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Convenience alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
