use thiserror::Error;

use opal_driver::{BrokenReference, DriverError};
use opal_object::ObjectError;
use opal_schema::SchemaError;
use opal_types::{ObjectId, SecurityModel, TypeName};

/// Errors produced by the persistence engine.
///
/// Permission denial is not an error: protected objects are simply
/// invisible (reads) or left untouched (writes) through an enforcing
/// engine. The variants here are integrity and configuration failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A write finished but still references objects that were never
    /// persisted. The engine has rescinded its own inserts; the caller's
    /// transaction is expected to roll back the rest.
    #[error(
        "{count} unresolved reference(s) after write; first: {} {} -> missing {}",
        .first.owner_type, .first.owner.short_id(), .first.target.short_id()
    )]
    BrokenReferences {
        count: usize,
        first: BrokenReference,
    },

    /// An object attached under one security model was handed to a
    /// cascade running under the other.
    #[error(
        "{type_name} {} was attached under {actual} and cannot be cascaded \
         through an engine applying {expected}",
        .id.short_id()
    )]
    MixedSecurityModels {
        type_name: TypeName,
        id: ObjectId,
        expected: SecurityModel,
        actual: SecurityModel,
    },

    /// An allowed-groups object must be guarded by itself.
    #[error("allowed-groups object {} does not reference itself", .id.short_id())]
    GroupsNotSelfReferencing { id: ObjectId },

    /// The operation needs a persisted object but got a new or vanished one.
    #[error("{type_name} {} is not persistent", .id.short_id())]
    NotPersistent { type_name: TypeName, id: ObjectId },

    /// Versioning was requested on an engine configured without a
    /// versioning driver.
    #[error("versioning is not enabled on this engine")]
    VersioningDisabled,

    /// A full-text filter reached an engine with full text disabled.
    #[error("full-text search is disabled on this engine")]
    FullTextDisabled,

    /// An object of the wrong type was handed to a container.
    #[error(
        "{type_name} {} does not belong in the {container} container",
        .id.short_id()
    )]
    WrongContainer {
        container: TypeName,
        type_name: TypeName,
        id: ObjectId,
    },

    /// Container migration deferred some types and then stopped making
    /// progress; the first stuck type and its driver error.
    #[error("container migration stalled on {type_name}: {source}")]
    MigrationStalled {
        type_name: TypeName,
        #[source]
        source: DriverError,
    },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

pub type EngineResult<T> = Result<T, EngineError>;
