use thiserror::Error;

use opal_types::{FieldKey, TypeName};

/// Errors produced while building or querying a schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("type {0} is already registered")]
    DuplicateType(TypeName),

    #[error("type {type_name} declares field {key} more than once")]
    DuplicateField { type_name: TypeName, key: FieldKey },

    #[error("type {type_name} uses reserved field key {key}")]
    ReservedField { type_name: TypeName, key: FieldKey },

    #[error("unknown type {0}")]
    UnknownType(TypeName),

    #[error("type {0} is abstract and cannot be instantiated")]
    AbstractInstantiation(TypeName),

    #[error("type {type_name} has no field {key}")]
    UnknownField { type_name: TypeName, key: FieldKey },

    #[error("type {child} names unregistered parent {parent}")]
    MissingParent { child: TypeName, parent: TypeName },

    #[error("parent chain of type {0} contains a cycle")]
    ParentCycle(TypeName),

    #[error("field {key} of {type_name} references unregistered type {target}")]
    MissingTarget {
        type_name: TypeName,
        key: FieldKey,
        target: TypeName,
    },

    #[error("field {key} of {type_name} cannot be full-text indexed: only text elements are")]
    NotIndexable { type_name: TypeName, key: FieldKey },
}

/// Convenience alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
