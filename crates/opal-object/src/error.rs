use thiserror::Error;

use opal_schema::SchemaError;
use opal_types::{FieldKey, TypeError, TypeName};

/// Errors produced by object and field operations.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("type {type_name} has no field {key}")]
    UnknownField { type_name: TypeName, key: FieldKey },

    #[error("field {key} of {type_name} is not an element field")]
    NotElement { type_name: TypeName, key: FieldKey },

    #[error("field {key} of {type_name} is not a reference field")]
    NotReference { type_name: TypeName, key: FieldKey },

    #[error("field {key} of {type_name} is not a collection")]
    NotCollection { type_name: TypeName, key: FieldKey },

    #[error("field {key} of {type_name} is a collection")]
    NotSingleValued { type_name: TypeName, key: FieldKey },

    #[error("field {key} of {type_name}: {source}")]
    Kind {
        type_name: TypeName,
        key: FieldKey,
        #[source]
        source: TypeError,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Convenience alias for object operations.
pub type ObjectResult<T> = Result<T, ObjectError>;
