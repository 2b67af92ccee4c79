use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::ObjectId;
use crate::temporal::Timestamp;

/// The base type of an element field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Text,
    Integer,
    Float,
    Boolean,
    Bytes,
    Timestamp,
    Id,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Bytes => "bytes",
            Self::Timestamp => "timestamp",
            Self::Id => "id",
        };
        write!(f, "{name}")
    }
}

/// A typed element payload.
///
/// Element fields and element collections carry `Value`s. Reference fields
/// carry [`ObjectId`]s of other persistent objects and never appear here;
/// `Value::Id` is for element fields that merely name an identity (a user
/// ID in a group member list, for example) without creating an edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    Timestamp(Timestamp),
    Id(ObjectId),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Text(_) => ValueKind::Text,
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Timestamp(_) => ValueKind::Timestamp,
            Self::Id(_) => ValueKind::Id,
        }
    }

    /// Error unless this value carries the expected kind.
    pub fn expect_kind(&self, expected: ValueKind) -> Result<(), TypeError> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(TypeError::KindMismatch {
                expected,
                actual: self.kind(),
            })
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<ObjectId> {
        match self {
            Self::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// Numeric view used by the average and sum aggregates.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compare two values of the same kind.
    ///
    /// `None` when the kinds differ or a float comparison is undefined.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Id(a), Self::Id(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Timestamp(t) => write!(f, "{t}"),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<Timestamp> for Value {
    fn from(t: Timestamp) -> Self {
        Self::Timestamp(t)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Self::Id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(Value::from("x").kind(), ValueKind::Text);
        assert_eq!(Value::from(1i64).kind(), ValueKind::Integer);
        assert_eq!(Value::from(1.5f64).kind(), ValueKind::Float);
        assert_eq!(Value::from(true).kind(), ValueKind::Boolean);
        assert_eq!(Value::from(vec![1u8, 2]).kind(), ValueKind::Bytes);
        assert_eq!(Value::from(Timestamp::zero()).kind(), ValueKind::Timestamp);
        assert_eq!(Value::from(ObjectId::nil()).kind(), ValueKind::Id);
    }

    #[test]
    fn expect_kind_accepts_matching() {
        assert!(Value::from("x").expect_kind(ValueKind::Text).is_ok());
    }

    #[test]
    fn expect_kind_rejects_mismatch() {
        let err = Value::from(42i64).expect_kind(ValueKind::Text).unwrap_err();
        assert_eq!(
            err,
            TypeError::KindMismatch {
                expected: ValueKind::Text,
                actual: ValueKind::Integer,
            }
        );
    }

    #[test]
    fn compare_same_kind() {
        assert_eq!(
            Value::from("a").compare(&Value::from("b")),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::from(2i64).compare(&Value::from(2i64)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            Value::from(3.5).compare(&Value::from(1.0)),
            Some(Ordering::Greater)
        );
    }

    #[test]
    fn compare_cross_kind_is_none() {
        assert_eq!(Value::from("1").compare(&Value::from(1i64)), None);
    }

    #[test]
    fn compare_nan_is_none() {
        assert_eq!(Value::from(f64::NAN).compare(&Value::from(1.0)), None);
    }

    #[test]
    fn numeric_view() {
        assert_eq!(Value::from(2i64).as_numeric(), Some(2.0));
        assert_eq!(Value::from(2.5).as_numeric(), Some(2.5));
        assert_eq!(Value::from("2").as_numeric(), None);
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from("hi").as_text(), Some("hi"));
        assert_eq!(Value::from(7i64).as_integer(), Some(7));
        assert_eq!(Value::from(true).as_boolean(), Some(true));
        assert_eq!(Value::from(7i64).as_text(), None);
    }

    #[test]
    fn serde_roundtrip() {
        let values = vec![
            Value::from("text"),
            Value::from(-3i64),
            Value::from(true),
            Value::from(vec![0u8, 255]),
            Value::from(Timestamp::new(10, 2)),
            Value::from(ObjectId::new()),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let parsed: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value, parsed);
        }
    }
}
