use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Unique identifier for a persistent object (UUID v7 for time-ordering).
///
/// An `ObjectId` is assigned when the object is constructed and never
/// changes afterwards. IDs of removed objects are recorded as permanently
/// deleted and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(uuid::Uuid);

impl ObjectId {
    /// Generate a new time-ordered object ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The nil object ID (all zeros). Represents "no object".
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Returns `true` if this is the nil object ID.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Parse from the canonical hyphenated form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidId(e.to_string()))
    }

    /// Short representation (first 8 characters of the UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short_id())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a user as resolved by the identity directory.
///
/// The anonymous user (nil UUID) is used when no caller identity is known;
/// it is a member of no group and therefore passes no permission check.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(uuid::Uuid);

impl UserId {
    /// Generate a fresh user ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The anonymous user (nil UUID).
    pub const fn anonymous() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Returns `true` if this is the anonymous user.
    pub fn is_anonymous(&self) -> bool {
        self.0.is_nil()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "UserId(anonymous)")
        } else {
            write!(f, "UserId({})", &self.0.to_string()[..8])
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one engine instance, recorded on objects as provenance.
///
/// Two engine instances never share an `EngineId`, so an object can always
/// tell whether it is being cascaded through the instance that attached it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineId(uuid::Uuid);

impl EngineId {
    /// Generate a fresh engine ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for EngineId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineId({})", &self.0.to_string()[..8])
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_ids_are_unique() {
        let id1 = ObjectId::new();
        let id2 = ObjectId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn nil_is_nil() {
        let nil = ObjectId::nil();
        assert!(nil.is_nil());
        assert!(!ObjectId::new().is_nil());
    }

    #[test]
    fn parse_roundtrip() {
        let id = ObjectId::new();
        let parsed = ObjectId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(ObjectId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn short_id_is_8_chars() {
        assert_eq!(ObjectId::new().short_id().len(), 8);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ObjectId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ObjectId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn anonymous_user_is_nil() {
        assert!(UserId::anonymous().is_anonymous());
        assert!(!UserId::new().is_anonymous());
        assert_eq!(UserId::default(), UserId::anonymous());
    }

    #[test]
    fn engine_ids_are_unique() {
        assert_ne!(EngineId::new(), EngineId::new());
    }
}
