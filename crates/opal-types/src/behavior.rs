use std::fmt;

use serde::{Deserialize, Serialize};

/// How a reference field binds the referenced object to its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Owning edge: the referenced object belongs to exactly this owner.
    Composition,
    /// Shared edge: the referenced object may be referenced from anywhere.
    Aggregation,
}

impl EdgeKind {
    pub fn is_composition(&self) -> bool {
        matches!(self, Self::Composition)
    }
}

/// What cascaded removal does to a referenced object once its referrer
/// goes away.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovalBehavior {
    /// Leave the referenced object alone.
    #[default]
    Keep,
    /// Remove the referenced object unless something else still references it.
    IfUnreferenced,
    /// Remove the referenced object unconditionally.
    Forced,
}

/// What the next update does to the object itself.
///
/// Takes precedence over a normal field-level update: an object marked for
/// removal is removed instead of persisted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoveOnUpdate {
    #[default]
    Keep,
    Remove,
    RemoveCascadedly,
}

/// Whether an engine enforces the permission model or bypasses it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityModel {
    #[default]
    ApplyPermissions,
    IgnorePermissions,
}

impl SecurityModel {
    /// Returns `true` if permission checks are enforced.
    pub fn applies(&self) -> bool {
        matches!(self, Self::ApplyPermissions)
    }
}

impl fmt::Display for SecurityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplyPermissions => write!(f, "apply-permissions"),
            Self::IgnorePermissions => write!(f, "ignore-permissions"),
        }
    }
}
