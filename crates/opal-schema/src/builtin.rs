//! The built-in permission types every schema carries.
//!
//! `group` holds a title and the user IDs of its members; `allowed-groups`
//! pairs a reading group list with a writing group list. Every persistent
//! object owns a reserved aggregation reference (key
//! [`ALLOWED_GROUPS_FIELD`]) to an `allowed-groups` object; the key cannot
//! be redeclared by user types.

use opal_types::{FieldKey, TypeName, ValueKind};

use crate::descriptor::{FieldDescriptor, TypeDescriptor};

/// Type name of the built-in group type.
pub const GROUP: TypeName = TypeName::new("group");

/// Type name of the built-in allowed-groups type.
pub const ALLOWED_GROUPS: TypeName = TypeName::new("allowed-groups");

/// Reserved key of the allowed-groups reference every object carries.
pub const ALLOWED_GROUPS_FIELD: FieldKey = FieldKey::new("allowed-groups");

/// Title of a group.
pub const GROUP_TITLE: FieldKey = FieldKey::new("title");

/// User IDs of the group's direct members (groups do not nest).
pub const GROUP_MEMBERS: FieldKey = FieldKey::new("members");

/// Groups whose members may read the guarded object.
pub const FOR_READING: FieldKey = FieldKey::new("for-reading");

/// Groups whose members may write the guarded object.
pub const FOR_WRITING: FieldKey = FieldKey::new("for-writing");

/// Descriptor of the built-in group type.
pub fn group_descriptor() -> TypeDescriptor {
    TypeDescriptor::new(GROUP)
        .field(FieldDescriptor::text(GROUP_TITLE))
        .field(FieldDescriptor::element_list(GROUP_MEMBERS, ValueKind::Id))
}

/// Descriptor of the built-in allowed-groups type.
///
/// Both lists are plain aggregations: removing an allowed-groups object
/// never removes the groups it names.
pub fn allowed_groups_descriptor() -> TypeDescriptor {
    TypeDescriptor::new(ALLOWED_GROUPS)
        .field(FieldDescriptor::aggregation_list(FOR_READING, GROUP))
        .field(FieldDescriptor::aggregation_list(FOR_WRITING, GROUP))
}

/// Descriptor of the reserved allowed-groups reference every object
/// carries. Removed last during cascaded removal, and only when nothing
/// else shares the allowed-groups object.
pub fn allowed_groups_field() -> FieldDescriptor {
    FieldDescriptor::aggregation(ALLOWED_GROUPS_FIELD, ALLOWED_GROUPS)
        .removal(opal_types::RemovalBehavior::IfUnreferenced)
}
