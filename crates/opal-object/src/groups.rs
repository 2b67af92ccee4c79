//! Typed accessors for the built-in permission types.
//!
//! A `group` names its member users directly (groups do not nest); an
//! `allowed-groups` object pairs the groups allowed to read with the groups
//! allowed to write. Both allow-lists empty means nobody but an
//! ignore-permissions engine gets through.
//!
//! Group members are user IDs from the identity directory, stored as
//! identity elements; the conversions stay inside this module.

use opal_schema::builtin::{FOR_READING, FOR_WRITING, GROUP_MEMBERS, GROUP_TITLE};
use opal_types::{ObjectId, UserId, Value};

use crate::error::ObjectResult;
use crate::object::PersistentObject;

fn member_value(user: UserId) -> Value {
    Value::Id(ObjectId::from_uuid(*user.as_uuid()))
}

/// The group's title.
pub fn title(group: &PersistentObject) -> ObjectResult<Option<&str>> {
    Ok(group.value(GROUP_TITLE)?.and_then(|v| v.as_text()))
}

/// Set the group's title.
pub fn set_title(group: &mut PersistentObject, title: &str) -> ObjectResult<()> {
    group.set_value(GROUP_TITLE, Some(Value::from(title)))?;
    Ok(())
}

/// The group's direct members.
pub fn members(group: &PersistentObject) -> ObjectResult<Vec<UserId>> {
    Ok(group
        .values(GROUP_MEMBERS)?
        .iter()
        .filter_map(Value::as_id)
        .map(|id| UserId::from_uuid(*id.as_uuid()))
        .collect())
}

/// Add a member. Adding an existing member is a no-op.
pub fn add_member(group: &mut PersistentObject, user: UserId) -> ObjectResult<()> {
    if is_member(group, user)? {
        return Ok(());
    }
    group.add_value(GROUP_MEMBERS, member_value(user))
}

/// Remove a member; returns `true` if the user was one.
pub fn remove_member(group: &mut PersistentObject, user: UserId) -> ObjectResult<bool> {
    group.remove_value(GROUP_MEMBERS, &member_value(user))
}

/// Direct membership test.
pub fn is_member(group: &PersistentObject, user: UserId) -> ObjectResult<bool> {
    Ok(group
        .values(GROUP_MEMBERS)?
        .contains(&member_value(user)))
}

/// The groups allowed to read.
pub fn readers(allowed: &PersistentObject) -> ObjectResult<&[ObjectId]> {
    allowed.references(FOR_READING)
}

/// The groups allowed to write.
pub fn writers(allowed: &PersistentObject) -> ObjectResult<&[ObjectId]> {
    allowed.references(FOR_WRITING)
}

/// Allow a group to read.
pub fn add_reader(allowed: &mut PersistentObject, group: ObjectId) -> ObjectResult<bool> {
    allowed.add_reference(FOR_READING, group)
}

/// Allow a group to write.
pub fn add_writer(allowed: &mut PersistentObject, group: ObjectId) -> ObjectResult<bool> {
    allowed.add_reference(FOR_WRITING, group)
}

/// Both allow-lists empty: universal denial under an enforcing engine.
pub fn denies_everyone(allowed: &PersistentObject) -> ObjectResult<bool> {
    Ok(readers(allowed)?.is_empty() && writers(allowed)?.is_empty())
}

/// An allowed-groups object must guard itself with itself unless the
/// engine's self-reference invariant is disabled.
pub fn is_self_referencing(allowed: &PersistentObject) -> bool {
    allowed.allowed_groups() == Some(allowed.id())
}
