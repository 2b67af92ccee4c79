//! The permission model: group-based read and write protection.
//!
//! Every persisted object carries a reserved reference to an
//! allowed-groups object pairing reader groups with writer groups. An
//! enforcing engine checks the current user's membership before exposing
//! or altering a row; an ignoring engine skips all of it. Denial is never
//! an error: protected rows read as absent and writes on them do nothing.
//!
//! An allowed-groups value of `None` on a persisted object is maximally
//! protective. New objects are never protected; they exist only in the
//! hands of their creator.

use opal_driver::ObjectRecord;
use opal_object::{groups, FieldPayload, SharedObject};
use opal_schema::builtin;
use opal_types::{FieldKey, ObjectId, UserId, Value};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

impl Engine {
    /// Whether the current user may not read this object.
    pub fn is_read_protected(&self, object: &SharedObject) -> EngineResult<bool> {
        self.is_protected(object, builtin::FOR_READING)
    }

    /// Whether the current user may not write this object.
    pub fn is_write_protected(&self, object: &SharedObject) -> EngineResult<bool> {
        self.is_protected(object, builtin::FOR_WRITING)
    }

    fn is_protected(&self, object: &SharedObject, list: FieldKey) -> EngineResult<bool> {
        if !self.security().applies() {
            return Ok(false);
        }
        let (is_new, allowed) = {
            let borrowed = object.borrow();
            (borrowed.is_new(), borrowed.allowed_groups())
        };
        if is_new {
            return Ok(false);
        }
        let Some(allowed) = allowed else {
            return Ok(true);
        };
        let user = self.directory().current_user();
        let group_ids = self.allowed_group_list(allowed, list)?;
        Ok(!self.user_in_groups(&group_ids, user)?)
    }

    /// Record-level read protection, for filtering query results before
    /// they are materialized.
    pub(crate) fn record_read_protected(&self, record: &ObjectRecord) -> EngineResult<bool> {
        if !self.security().applies() {
            return Ok(false);
        }
        let Some(allowed) = record.allowed_groups() else {
            return Ok(true);
        };
        let user = self.directory().current_user();
        let group_ids = self.allowed_group_list(allowed, builtin::FOR_READING)?;
        Ok(!self.user_in_groups(&group_ids, user)?)
    }

    /// The group list (`for-reading` or `for-writing`) of an
    /// allowed-groups object, by cache or by stored row. A missing
    /// allowed-groups object denies everyone.
    fn allowed_group_list(
        &self,
        allowed: ObjectId,
        list: FieldKey,
    ) -> EngineResult<Vec<ObjectId>> {
        if let Some(object) = self.lookup(allowed) {
            let borrowed = object.borrow();
            return Ok(borrowed.references(list)?.to_vec());
        }
        let container = self.internal_name(builtin::ALLOWED_GROUPS)?;
        let Some(record) = self.with_driver(|d| d.fetch(&container, allowed))? else {
            return Ok(Vec::new());
        };
        Ok(match record.fields.get(&list) {
            Some(FieldPayload::ReferenceList(ids)) => ids.clone(),
            _ => Vec::new(),
        })
    }

    /// Whether `user` is a direct member of any of the given groups.
    pub(crate) fn user_in_groups(
        &self,
        group_ids: &[ObjectId],
        user: UserId,
    ) -> EngineResult<bool> {
        for group_id in group_ids {
            if let Some(group) = self.lookup(*group_id) {
                if groups::is_member(&group.borrow(), user)? {
                    return Ok(true);
                }
                continue;
            }
            let container = self.internal_name(builtin::GROUP)?;
            let Some(record) = self.with_driver(|d| d.fetch(&container, *group_id))? else {
                continue;
            };
            let member = Value::Id(ObjectId::from_uuid(*user.as_uuid()));
            if let Some(FieldPayload::ElementList(members)) =
                record.fields.get(&builtin::GROUP_MEMBERS)
            {
                if members.contains(&member) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Assert the self-reference invariant on an allowed-groups object:
    /// it must be guarded by itself, or permission checks on it would
    /// chase a second permission object.
    pub(crate) fn check_self_reference(&self, object: &SharedObject) -> EngineResult<()> {
        if !self.config().enforce_self_reference {
            return Ok(());
        }
        let borrowed = object.borrow();
        if borrowed.type_name() != builtin::ALLOWED_GROUPS {
            return Ok(());
        }
        if !groups::is_self_referencing(&borrowed) {
            return Err(EngineError::GroupsNotSelfReferencing { id: borrowed.id() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testutil::{self, DOCUMENT};
    use opal_types::SecurityModel;

    #[test]
    fn new_objects_are_never_protected() {
        let engine = testutil::open(SecurityModel::ApplyPermissions);
        let doc = engine.create_instance(DOCUMENT).unwrap();
        assert!(!engine.is_read_protected(&doc).unwrap());
        assert!(!engine.is_write_protected(&doc).unwrap());
    }

    #[test]
    fn ignoring_engines_see_everything() {
        let engine = testutil::open_elevated();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();
        assert!(!engine.is_read_protected(&doc).unwrap());
    }

    #[test]
    fn null_allowed_groups_is_maximally_protective() {
        let (engine, driver) = testutil::open_elevated_with_driver();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();
        let id = doc.borrow().id();

        let user = UserId::new();
        let enforcing =
            testutil::open_on_as(driver, SecurityModel::ApplyPermissions, user);
        assert!(enforcing.get(DOCUMENT, id).unwrap().is_none());
    }

    #[test]
    fn membership_grants_access() {
        let user = UserId::new();
        let engine = testutil::open_as(SecurityModel::ApplyPermissions, user);
        let allowed = testutil::grant(&engine, user);

        let doc = engine.create_instance(DOCUMENT).unwrap();
        doc.borrow_mut().set_allowed_groups(Some(allowed)).unwrap();
        engine.add(&doc).unwrap();

        assert!(!engine.is_read_protected(&doc).unwrap());
        assert!(!engine.is_write_protected(&doc).unwrap());
        let id = doc.borrow().id();
        assert!(engine.get(DOCUMENT, id).unwrap().is_some());
    }

    #[test]
    fn non_members_are_denied() {
        let member = UserId::new();
        let engine = testutil::open_as(SecurityModel::ApplyPermissions, member);
        let allowed = testutil::grant(&engine, member);

        let doc = engine.create_instance(DOCUMENT).unwrap();
        doc.borrow_mut().set_allowed_groups(Some(allowed)).unwrap();
        engine.add(&doc).unwrap();
        let id = doc.borrow().id();

        let outsider = testutil::open_on_as(
            testutil::driver_of(&engine),
            SecurityModel::ApplyPermissions,
            UserId::new(),
        );
        assert!(outsider.get(DOCUMENT, id).unwrap().is_none());
    }

    #[test]
    fn self_reference_invariant_is_enforced() {
        let engine = testutil::open_elevated();
        let allowed = engine.create_instance(builtin::ALLOWED_GROUPS).unwrap();
        let err = engine.add(&allowed).unwrap_err();
        assert!(matches!(err, EngineError::GroupsNotSelfReferencing { .. }));

        let own_id = allowed.borrow().id();
        allowed
            .borrow_mut()
            .set_allowed_groups(Some(own_id))
            .unwrap();
        engine.add(&allowed).unwrap();
    }
}
