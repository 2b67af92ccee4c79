//! The persistent object: identity, lifecycle, and change-tracked fields.
//!
//! Objects never hold a reference back to the engine that manages them.
//! Lazy retrieval, permission checks, and persistence are engine calls;
//! the object only records state. Within one engine, objects are shared
//! as [`SharedObject`] handles (`Rc<RefCell<_>>`), which makes a whole
//! engine single-owner-per-thread on purpose.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use opal_schema::{builtin, SchemaError, SchemaRegistry};
use opal_types::{
    AuditStamp, EngineId, FieldKey, FieldPath, ObjectId, RemoveOnUpdate, SecurityModel,
    Timestamp, TypeName, Value,
};

use crate::error::{ObjectError, ObjectResult};
use crate::field::{Field, FieldPayload};

/// Shared handle to a persistent object within one engine.
pub type SharedObject = Rc<RefCell<PersistentObject>>;

/// A change listener: called synchronously with the path of the field that
/// changed. The callback must not re-enter the object it observes.
pub type SharedListener = Rc<RefCell<dyn FnMut(&FieldPath)>>;

/// Where an object was attached: which engine instance, under which
/// security model. `None` means the object was never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Origin {
    pub engine: EngineId,
    pub security: SecurityModel,
}

/// A typed, change-tracked, persistable object.
pub struct PersistentObject {
    id: ObjectId,
    type_name: TypeName,
    created: Option<AuditStamp>,
    modified: Option<AuditStamp>,
    removed: bool,
    remove_on_update: RemoveOnUpdate,
    expires_at: Option<Timestamp>,
    origin: Option<Origin>,
    fields: Vec<Field>,
    listener: Option<(Option<FieldPath>, SharedListener)>,
    notifications_enabled: bool,
    auto_retrieve: bool,
}

impl PersistentObject {
    /// Create a fresh, never-persisted object of a registered concrete
    /// type. Field order: the reserved allowed-groups reference first,
    /// then the registered fields, ancestors' before own.
    pub fn new(registry: &SchemaRegistry, type_name: TypeName) -> ObjectResult<Self> {
        Self::with_id(registry, type_name, ObjectId::new())
    }

    /// Like [`new`](Self::new), with a caller-provided identity. Used when
    /// rebuilding an object the driver already knows.
    pub fn with_id(
        registry: &SchemaRegistry,
        type_name: TypeName,
        id: ObjectId,
    ) -> ObjectResult<Self> {
        let descriptor = registry.get(type_name)?;
        if descriptor.is_abstract() {
            return Err(SchemaError::AbstractInstantiation(type_name).into());
        }

        let mut fields = Vec::new();
        fields.push(Field::from_descriptor(&builtin::allowed_groups_field()));
        for field_descriptor in registry.effective_fields(type_name)? {
            fields.push(Field::from_descriptor(field_descriptor));
        }

        Ok(Self {
            id,
            type_name,
            created: None,
            modified: None,
            removed: false,
            remove_on_update: RemoveOnUpdate::Keep,
            expires_at: None,
            origin: None,
            fields,
            listener: None,
            notifications_enabled: true,
            auto_retrieve: true,
        })
    }

    // ---------------------------------------------------------------
    // Identity and lifecycle
    // ---------------------------------------------------------------

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn type_name(&self) -> TypeName {
        self.type_name
    }

    pub fn created(&self) -> Option<AuditStamp> {
        self.created
    }

    pub fn modified(&self) -> Option<AuditStamp> {
        self.modified
    }

    /// Never persisted anywhere.
    pub fn is_new(&self) -> bool {
        self.origin.is_none()
    }

    /// Terminally removed; the ID will never be reused.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn origin(&self) -> Option<Origin> {
        self.origin
    }

    pub fn remove_on_update(&self) -> RemoveOnUpdate {
        self.remove_on_update
    }

    /// Mark the object for removal the next time it is updated.
    pub fn set_remove_on_update(&mut self, mode: RemoveOnUpdate) {
        self.remove_on_update = mode;
    }

    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// Mark the object as temporary: expired objects are swept by the
    /// engine's cleanup pass. `None` makes it permanent again.
    pub fn keep_until(&mut self, expires_at: Option<Timestamp>) {
        self.expires_at = expires_at;
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expires_at.map(|t| now.is_after(&t)).unwrap_or(false)
    }

    /// Record the first successful persist: provenance, both audit stamps,
    /// and a clean slate of change bits.
    pub fn attach(&mut self, origin: Origin, stamp: AuditStamp) {
        debug!(id = %self.id.short_id(), type_name = %self.type_name, "attached");
        self.origin = Some(origin);
        self.created = Some(stamp);
        self.modified = Some(stamp);
        self.clear_changes();
    }

    /// Record a successful update: bump the modification stamp and reset
    /// every change bit.
    pub fn mark_updated(&mut self, stamp: AuditStamp) {
        self.modified = Some(stamp);
        self.remove_on_update = RemoveOnUpdate::Keep;
        self.clear_changes();
    }

    /// Record terminal removal.
    pub fn mark_removed(&mut self) {
        debug!(id = %self.id.short_id(), type_name = %self.type_name, "removed");
        self.removed = true;
    }

    /// Overwrite provenance (hydration and synchronization only).
    pub fn set_origin(&mut self, origin: Option<Origin>) {
        self.origin = origin;
    }

    /// Overwrite the creation stamp (hydration and synchronization only).
    pub fn set_created(&mut self, stamp: Option<AuditStamp>) {
        self.created = stamp;
    }

    /// Overwrite the modification stamp (hydration and synchronization only).
    pub fn set_modified(&mut self, stamp: Option<AuditStamp>) {
        self.modified = stamp;
    }

    // ---------------------------------------------------------------
    // Field access
    // ---------------------------------------------------------------

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// The reference fields, reserved allowed-groups field included.
    pub fn reference_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    pub fn field(&self, key: FieldKey) -> ObjectResult<&Field> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .ok_or(ObjectError::UnknownField {
                type_name: self.type_name,
                key,
            })
    }

    fn field_mut(&mut self, key: FieldKey) -> ObjectResult<&mut Field> {
        let type_name = self.type_name;
        self.fields
            .iter_mut()
            .find(|f| f.key == key)
            .ok_or(ObjectError::UnknownField { type_name, key })
    }

    /// The single element value of `key`.
    pub fn value(&self, key: FieldKey) -> ObjectResult<Option<&Value>> {
        let field = self.field(key)?;
        match &field.payload {
            FieldPayload::Element(v) => Ok(v.as_ref()),
            FieldPayload::ElementList(_) => Err(self.not_single_valued(key)),
            _ => Err(self.not_element(key)),
        }
    }

    /// The element collection of `key`.
    pub fn values(&self, key: FieldKey) -> ObjectResult<&[Value]> {
        let field = self.field(key)?;
        match &field.payload {
            FieldPayload::ElementList(v) => Ok(v),
            FieldPayload::Element(_) => Err(self.not_collection(key)),
            _ => Err(self.not_element(key)),
        }
    }

    /// The single reference of `key`.
    pub fn reference(&self, key: FieldKey) -> ObjectResult<Option<ObjectId>> {
        let field = self.field(key)?;
        match &field.payload {
            FieldPayload::Reference(r) => Ok(*r),
            FieldPayload::ReferenceList(_) => Err(self.not_single_valued(key)),
            _ => Err(self.not_reference(key)),
        }
    }

    /// The reference collection of `key`.
    pub fn references(&self, key: FieldKey) -> ObjectResult<&[ObjectId]> {
        let field = self.field(key)?;
        match &field.payload {
            FieldPayload::ReferenceList(r) => Ok(r),
            FieldPayload::Reference(_) => Err(self.not_collection(key)),
            _ => Err(self.not_reference(key)),
        }
    }

    /// The object's allowed-groups reference (reserved field).
    pub fn allowed_groups(&self) -> Option<ObjectId> {
        self.reference(builtin::ALLOWED_GROUPS_FIELD).unwrap_or(None)
    }

    /// Assign the allowed-groups reference.
    pub fn set_allowed_groups(&mut self, groups: Option<ObjectId>) -> ObjectResult<bool> {
        self.set_reference(builtin::ALLOWED_GROUPS_FIELD, groups)
    }

    // ---------------------------------------------------------------
    // Mutation (validated; marks `changed` and notifies on a real change)
    // ---------------------------------------------------------------

    /// Set the single element value of `key`. Setting an equal value is a
    /// no-op; returns `true` if the payload actually changed.
    pub fn set_value(&mut self, key: FieldKey, value: Option<Value>) -> ObjectResult<bool> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        let Some(kind) = field.element_kind else {
            return Err(ObjectError::NotElement { type_name, key });
        };
        match &mut field.payload {
            FieldPayload::Element(slot) => {
                if let Some(v) = &value {
                    v.expect_kind(kind)
                        .map_err(|source| ObjectError::Kind {
                            type_name,
                            key,
                            source,
                        })?;
                }
                if *slot == value {
                    return Ok(false);
                }
                *slot = value;
                field.changed = true;
                field.retrieved = true;
            }
            FieldPayload::ElementList(_) => {
                return Err(ObjectError::NotSingleValued { type_name, key })
            }
            _ => return Err(ObjectError::NotElement { type_name, key }),
        }
        self.notify(key);
        Ok(true)
    }

    /// Append to the element collection of `key`.
    pub fn add_value(&mut self, key: FieldKey, value: Value) -> ObjectResult<()> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        let Some(kind) = field.element_kind else {
            return Err(ObjectError::NotElement { type_name, key });
        };
        match &mut field.payload {
            FieldPayload::ElementList(list) => {
                value
                    .expect_kind(kind)
                    .map_err(|source| ObjectError::Kind {
                        type_name,
                        key,
                        source,
                    })?;
                list.push(value);
                field.changed = true;
                field.retrieved = true;
            }
            FieldPayload::Element(_) => {
                return Err(ObjectError::NotCollection { type_name, key })
            }
            _ => return Err(ObjectError::NotElement { type_name, key }),
        }
        self.notify(key);
        Ok(())
    }

    /// Remove the first occurrence of `value` from the element collection.
    pub fn remove_value(&mut self, key: FieldKey, value: &Value) -> ObjectResult<bool> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        let removed = match &mut field.payload {
            FieldPayload::ElementList(list) => {
                if let Some(position) = list.iter().position(|v| v == value) {
                    list.remove(position);
                    field.changed = true;
                    true
                } else {
                    false
                }
            }
            FieldPayload::Element(_) => {
                return Err(ObjectError::NotCollection { type_name, key })
            }
            _ => return Err(ObjectError::NotElement { type_name, key }),
        };
        if removed {
            self.notify(key);
        }
        Ok(removed)
    }

    /// Empty the element collection of `key`.
    pub fn clear_values(&mut self, key: FieldKey) -> ObjectResult<bool> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        let cleared = match &mut field.payload {
            FieldPayload::ElementList(list) => {
                if list.is_empty() {
                    false
                } else {
                    list.clear();
                    field.changed = true;
                    true
                }
            }
            FieldPayload::Element(_) => {
                return Err(ObjectError::NotCollection { type_name, key })
            }
            _ => return Err(ObjectError::NotElement { type_name, key }),
        };
        if cleared {
            self.notify(key);
        }
        Ok(cleared)
    }

    /// Set the single reference of `key`. Setting an equal reference is a
    /// no-op; returns `true` if the payload actually changed.
    pub fn set_reference(&mut self, key: FieldKey, id: Option<ObjectId>) -> ObjectResult<bool> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        match &mut field.payload {
            FieldPayload::Reference(slot) => {
                if *slot == id {
                    return Ok(false);
                }
                *slot = id;
                field.changed = true;
                field.retrieved = true;
            }
            FieldPayload::ReferenceList(_) => {
                return Err(ObjectError::NotSingleValued { type_name, key })
            }
            _ => return Err(ObjectError::NotReference { type_name, key }),
        }
        self.notify(key);
        Ok(true)
    }

    /// Add to the reference collection of `key`. Duplicates are ignored;
    /// returns `true` if the reference was actually added.
    pub fn add_reference(&mut self, key: FieldKey, id: ObjectId) -> ObjectResult<bool> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        let added = match &mut field.payload {
            FieldPayload::ReferenceList(list) => {
                if list.contains(&id) {
                    false
                } else {
                    list.push(id);
                    field.changed = true;
                    field.retrieved = true;
                    true
                }
            }
            FieldPayload::Reference(_) => {
                return Err(ObjectError::NotCollection { type_name, key })
            }
            _ => return Err(ObjectError::NotReference { type_name, key }),
        };
        if added {
            self.notify(key);
        }
        Ok(added)
    }

    /// Remove from the reference collection of `key`.
    pub fn remove_reference(&mut self, key: FieldKey, id: ObjectId) -> ObjectResult<bool> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        let removed = match &mut field.payload {
            FieldPayload::ReferenceList(list) => {
                if let Some(position) = list.iter().position(|r| *r == id) {
                    list.remove(position);
                    field.changed = true;
                    true
                } else {
                    false
                }
            }
            FieldPayload::Reference(_) => {
                return Err(ObjectError::NotCollection { type_name, key })
            }
            _ => return Err(ObjectError::NotReference { type_name, key }),
        };
        if removed {
            self.notify(key);
        }
        Ok(removed)
    }

    /// Empty the reference collection of `key`.
    pub fn clear_references(&mut self, key: FieldKey) -> ObjectResult<bool> {
        let type_name = self.type_name;
        let field = self.field_mut(key)?;
        let cleared = match &mut field.payload {
            FieldPayload::ReferenceList(list) => {
                if list.is_empty() {
                    false
                } else {
                    list.clear();
                    field.changed = true;
                    true
                }
            }
            FieldPayload::Reference(_) => {
                return Err(ObjectError::NotCollection { type_name, key })
            }
            _ => return Err(ObjectError::NotReference { type_name, key }),
        };
        if cleared {
            self.notify(key);
        }
        Ok(cleared)
    }

    // ---------------------------------------------------------------
    // Raw loads (engine hydration; no change tracking, no notification)
    // ---------------------------------------------------------------

    pub fn load_value(&mut self, key: FieldKey, value: Option<Value>) -> ObjectResult<()> {
        self.field_mut(key)?.load(FieldPayload::Element(value));
        Ok(())
    }

    pub fn load_values(&mut self, key: FieldKey, values: Vec<Value>) -> ObjectResult<()> {
        self.field_mut(key)?.load(FieldPayload::ElementList(values));
        Ok(())
    }

    pub fn load_reference(&mut self, key: FieldKey, id: Option<ObjectId>) -> ObjectResult<()> {
        self.field_mut(key)?.load(FieldPayload::Reference(id));
        Ok(())
    }

    pub fn load_references(&mut self, key: FieldKey, ids: Vec<ObjectId>) -> ObjectResult<()> {
        self.field_mut(key)?.load(FieldPayload::ReferenceList(ids));
        Ok(())
    }

    /// Load a payload verbatim (shape already known).
    pub fn load_payload(&mut self, key: FieldKey, payload: FieldPayload) -> ObjectResult<()> {
        self.field_mut(key)?.load(payload);
        Ok(())
    }

    /// Drop the payload of `key` and mark it unretrieved.
    pub fn unload_field(&mut self, key: FieldKey) -> ObjectResult<()> {
        self.field_mut(key)?.unload();
        Ok(())
    }

    /// Mark every field unretrieved (a hydration shell).
    pub fn mark_all_unretrieved(&mut self) {
        for field in &mut self.fields {
            field.unload();
        }
    }

    // ---------------------------------------------------------------
    // Change tracking
    // ---------------------------------------------------------------

    /// Dirty since the last successful persist.
    pub fn is_changed(&self) -> bool {
        self.fields.iter().any(|f| f.changed)
    }

    /// Keys of the currently dirty fields.
    pub fn changed_keys(&self) -> Vec<FieldKey> {
        self.fields
            .iter()
            .filter(|f| f.changed)
            .map(|f| f.key)
            .collect()
    }

    /// Reset every field's `changed` bit.
    pub fn clear_changes(&mut self) {
        for field in &mut self.fields {
            field.reset_changed();
        }
    }

    // ---------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------

    /// Install a listener for this object's own changes.
    pub fn set_change_listener(&mut self, listener: SharedListener) {
        self.listener = Some((None, listener));
    }

    /// Install a listener on behalf of a graph root: dispatched paths are
    /// prefixed with the chain of reference keys leading here.
    pub fn set_prefixed_listener(&mut self, prefix: FieldPath, listener: SharedListener) {
        self.listener = Some((Some(prefix), listener));
    }

    pub fn clear_change_listener(&mut self) {
        self.listener = None;
    }

    pub fn has_change_listener(&self) -> bool {
        self.listener.is_some()
    }

    /// The prefix under which this object reports, if any.
    pub fn listener_prefix(&self) -> Option<&FieldPath> {
        self.listener.as_ref().and_then(|(prefix, _)| prefix.as_ref())
    }

    /// A clone of the installed listener handle, for wiring children.
    pub fn listener_handle(&self) -> Option<SharedListener> {
        self.listener.as_ref().map(|(_, l)| Rc::clone(l))
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    /// Suspend or resume notification dispatch (batch hydration).
    pub fn set_notifications_enabled(&mut self, enabled: bool) {
        self.notifications_enabled = enabled;
    }

    pub fn auto_retrieve(&self) -> bool {
        self.auto_retrieve
    }

    /// Suspend or resume on-demand field retrieval (batch hydration).
    pub fn set_auto_retrieve(&mut self, enabled: bool) {
        self.auto_retrieve = enabled;
    }

    fn notify(&self, key: FieldKey) {
        if !self.notifications_enabled {
            return;
        }
        if let Some((prefix, listener)) = &self.listener {
            let path = match prefix {
                Some(prefix) => prefix.append(key),
                None => FieldPath::root(key),
            };
            (listener.borrow_mut())(&path);
        }
    }

    // ---------------------------------------------------------------
    // Copies
    // ---------------------------------------------------------------

    /// A data-only copy: fields, stamps, lifecycle state, but no listener.
    /// Versioning and synchronization work on detached copies.
    pub fn clone_detached(&self) -> Self {
        Self {
            id: self.id,
            type_name: self.type_name,
            created: self.created,
            modified: self.modified,
            removed: self.removed,
            remove_on_update: self.remove_on_update,
            expires_at: self.expires_at,
            origin: self.origin,
            fields: self.fields.clone(),
            listener: None,
            notifications_enabled: true,
            auto_retrieve: self.auto_retrieve,
        }
    }

    fn not_element(&self, key: FieldKey) -> ObjectError {
        ObjectError::NotElement {
            type_name: self.type_name,
            key,
        }
    }

    fn not_reference(&self, key: FieldKey) -> ObjectError {
        ObjectError::NotReference {
            type_name: self.type_name,
            key,
        }
    }

    fn not_collection(&self, key: FieldKey) -> ObjectError {
        ObjectError::NotCollection {
            type_name: self.type_name,
            key,
        }
    }

    fn not_single_valued(&self, key: FieldKey) -> ObjectError {
        ObjectError::NotSingleValued {
            type_name: self.type_name,
            key,
        }
    }
}

impl fmt::Debug for PersistentObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentObject")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("new", &self.is_new())
            .field("removed", &self.removed)
            .field("changed", &self.is_changed())
            .field("fields", &self.fields.len())
            .finish()
    }
}
