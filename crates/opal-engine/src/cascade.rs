//! Cascaded add, update, and removal over the reference graph.
//!
//! Cascades walk the in-memory graph (retrieved fields, cache-resolved
//! children) with a visited set, so cycles terminate. Writes are
//! two-phase: the driver collects references whose targets are not stored
//! yet, and once the cascade has finished the engine re-checks the
//! survivors. Anything still dangling fails the call, and the engine
//! rescinds its own inserts so nothing stays half-persisted.
//!
//! Removal runs on the elevated copy so the whole subtree is visible,
//! while the root decision (write protection) is taken on the calling
//! engine. Within one removal, collection references cascade before
//! single ones and the reserved allowed-groups reference goes last --
//! after the owning row is gone, so nothing is transiently unguarded.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use opal_driver::{ObjectRecord, PotentialBrokenReferences};
use opal_object::{FieldPayload, SharedObject};
use opal_types::{FieldKey, ObjectId, RemovalBehavior, RemoveOnUpdate};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::graph::retrieved_references;

/// Result of one cascaded removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The object and its cascade were removed.
    Removed,
    /// The object could not be removed: write-protected or already gone.
    Failed,
    /// Left in place because something else still references it.
    Skipped,
}

/// Working state of one cascaded write.
#[derive(Default)]
struct CascadeContext {
    visited: HashSet<ObjectId>,
    broken: PotentialBrokenReferences,
    /// Inserts performed by this call, in order, for the undo pass.
    inserted: Vec<(String, ObjectId)>,
}

impl Engine {
    // ---------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------

    /// Persist one new object. References to objects that are neither
    /// stored nor removed fail the call.
    pub fn add(&self, object: &SharedObject) -> EngineResult<()> {
        self.adopt_shared(object);
        self.validate_object(object)?;
        let mut ctx = CascadeContext::default();
        self.persist_insert(object, &mut ctx)?;
        self.finish_cascade(ctx)
    }

    /// Persist an object and everything reachable from it: new children
    /// are added, attached ones updated, allowed-groups handed down.
    pub fn add_cascadedly(&self, object: &SharedObject) -> EngineResult<()> {
        self.adopt_shared(object);
        self.validate_cascade(object)?;
        let mut ctx = CascadeContext::default();
        self.cascade_visit(object, &mut ctx)?;
        self.finish_cascade(ctx)
    }

    /// Persist the changes of one attached object. A clean object is a
    /// no-op; a write-protected one is silently left untouched.
    pub fn update(&self, object: &SharedObject) -> EngineResult<()> {
        self.require_persistent(object)?;
        self.validate_object(object)?;
        let mode = object.borrow().remove_on_update();
        match mode {
            RemoveOnUpdate::Keep => {}
            RemoveOnUpdate::Remove => {
                self.remove(object)?;
                return Ok(());
            }
            RemoveOnUpdate::RemoveCascadedly => {
                self.remove_cascadedly(object)?;
                return Ok(());
            }
        }
        if self.security().applies() && self.is_write_protected(object)? {
            debug!(id = %object.borrow().id().short_id(), "write-protected; update skipped");
            return Ok(());
        }
        if !object.borrow().is_changed() {
            return Ok(());
        }
        let id = object.borrow().id();
        let stored = self.find_record_any(id)?;
        let mut ctx = CascadeContext::default();
        self.persist_update(object, stored, &mut ctx)?;
        self.finish_cascade(ctx)
    }

    /// Update an attached object and everything reachable from it. New
    /// children are added along the way; a clean object whose retrieved
    /// descendants are dirty still gets its modification stamp bumped.
    pub fn update_cascadedly(&self, object: &SharedObject) -> EngineResult<()> {
        self.require_persistent(object)?;
        self.adopt_shared(object);
        self.validate_cascade(object)?;
        let mut ctx = CascadeContext::default();
        self.cascade_visit(object, &mut ctx)?;
        self.finish_cascade(ctx)
    }

    /// [`add`](Self::add) for new objects, [`update`](Self::update) for
    /// attached ones.
    pub fn add_or_update(&self, object: &SharedObject) -> EngineResult<()> {
        if object.borrow().is_new() {
            self.add(object)
        } else {
            self.update(object)
        }
    }

    /// The cascaded counterpart of [`add_or_update`](Self::add_or_update).
    pub fn add_or_update_cascadedly(&self, object: &SharedObject) -> EngineResult<()> {
        self.adopt_shared(object);
        self.validate_cascade(object)?;
        let mut ctx = CascadeContext::default();
        self.cascade_visit(object, &mut ctx)?;
        self.finish_cascade(ctx)
    }

    /// Remove one object, no cascade. Returns whether a row was deleted;
    /// a write-protected row is left untouched and reads as `false`.
    pub fn remove(&self, object: &SharedObject) -> EngineResult<bool> {
        self.require_persistent(object)?;
        if self.security().applies() && self.is_write_protected(object)? {
            return Ok(false);
        }
        let id = object.borrow().id();
        let Some((container, _)) = self.find_record_any(id)? else {
            return Ok(false);
        };
        let deleted = self.with_driver(|d| d.remove(&container, id))?;
        if deleted {
            object.borrow_mut().mark_removed();
            self.evict(id);
            if self.has_versioning() {
                self.remove_versions(id)?;
            }
        }
        Ok(deleted)
    }

    /// Remove an object and cascade over its reference fields per their
    /// removal behavior. Runs elevated so the full subtree is visible;
    /// the root decision honors this engine's security model.
    pub fn remove_cascadedly(&self, object: &SharedObject) -> EngineResult<RemovalOutcome> {
        self.require_persistent(object)?;
        if self.security().applies() && self.is_write_protected(object)? {
            return Ok(RemovalOutcome::Failed);
        }
        let id = object.borrow().id();
        debug!(id = %id.short_id(), "cascaded removal");
        self.remove_subtree_elevated(id)
    }

    // ---------------------------------------------------------------
    // Pre-mutation validation
    // ---------------------------------------------------------------

    fn require_persistent(&self, object: &SharedObject) -> EngineResult<()> {
        let borrowed = object.borrow();
        if borrowed.is_new() {
            return Err(EngineError::NotPersistent {
                type_name: borrowed.type_name(),
                id: borrowed.id(),
            });
        }
        Ok(())
    }

    fn validate_object(&self, object: &SharedObject) -> EngineResult<()> {
        {
            let borrowed = object.borrow();
            if let Some(origin) = borrowed.origin() {
                if origin.security != self.security() {
                    return Err(EngineError::MixedSecurityModels {
                        type_name: borrowed.type_name(),
                        id: borrowed.id(),
                        expected: self.security(),
                        actual: origin.security,
                    });
                }
            }
        }
        self.check_self_reference(object)
    }

    /// Fail fast, before any mutation: every cache-reachable object must
    /// share this engine's security model and satisfy the allowed-groups
    /// self-reference invariant.
    fn validate_cascade(&self, root: &SharedObject) -> EngineResult<()> {
        let mut seen: HashSet<ObjectId> = HashSet::new();
        let mut stack = vec![root.clone()];
        while let Some(object) = stack.pop() {
            let id = object.borrow().id();
            if !seen.insert(id) {
                continue;
            }
            self.validate_object(&object)?;
            let children = retrieved_references(&object.borrow());
            for child in children {
                if let Some(child_object) = self.lookup(child) {
                    stack.push(child_object);
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // The cascade walk
    // ---------------------------------------------------------------

    fn cascade_visit(&self, object: &SharedObject, ctx: &mut CascadeContext) -> EngineResult<()> {
        let (id, is_new, origin) = {
            let borrowed = object.borrow();
            (borrowed.id(), borrowed.is_new(), borrowed.origin())
        };
        if !ctx.visited.insert(id) {
            return Ok(());
        }
        // An object attached through another engine instance counts as
        // insertable here when this engine's storage has no row for it.
        let foreign = origin.map(|o| o.engine != self.id()).unwrap_or(false);
        let insert = is_new || (foreign && !self.with_driver(|d| d.exists(id))?);
        if insert {
            self.hand_down_allowed_groups(object)?;
            // Children first, so they are addable before the parent's
            // row references them.
            let children = retrieved_references(&object.borrow());
            for child in children {
                if let Some(child_object) = self.lookup(child) {
                    self.cascade_visit(&child_object, ctx)?;
                }
            }
            self.persist_insert(object, ctx)?;
        } else {
            self.cascade_update_visit(object, ctx)?;
        }
        Ok(())
    }

    fn cascade_update_visit(
        &self,
        object: &SharedObject,
        ctx: &mut CascadeContext,
    ) -> EngineResult<()> {
        let mode = object.borrow().remove_on_update();
        match mode {
            RemoveOnUpdate::Keep => {}
            RemoveOnUpdate::Remove => {
                self.remove(object)?;
                return Ok(());
            }
            RemoveOnUpdate::RemoveCascadedly => {
                self.remove_cascadedly(object)?;
                return Ok(());
            }
        }
        if self.security().applies() && self.is_write_protected(object)? {
            debug!(id = %object.borrow().id().short_id(), "write-protected; cascade leaves it");
            return Ok(());
        }
        self.hand_down_allowed_groups(object)?;

        // Descendant dirtiness must be sampled before the recursion
        // cleans the children.
        let subtree_dirty = self.is_changed_cascadedly(object);
        let id = object.borrow().id();
        let stored = self.find_record_any(id)?;
        let dropped = self.dropped_children(object, stored.as_ref().map(|(_, r)| r));

        let children = retrieved_references(&object.borrow());
        for child in children {
            if let Some(child_object) = self.lookup(child) {
                self.cascade_visit(&child_object, ctx)?;
            }
        }

        if object.borrow().is_changed() || subtree_dirty {
            self.persist_update(object, stored, ctx)?;
        }
        // Old children dropped by reassignment are conditionally removed
        // once the new row no longer references them.
        for (behavior, old_child) in dropped {
            self.remove_dropped_child(behavior, old_child)?;
        }
        Ok(())
    }

    /// Children present on the stored row but gone from a changed,
    /// retrieved reference field, paired with the field's removal
    /// behavior.
    fn dropped_children(
        &self,
        object: &SharedObject,
        stored: Option<&ObjectRecord>,
    ) -> Vec<(RemovalBehavior, ObjectId)> {
        let Some(stored) = stored else {
            return Vec::new();
        };
        let borrowed = object.borrow();
        let mut dropped = Vec::new();
        for field in borrowed.reference_fields() {
            if !field.is_retrieved() || !field.is_changed() {
                continue;
            }
            let behavior = field.removal_behavior().unwrap_or(RemovalBehavior::Keep);
            if behavior == RemovalBehavior::Keep {
                continue;
            }
            let current = field.referenced_ids();
            for old in payload_references(stored, field.key()) {
                if !current.contains(&old) {
                    dropped.push((behavior, old));
                }
            }
        }
        dropped
    }

    fn remove_dropped_child(
        &self,
        behavior: RemovalBehavior,
        child: ObjectId,
    ) -> EngineResult<()> {
        match behavior {
            RemovalBehavior::Keep => {}
            RemovalBehavior::Forced => {
                self.remove_subtree_elevated(child)?;
            }
            RemovalBehavior::IfUnreferenced => {
                if self.with_driver(|d| d.reference_count(child, &[]))? == 0 {
                    self.remove_subtree_elevated(child)?;
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Persisting one object
    // ---------------------------------------------------------------

    fn persist_insert(&self, object: &SharedObject, ctx: &mut CascadeContext) -> EngineResult<()> {
        let (id, type_name) = {
            let borrowed = object.borrow();
            (borrowed.id(), borrowed.type_name())
        };
        let container = self.internal_name(type_name)?;
        let stamp = self.stamp();
        let mut record = ObjectRecord::from_object(&object.borrow());
        record.created = Some(stamp);
        record.modified = Some(stamp);
        self.with_driver(|d| d.insert(&container, &record, &mut ctx.broken))?;
        object.borrow_mut().attach(self.origin(), stamp);
        self.cache_insert(object);
        ctx.inserted.push((container, id));
        debug!(id = %id.short_id(), %type_name, "inserted");
        Ok(())
    }

    fn persist_update(
        &self,
        object: &SharedObject,
        stored: Option<(String, ObjectRecord)>,
        ctx: &mut CascadeContext,
    ) -> EngineResult<()> {
        let (id, type_name, changed) = {
            let borrowed = object.borrow();
            (borrowed.id(), borrowed.type_name(), borrowed.is_changed())
        };
        let Some((container, stored_record)) = stored else {
            return Err(EngineError::NotPersistent { type_name, id });
        };
        // Snapshot the pre-update state before overwriting it. Only
        // engines applying permissions emit versions; elevated internal
        // writes do not.
        if changed && self.security().applies() && self.has_versioning() {
            self.emit_version(&stored_record)?;
        }
        let stamp = self.stamp();
        let mut record = ObjectRecord::overlaid_on(&object.borrow(), &stored_record);
        record.modified = Some(stamp);
        self.with_driver(|d| d.update(&container, &record, &mut ctx.broken))?;
        object.borrow_mut().mark_updated(stamp);
        debug!(id = %id.short_id(), %type_name, changed, "updated");
        Ok(())
    }

    /// Re-check the dangling references the driver collected. A target
    /// that exists by now, or that was deliberately removed, is fine;
    /// anything else fails the call and undoes this call's inserts.
    fn finish_cascade(&self, ctx: CascadeContext) -> EngineResult<()> {
        let CascadeContext {
            mut broken,
            inserted,
            ..
        } = ctx;
        if broken.is_empty() {
            return Ok(());
        }
        let mut resolved: HashMap<ObjectId, bool> = HashMap::new();
        for entry in broken.entries() {
            if resolved.contains_key(&entry.target) {
                continue;
            }
            let ok = self.with_driver(|d| d.exists(entry.target))?
                || self.with_driver(|d| d.is_id_deleted(entry.target))?
                || self
                    .lookup(entry.target)
                    .map(|o| o.borrow().is_removed())
                    .unwrap_or(false);
            resolved.insert(entry.target, ok);
        }
        broken.retain_missing(|target| resolved.get(&target).copied().unwrap_or(false));
        if broken.is_empty() {
            return Ok(());
        }
        let entries = broken.entries();
        warn!(count = entries.len(), "unresolved references; rescinding this call's inserts");
        for (container, id) in inserted.iter().rev() {
            self.with_driver(|d| d.rescind(container, *id))?;
            if let Some(object) = self.lookup(*id) {
                object.borrow_mut().set_origin(None);
            }
        }
        Err(EngineError::BrokenReferences {
            count: entries.len(),
            first: entries[0],
        })
    }

    // ---------------------------------------------------------------
    // Cascaded removal
    // ---------------------------------------------------------------

    pub(crate) fn remove_subtree_elevated(&self, id: ObjectId) -> EngineResult<RemovalOutcome> {
        let elevated = self.elevated();
        let mut claimed: HashSet<ObjectId> = HashSet::new();
        let mut removed: Vec<ObjectId> = Vec::new();
        let outcome = elevated.remove_subtree(id, &mut claimed, &mut removed)?;
        // Reflect the elevated removals in this engine's own cache.
        for gone in removed {
            if let Some(object) = self.lookup(gone) {
                object.borrow_mut().mark_removed();
            }
            self.evict(gone);
        }
        Ok(outcome)
    }

    fn remove_subtree(
        &self,
        id: ObjectId,
        claimed: &mut HashSet<ObjectId>,
        removed: &mut Vec<ObjectId>,
    ) -> EngineResult<RemovalOutcome> {
        if !claimed.insert(id) {
            return Ok(RemovalOutcome::Skipped);
        }
        let Some((container, record)) = self.find_record_any(id)? else {
            return Ok(RemovalOutcome::Failed);
        };
        // Collections first, then single references; the reserved
        // allowed-groups reference is handled separately below.
        let descriptors = self.registry().effective_fields(record.type_name)?;
        let mut edges: Vec<(RemovalBehavior, Vec<ObjectId>)> = Vec::new();
        for collections_pass in [true, false] {
            for descriptor in &descriptors {
                if !descriptor.shape.is_reference()
                    || descriptor.shape.is_collection() != collections_pass
                {
                    continue;
                }
                let behavior = descriptor
                    .shape
                    .removal()
                    .unwrap_or(RemovalBehavior::Keep);
                if behavior == RemovalBehavior::Keep {
                    continue;
                }
                edges.push((behavior, payload_references(&record, descriptor.key)));
            }
        }
        for (behavior, children) in edges {
            for child in children {
                self.remove_edge_target(child, behavior, claimed, removed)?;
            }
        }
        if !self.with_driver(|d| d.remove(&container, id))? {
            return Ok(RemovalOutcome::Failed);
        }
        removed.push(id);
        if let Some(object) = self.lookup(id) {
            object.borrow_mut().mark_removed();
        }
        self.evict(id);
        if self.has_versioning() {
            self.remove_versions(id)?;
        }
        // The allowed-groups value goes last: removing it earlier would
        // leave the object unguarded while its row still exists.
        if let Some(allowed) = record.allowed_groups() {
            self.remove_edge_target(allowed, RemovalBehavior::IfUnreferenced, claimed, removed)?;
        }
        Ok(RemovalOutcome::Removed)
    }

    fn remove_edge_target(
        &self,
        child: ObjectId,
        behavior: RemovalBehavior,
        claimed: &mut HashSet<ObjectId>,
        removed: &mut Vec<ObjectId>,
    ) -> EngineResult<()> {
        match behavior {
            RemovalBehavior::Keep => {}
            RemovalBehavior::Forced => {
                self.remove_subtree(child, claimed, removed)?;
            }
            RemovalBehavior::IfUnreferenced => {
                if claimed.contains(&child) {
                    return Ok(());
                }
                // Referrers already claimed by this removal do not count:
                // their rows are on the way out.
                let excluding: Vec<ObjectId> = claimed.iter().copied().collect();
                if self.with_driver(|d| d.reference_count(child, &excluding))? == 0 {
                    self.remove_subtree(child, claimed, removed)?;
                } else {
                    debug!(child = %child.short_id(), "kept: still referenced elsewhere");
                }
            }
        }
        Ok(())
    }
}

fn payload_references(record: &ObjectRecord, key: FieldKey) -> Vec<ObjectId> {
    match record.fields.get(&key) {
        Some(FieldPayload::Reference(Some(id))) => vec![*id],
        Some(FieldPayload::ReferenceList(ids)) => ids.clone(),
        _ => Vec::new(),
    }
}
