//! The stored form of a persistent object.
//!
//! A record is the driver's view: identity, audit stamps, and the field
//! payloads, nothing else. Provenance and change bits are in-memory state
//! the engine reapplies when it hydrates an object from a record.

use std::collections::BTreeMap;

use tracing::debug;

use opal_object::{FieldPayload, ObjectResult, PersistentObject};
use opal_schema::builtin;
use opal_types::{AuditStamp, FieldKey, ObjectId, Timestamp, TypeName};

/// One row of a physical container.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub type_name: TypeName,
    pub created: Option<AuditStamp>,
    pub modified: Option<AuditStamp>,
    pub expires_at: Option<Timestamp>,
    pub fields: BTreeMap<FieldKey, FieldPayload>,
}

impl ObjectRecord {
    /// Capture an object's full state. Unretrieved fields are captured as
    /// empty; use [`overlaid_on`](Self::overlaid_on) when updating a row
    /// from a partially retrieved object.
    pub fn from_object(object: &PersistentObject) -> Self {
        let fields = object
            .fields()
            .iter()
            .map(|f| (f.key(), f.payload().clone()))
            .collect();
        Self {
            id: object.id(),
            type_name: object.type_name(),
            created: object.created(),
            modified: object.modified(),
            expires_at: object.expires_at(),
            fields,
        }
    }

    /// Capture an object's state on top of its existing row: retrieved
    /// fields come from the object, unretrieved ones keep their stored
    /// payloads. An object that never loaded a field cannot blank it.
    pub fn overlaid_on(object: &PersistentObject, existing: &ObjectRecord) -> Self {
        let mut record = Self::from_object(object);
        for field in object.fields() {
            if !field.is_retrieved() {
                if let Some(stored) = existing.fields.get(&field.key()) {
                    record.fields.insert(field.key(), stored.clone());
                }
            }
        }
        record
    }

    /// Load this record's payloads and stamps into an object shell.
    /// Fields the object's schema no longer declares are skipped.
    pub fn hydrate(&self, object: &mut PersistentObject) -> ObjectResult<()> {
        object.set_created(self.created);
        object.set_modified(self.modified);
        object.keep_until(self.expires_at);
        for (key, payload) in &self.fields {
            if object.field(*key).is_err() {
                debug!(id = %self.id.short_id(), key = %key, "skipping unknown stored field");
                continue;
            }
            object.load_payload(*key, payload.clone())?;
        }
        Ok(())
    }

    /// The allowed-groups reference stored on this row.
    pub fn allowed_groups(&self) -> Option<ObjectId> {
        match self.fields.get(&builtin::ALLOWED_GROUPS_FIELD) {
            Some(FieldPayload::Reference(id)) => *id,
            _ => None,
        }
    }

    /// Every object this record references, reserved field included.
    pub fn referenced_ids(&self) -> Vec<ObjectId> {
        let mut ids = Vec::new();
        for payload in self.fields.values() {
            match payload {
                FieldPayload::Reference(Some(id)) => ids.push(*id),
                FieldPayload::ReferenceList(list) => ids.extend_from_slice(list),
                _ => {}
            }
        }
        ids
    }

    /// Returns `true` if any payload references `target`.
    pub fn references(&self, target: ObjectId) -> bool {
        self.fields.values().any(|payload| match payload {
            FieldPayload::Reference(Some(id)) => *id == target,
            FieldPayload::ReferenceList(list) => list.contains(&target),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use opal_schema::{FieldDescriptor, SchemaRegistry, TypeDescriptor};
    use opal_types::Value;

    const DOCUMENT: TypeName = TypeName::new("document");
    const CHAPTER: TypeName = TypeName::new("chapter");
    const TITLE: FieldKey = FieldKey::new("title");
    const CHAPTERS: FieldKey = FieldKey::new("chapters");

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register(
                TypeDescriptor::new(DOCUMENT)
                    .field(FieldDescriptor::text(TITLE))
                    .field(FieldDescriptor::composition_list(CHAPTERS, CHAPTER)),
            )
            .register(TypeDescriptor::new(CHAPTER))
            .build()
            .unwrap()
    }

    #[test]
    fn capture_and_hydrate_roundtrip() {
        let registry = registry();
        let mut doc = PersistentObject::new(&registry, DOCUMENT).unwrap();
        doc.set_value(TITLE, Some(Value::from("Opal"))).unwrap();
        let chapter = ObjectId::new();
        doc.add_reference(CHAPTERS, chapter).unwrap();

        let record = ObjectRecord::from_object(&doc);
        assert_eq!(record.id, doc.id());
        assert_eq!(record.referenced_ids(), vec![chapter]);
        assert!(record.references(chapter));

        let mut shell =
            PersistentObject::with_id(&registry, DOCUMENT, record.id).unwrap();
        shell.mark_all_unretrieved();
        record.hydrate(&mut shell).unwrap();

        assert_eq!(shell.value(TITLE).unwrap(), Some(&Value::from("Opal")));
        assert_eq!(shell.references(CHAPTERS).unwrap(), &[chapter]);
        assert!(!shell.is_changed());
    }

    #[test]
    fn overlay_preserves_unretrieved_fields() {
        let registry = registry();
        let mut doc = PersistentObject::new(&registry, DOCUMENT).unwrap();
        doc.set_value(TITLE, Some(Value::from("old"))).unwrap();
        let chapter = ObjectId::new();
        doc.add_reference(CHAPTERS, chapter).unwrap();
        let stored = ObjectRecord::from_object(&doc);

        // A partially retrieved copy: title loaded and changed, chapters
        // never loaded.
        let mut partial =
            PersistentObject::with_id(&registry, DOCUMENT, doc.id()).unwrap();
        partial.mark_all_unretrieved();
        partial.load_value(TITLE, Some(Value::from("old"))).unwrap();
        partial.set_value(TITLE, Some(Value::from("new"))).unwrap();

        let merged = ObjectRecord::overlaid_on(&partial, &stored);
        assert_eq!(
            merged.fields.get(&TITLE),
            Some(&FieldPayload::Element(Some(Value::from("new"))))
        );
        // The unloaded collection kept its stored payload.
        assert_eq!(
            merged.fields.get(&CHAPTERS),
            Some(&FieldPayload::ReferenceList(vec![chapter]))
        );
    }

    #[test]
    fn allowed_groups_accessor() {
        let registry = registry();
        let mut doc = PersistentObject::new(&registry, DOCUMENT).unwrap();
        assert_eq!(ObjectRecord::from_object(&doc).allowed_groups(), None);

        let groups = ObjectId::new();
        doc.set_allowed_groups(Some(groups)).unwrap();
        let record = ObjectRecord::from_object(&doc);
        assert_eq!(record.allowed_groups(), Some(groups));
        assert!(record.referenced_ids().contains(&groups));
    }
}
