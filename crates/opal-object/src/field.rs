//! One field of a persistent object.
//!
//! A field is stamped out from its [`FieldDescriptor`] when the object is
//! constructed and carries the descriptor's semantics (element kind or
//! reference target, edge kind, cascaded-removal behavior) alongside the
//! live state: the payload, the `changed` bit, and the `retrieved` bit.
//!
//! Validated mutation lives on [`PersistentObject`]; the field itself only
//! exposes read access and the raw load operations the engine uses when
//! hydrating objects from the driver (loads never touch `changed` and never
//! dispatch notifications).
//!
//! [`FieldDescriptor`]: opal_schema::FieldDescriptor
//! [`PersistentObject`]: crate::object::PersistentObject

use opal_schema::{FieldDescriptor, FieldShape};
use opal_types::{EdgeKind, FieldKey, ObjectId, RemovalBehavior, TypeName, Value, ValueKind};

/// The live payload of a field, one variant per field shape.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldPayload {
    Element(Option<Value>),
    ElementList(Vec<Value>),
    Reference(Option<ObjectId>),
    ReferenceList(Vec<ObjectId>),
}

impl FieldPayload {
    fn empty(shape: &FieldShape) -> Self {
        match shape {
            FieldShape::Element { .. } => Self::Element(None),
            FieldShape::ElementList { .. } => Self::ElementList(Vec::new()),
            FieldShape::Reference { .. } => Self::Reference(None),
            FieldShape::ReferenceList { .. } => Self::ReferenceList(Vec::new()),
        }
    }
}

/// One element or reference field of a persistent object.
#[derive(Clone, Debug)]
pub struct Field {
    pub(crate) key: FieldKey,
    pub(crate) payload: FieldPayload,
    pub(crate) element_kind: Option<ValueKind>,
    pub(crate) target: Option<TypeName>,
    pub(crate) edge: Option<EdgeKind>,
    pub(crate) removal: Option<RemovalBehavior>,
    pub(crate) full_text_indexed: bool,
    pub(crate) changed: bool,
    pub(crate) retrieved: bool,
}

impl Field {
    /// Stamp a field out of its descriptor. The payload starts empty, the
    /// field counts as retrieved (a fresh object is fully local).
    pub fn from_descriptor(descriptor: &FieldDescriptor) -> Self {
        Self {
            key: descriptor.key,
            payload: FieldPayload::empty(&descriptor.shape),
            element_kind: descriptor.shape.element_kind(),
            target: descriptor.shape.target(),
            edge: descriptor.shape.edge(),
            removal: descriptor.shape.removal(),
            full_text_indexed: descriptor.full_text_indexed,
            changed: false,
            retrieved: true,
        }
    }

    pub fn key(&self) -> FieldKey {
        self.key
    }

    pub fn payload(&self) -> &FieldPayload {
        &self.payload
    }

    /// The single element value, if this is a single element field.
    pub fn value(&self) -> Option<&Value> {
        match &self.payload {
            FieldPayload::Element(v) => v.as_ref(),
            _ => None,
        }
    }

    /// The element collection, empty for non-collection shapes.
    pub fn values(&self) -> &[Value] {
        match &self.payload {
            FieldPayload::ElementList(v) => v,
            _ => &[],
        }
    }

    /// The single reference, if this is a single reference field.
    pub fn reference(&self) -> Option<ObjectId> {
        match &self.payload {
            FieldPayload::Reference(r) => *r,
            _ => None,
        }
    }

    /// The reference collection, empty for non-collection shapes.
    pub fn references(&self) -> &[ObjectId] {
        match &self.payload {
            FieldPayload::ReferenceList(r) => r,
            _ => &[],
        }
    }

    /// Every reference this field currently holds, single or collection.
    pub fn referenced_ids(&self) -> Vec<ObjectId> {
        match &self.payload {
            FieldPayload::Reference(Some(id)) => vec![*id],
            FieldPayload::Reference(None) => Vec::new(),
            FieldPayload::ReferenceList(ids) => ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self.payload,
            FieldPayload::Reference(_) | FieldPayload::ReferenceList(_)
        )
    }

    pub fn is_collection(&self) -> bool {
        matches!(
            self.payload,
            FieldPayload::ElementList(_) | FieldPayload::ReferenceList(_)
        )
    }

    pub fn element_kind(&self) -> Option<ValueKind> {
        self.element_kind
    }

    /// The referenced type, for reference fields.
    pub fn target(&self) -> Option<TypeName> {
        self.target
    }

    /// The edge kind, for reference fields.
    pub fn edge(&self) -> Option<EdgeKind> {
        self.edge
    }

    /// The cascaded-removal behavior, for reference fields.
    pub fn removal_behavior(&self) -> Option<RemovalBehavior> {
        self.removal
    }

    pub fn is_full_text_indexed(&self) -> bool {
        self.full_text_indexed
    }

    /// Dirty since the last successful persist.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Loaded from the driver (or fully local). Unretrieved fields read
    /// as empty until the engine hydrates them.
    pub fn is_retrieved(&self) -> bool {
        self.retrieved
    }

    // ---------------------------------------------------------------
    // Raw loads (engine hydration; no change tracking, no notification)
    // ---------------------------------------------------------------

    /// Replace the payload wholesale and mark the field retrieved.
    pub fn load(&mut self, payload: FieldPayload) {
        self.payload = payload;
        self.retrieved = true;
    }

    /// Clear the payload and mark the field unretrieved.
    pub fn unload(&mut self) {
        self.payload = match &self.payload {
            FieldPayload::Element(_) => FieldPayload::Element(None),
            FieldPayload::ElementList(_) => FieldPayload::ElementList(Vec::new()),
            FieldPayload::Reference(_) => FieldPayload::Reference(None),
            FieldPayload::ReferenceList(_) => FieldPayload::ReferenceList(Vec::new()),
        };
        self.retrieved = false;
        self.changed = false;
    }

    /// Reset the `changed` bit after a successful persist.
    pub fn reset_changed(&mut self) {
        self.changed = false;
    }
}
