use serde::Serialize;

use opal_types::{EdgeKind, FieldKey, RemovalBehavior, TypeName, ValueKind};

/// The shape of one field: what it stores and, for references, how the
/// edge binds the referenced object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FieldShape {
    /// A single typed element value.
    Element { kind: ValueKind },
    /// An ordered collection of typed element values.
    ElementList { kind: ValueKind },
    /// A single reference to another persistent object.
    Reference {
        target: TypeName,
        edge: EdgeKind,
        removal: RemovalBehavior,
    },
    /// An ordered collection of references to other persistent objects.
    ReferenceList {
        target: TypeName,
        edge: EdgeKind,
        removal: RemovalBehavior,
    },
}

impl FieldShape {
    /// The referenced type, if this is a reference shape.
    pub fn target(&self) -> Option<TypeName> {
        match self {
            Self::Reference { target, .. } | Self::ReferenceList { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// The edge kind, if this is a reference shape.
    pub fn edge(&self) -> Option<EdgeKind> {
        match self {
            Self::Reference { edge, .. } | Self::ReferenceList { edge, .. } => Some(*edge),
            _ => None,
        }
    }

    /// The cascaded-removal behavior, if this is a reference shape.
    pub fn removal(&self) -> Option<RemovalBehavior> {
        match self {
            Self::Reference { removal, .. } | Self::ReferenceList { removal, .. } => {
                Some(*removal)
            }
            _ => None,
        }
    }

    /// The element kind, if this is an element shape.
    pub fn element_kind(&self) -> Option<ValueKind> {
        match self {
            Self::Element { kind } | Self::ElementList { kind } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference { .. } | Self::ReferenceList { .. })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::ElementList { .. } | Self::ReferenceList { .. })
    }
}

/// Declaration of one field of a persistent type.
///
/// The shorthand constructors cover the common cases; `removal` and
/// `full_text` refine them. Compositions default to [`RemovalBehavior::Forced`]
/// (the child belongs to its owner), aggregations to [`RemovalBehavior::Keep`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub key: FieldKey,
    pub shape: FieldShape,
    pub full_text_indexed: bool,
}

impl FieldDescriptor {
    fn new(key: FieldKey, shape: FieldShape) -> Self {
        Self {
            key,
            shape,
            full_text_indexed: false,
        }
    }

    /// A single element of the given kind.
    pub fn element(key: FieldKey, kind: ValueKind) -> Self {
        Self::new(key, FieldShape::Element { kind })
    }

    /// An element collection of the given kind.
    pub fn element_list(key: FieldKey, kind: ValueKind) -> Self {
        Self::new(key, FieldShape::ElementList { kind })
    }

    /// Shorthand for a text element.
    pub fn text(key: FieldKey) -> Self {
        Self::element(key, ValueKind::Text)
    }

    /// Shorthand for an integer element.
    pub fn integer(key: FieldKey) -> Self {
        Self::element(key, ValueKind::Integer)
    }

    /// Shorthand for a float element.
    pub fn float(key: FieldKey) -> Self {
        Self::element(key, ValueKind::Float)
    }

    /// Shorthand for a boolean element.
    pub fn boolean(key: FieldKey) -> Self {
        Self::element(key, ValueKind::Boolean)
    }

    /// Shorthand for a timestamp element.
    pub fn timestamp(key: FieldKey) -> Self {
        Self::element(key, ValueKind::Timestamp)
    }

    /// An owning single reference; the child is removed with its owner.
    pub fn composition(key: FieldKey, target: TypeName) -> Self {
        Self::new(
            key,
            FieldShape::Reference {
                target,
                edge: EdgeKind::Composition,
                removal: RemovalBehavior::Forced,
            },
        )
    }

    /// An owning reference collection.
    pub fn composition_list(key: FieldKey, target: TypeName) -> Self {
        Self::new(
            key,
            FieldShape::ReferenceList {
                target,
                edge: EdgeKind::Composition,
                removal: RemovalBehavior::Forced,
            },
        )
    }

    /// A shared single reference; the child outlives its referrer.
    pub fn aggregation(key: FieldKey, target: TypeName) -> Self {
        Self::new(
            key,
            FieldShape::Reference {
                target,
                edge: EdgeKind::Aggregation,
                removal: RemovalBehavior::Keep,
            },
        )
    }

    /// A shared reference collection.
    pub fn aggregation_list(key: FieldKey, target: TypeName) -> Self {
        Self::new(
            key,
            FieldShape::ReferenceList {
                target,
                edge: EdgeKind::Aggregation,
                removal: RemovalBehavior::Keep,
            },
        )
    }

    /// Override the cascaded-removal behavior of a reference field.
    pub fn removal(mut self, removal: RemovalBehavior) -> Self {
        match &mut self.shape {
            FieldShape::Reference { removal: r, .. }
            | FieldShape::ReferenceList { removal: r, .. } => *r = removal,
            _ => {}
        }
        self
    }

    /// Mark a text field as full-text indexed.
    pub fn full_text(mut self) -> Self {
        self.full_text_indexed = true;
        self
    }
}

/// Declaration of one persistent type.
///
/// `previous_name` is the rename fallback: when the physical container for
/// the current name is missing, orchestration looks for a container under
/// the previous name and renames it instead of creating an empty one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TypeDescriptor {
    name: TypeName,
    parent: Option<TypeName>,
    previous_name: Option<TypeName>,
    abstract_type: bool,
    fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn new(name: TypeName) -> Self {
        Self {
            name,
            parent: None,
            previous_name: None,
            abstract_type: false,
            fields: Vec::new(),
        }
    }

    /// Declare the parent type; this type inherits the parent's fields.
    pub fn parent(mut self, parent: TypeName) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Declare the name this type was previously registered under.
    pub fn previous_name(mut self, name: TypeName) -> Self {
        self.previous_name = Some(name);
        self
    }

    /// An abstract type gets no physical container; only its concrete
    /// subtypes are instantiable.
    pub fn abstract_type(mut self) -> Self {
        self.abstract_type = true;
        self
    }

    /// Declare a field. Declaration order is preserved.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> TypeName {
        self.name
    }

    pub fn parent_name(&self) -> Option<TypeName> {
        self.parent
    }

    pub fn previous(&self) -> Option<TypeName> {
        self.previous_name
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_type
    }

    /// The fields declared directly on this type (ancestors excluded).
    pub fn own_fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TITLE: FieldKey = FieldKey::new("title");
    const AUTHOR: FieldKey = FieldKey::new("author");
    const PERSON: TypeName = TypeName::new("person");

    #[test]
    fn composition_defaults_to_forced_removal() {
        let field = FieldDescriptor::composition(AUTHOR, PERSON);
        assert_eq!(field.shape.edge(), Some(EdgeKind::Composition));
        assert_eq!(field.shape.removal(), Some(RemovalBehavior::Forced));
    }

    #[test]
    fn aggregation_defaults_to_keep() {
        let field = FieldDescriptor::aggregation(AUTHOR, PERSON);
        assert_eq!(field.shape.edge(), Some(EdgeKind::Aggregation));
        assert_eq!(field.shape.removal(), Some(RemovalBehavior::Keep));
    }

    #[test]
    fn removal_override() {
        let field = FieldDescriptor::aggregation(AUTHOR, PERSON)
            .removal(RemovalBehavior::IfUnreferenced);
        assert_eq!(field.shape.removal(), Some(RemovalBehavior::IfUnreferenced));
    }

    #[test]
    fn removal_is_ignored_on_elements() {
        let field = FieldDescriptor::text(TITLE).removal(RemovalBehavior::Forced);
        assert_eq!(field.shape.removal(), None);
    }

    #[test]
    fn full_text_flag() {
        let field = FieldDescriptor::text(TITLE).full_text();
        assert!(field.full_text_indexed);
        assert!(!FieldDescriptor::text(TITLE).full_text_indexed);
    }

    #[test]
    fn shape_accessors() {
        let element = FieldDescriptor::integer(TITLE);
        assert_eq!(element.shape.element_kind(), Some(ValueKind::Integer));
        assert_eq!(element.shape.target(), None);
        assert!(!element.shape.is_reference());

        let list = FieldDescriptor::composition_list(AUTHOR, PERSON);
        assert_eq!(list.shape.target(), Some(PERSON));
        assert!(list.shape.is_reference());
        assert!(list.shape.is_collection());
    }

    #[test]
    fn descriptor_builder_preserves_field_order() {
        let descriptor = TypeDescriptor::new(PERSON)
            .field(FieldDescriptor::text(TITLE))
            .field(FieldDescriptor::aggregation(AUTHOR, PERSON));
        let keys: Vec<_> = descriptor.own_fields().iter().map(|f| f.key).collect();
        assert_eq!(keys, vec![TITLE, AUTHOR]);
    }
}
