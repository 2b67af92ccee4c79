//! The validated, immutable collection of all registered types.
//!
//! A registry is assembled once through [`SchemaBuilder`] and then only
//! queried. Validation happens in [`SchemaBuilder::build`], after every
//! type is known, so mutually referencing and self-referencing types are
//! declared in any order.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::builtin;
use crate::descriptor::{FieldDescriptor, TypeDescriptor};
use crate::error::{SchemaError, SchemaResult};

use opal_types::{FieldKey, TypeName, ValueKind};

/// Collects type descriptors and validates them into a [`SchemaRegistry`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeDescriptor>,
}

impl SchemaBuilder {
    /// Declare a type. Order does not matter; validation is deferred to
    /// [`build`](Self::build).
    pub fn register(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// Validate everything and produce the immutable registry.
    ///
    /// The built-in `group` and `allowed-groups` types are seeded first;
    /// registering either name again is a duplicate.
    pub fn build(self) -> SchemaResult<SchemaRegistry> {
        let mut types: BTreeMap<TypeName, TypeDescriptor> = BTreeMap::new();
        types.insert(builtin::GROUP, builtin::group_descriptor());
        types.insert(
            builtin::ALLOWED_GROUPS,
            builtin::allowed_groups_descriptor(),
        );

        for descriptor in self.types {
            if types.contains_key(&descriptor.name()) {
                return Err(SchemaError::DuplicateType(descriptor.name()));
            }
            types.insert(descriptor.name(), descriptor);
        }

        let registry = SchemaRegistry { types };
        registry.validate()?;
        Ok(registry)
    }
}

/// All registered persistent types, keyed by name.
#[derive(Debug)]
pub struct SchemaRegistry {
    types: BTreeMap<TypeName, TypeDescriptor>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// A registry holding only the built-in types.
    pub fn with_builtins() -> Self {
        SchemaBuilder::default()
            .build()
            .expect("built-in schema is valid")
    }

    /// Number of registered types, built-ins included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn contains(&self, name: TypeName) -> bool {
        self.types.contains_key(&name)
    }

    /// Look up a type descriptor.
    pub fn get(&self, name: TypeName) -> SchemaResult<&TypeDescriptor> {
        self.types
            .get(&name)
            .ok_or(SchemaError::UnknownType(name))
    }

    /// All descriptors in name order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }

    /// All concrete (instantiable) type names in name order.
    pub fn concrete_types(&self) -> Vec<TypeName> {
        self.types
            .values()
            .filter(|d| !d.is_abstract())
            .map(|d| d.name())
            .collect()
    }

    // ---------------------------------------------------------------
    // Inheritance queries
    // ---------------------------------------------------------------

    /// The fields of a type: ancestors' first, own last, declaration order
    /// preserved within each level.
    pub fn effective_fields(&self, name: TypeName) -> SchemaResult<Vec<&FieldDescriptor>> {
        let mut chain = Vec::new();
        let mut current = Some(name);
        while let Some(type_name) = current {
            let descriptor = self.get(type_name)?;
            chain.push(descriptor);
            current = descriptor.parent_name();
        }
        chain.reverse();
        Ok(chain.iter().flat_map(|d| d.own_fields()).collect())
    }

    /// Look up one field of a type, searching the ancestor chain.
    pub fn field(&self, name: TypeName, key: FieldKey) -> SchemaResult<&FieldDescriptor> {
        let mut current = Some(name);
        while let Some(type_name) = current {
            let descriptor = self.get(type_name)?;
            if let Some(field) = descriptor.own_fields().iter().find(|f| f.key == key) {
                return Ok(field);
            }
            current = descriptor.parent_name();
        }
        Err(SchemaError::UnknownField {
            type_name: name,
            key,
        })
    }

    /// Returns `true` if `name` is `ancestor` or one of its descendants.
    pub fn is_kind_of(&self, name: TypeName, ancestor: TypeName) -> bool {
        let mut current = Some(name);
        while let Some(type_name) = current {
            if type_name == ancestor {
                return true;
            }
            current = self
                .types
                .get(&type_name)
                .and_then(|d| d.parent_name());
        }
        false
    }

    /// The type and all its transitive subtypes, in name order.
    pub fn family(&self, name: TypeName) -> Vec<TypeName> {
        self.types
            .keys()
            .copied()
            .filter(|candidate| self.is_kind_of(*candidate, name))
            .collect()
    }

    /// The concrete members of [`family`](Self::family): the types that
    /// actually have containers.
    pub fn concrete_family(&self, name: TypeName) -> Vec<TypeName> {
        self.family(name)
            .into_iter()
            .filter(|n| self.types.get(n).map(|d| !d.is_abstract()).unwrap_or(false))
            .collect()
    }

    // ---------------------------------------------------------------
    // Reachability
    // ---------------------------------------------------------------

    /// Every type reachable from `roots` through declared reference fields,
    /// parent links, and subtype links (BFS). The roots themselves are
    /// included; unknown roots are an error.
    pub fn reachable_from(&self, roots: &[TypeName]) -> SchemaResult<Vec<TypeName>> {
        let mut visited: HashSet<TypeName> = HashSet::new();
        let mut queue: VecDeque<TypeName> = VecDeque::new();

        for root in roots {
            if !self.contains(*root) {
                return Err(SchemaError::UnknownType(*root));
            }
            if visited.insert(*root) {
                queue.push_back(*root);
            }
        }

        while let Some(current) = queue.pop_front() {
            let descriptor = self.get(current)?;

            let mut neighbors: Vec<TypeName> = Vec::new();
            if let Some(parent) = descriptor.parent_name() {
                neighbors.push(parent);
            }
            neighbors.extend(
                descriptor
                    .own_fields()
                    .iter()
                    .filter_map(|f| f.shape.target()),
            );
            // Subtypes travel with their ancestor: a query for the ancestor
            // fans out over the whole family.
            neighbors.extend(
                self.family(current)
                    .into_iter()
                    .filter(|n| *n != current),
            );

            for neighbor in neighbors {
                if visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }

        let mut result: Vec<TypeName> = visited.into_iter().collect();
        result.sort();
        Ok(result)
    }

    // ---------------------------------------------------------------
    // Validation
    // ---------------------------------------------------------------

    fn validate(&self) -> SchemaResult<()> {
        for descriptor in self.types.values() {
            self.validate_parent_chain(descriptor)?;
            self.validate_fields(descriptor)?;
        }
        Ok(())
    }

    fn validate_parent_chain(&self, descriptor: &TypeDescriptor) -> SchemaResult<()> {
        let mut seen: HashSet<TypeName> = HashSet::new();
        seen.insert(descriptor.name());
        let mut current = descriptor.parent_name();
        while let Some(parent) = current {
            if !self.contains(parent) {
                return Err(SchemaError::MissingParent {
                    child: descriptor.name(),
                    parent,
                });
            }
            if !seen.insert(parent) {
                return Err(SchemaError::ParentCycle(descriptor.name()));
            }
            current = self.types.get(&parent).and_then(|d| d.parent_name());
        }
        Ok(())
    }

    fn validate_fields(&self, descriptor: &TypeDescriptor) -> SchemaResult<()> {
        let type_name = descriptor.name();
        let mut seen: HashSet<FieldKey> = HashSet::new();

        // Walk the whole chain so a subtype cannot shadow an ancestor field.
        let mut chain = Vec::new();
        let mut current = Some(type_name);
        while let Some(name) = current {
            let d = self.get(name)?;
            chain.push(d);
            current = d.parent_name();
        }

        for level in &chain {
            for field in level.own_fields() {
                if field.key == builtin::ALLOWED_GROUPS_FIELD {
                    return Err(SchemaError::ReservedField {
                        type_name,
                        key: field.key,
                    });
                }
                if !seen.insert(field.key) {
                    return Err(SchemaError::DuplicateField {
                        type_name,
                        key: field.key,
                    });
                }
                if let Some(target) = field.shape.target() {
                    if !self.contains(target) {
                        return Err(SchemaError::MissingTarget {
                            type_name: level.name(),
                            key: field.key,
                            target,
                        });
                    }
                }
                if field.full_text_indexed
                    && field.shape.element_kind() != Some(ValueKind::Text)
                {
                    return Err(SchemaError::NotIndexable {
                        type_name: level.name(),
                        key: field.key,
                    });
                }
            }
        }
        Ok(())
    }
}
