use std::fmt;

use serde::Serialize;

/// Name of a registered persistent type.
///
/// Type names are fixed at registration time and double as the logical
/// container name; the physical container name is the driver's business.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeName(&'static str);

impl TypeName {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeName({})", self.0)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a field, unique among the fields of one type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(key: &'static str) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldKey({})", self.0)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chain of field keys from a graph root down to the field that changed.
///
/// A listener on a root object receives the child's path prefixed with the
/// reference field it hangs off, so `"chapters.title"` tells the root
/// exactly which nested field changed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldPath(Vec<FieldKey>);

impl FieldPath {
    /// A path consisting of a single key.
    pub fn root(key: FieldKey) -> Self {
        Self(vec![key])
    }

    /// This path with `key` prepended.
    pub fn prepend(&self, key: FieldKey) -> Self {
        let mut keys = Vec::with_capacity(self.0.len() + 1);
        keys.push(key);
        keys.extend_from_slice(&self.0);
        Self(keys)
    }

    /// This path with `key` appended.
    pub fn append(&self, key: FieldKey) -> Self {
        let mut keys = self.0.clone();
        keys.push(key);
        Self(keys)
    }

    pub fn keys(&self) -> &[FieldKey] {
        &self.0
    }

    /// The first key on the path.
    pub fn head(&self) -> Option<FieldKey> {
        self.0.first().copied()
    }

    /// The final key on the path (the field that actually changed).
    pub fn leaf(&self) -> Option<FieldKey> {
        self.0.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({self})")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

impl From<FieldKey> for FieldPath {
    fn from(key: FieldKey) -> Self {
        Self::root(key)
    }
}
