//! The storage contract every backend implements.

use opal_schema::FieldDescriptor;
use opal_types::{FieldKey, ObjectId, TypeName, Value};

use crate::error::DriverResult;
use crate::filter::{Filter, Query};
use crate::record::ObjectRecord;

/// Everything a backend needs to lay out one container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    /// The persistent type served by this container.
    pub type_name: TypeName,
    /// Backend-facing container name. Stays put when the type is renamed
    /// until the orchestrator migrates it.
    pub internal_name: String,
    /// Effective fields, inherited ones included.
    pub fields: Vec<FieldDescriptor>,
}

impl ContainerInfo {
    pub fn new(type_name: TypeName, internal_name: impl Into<String>) -> Self {
        Self {
            type_name,
            internal_name: internal_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    pub fn fields(mut self, descriptors: Vec<FieldDescriptor>) -> Self {
        self.fields = descriptors;
        self
    }

    /// Keys of the full-text-indexed fields, for [`Filter::FullText`].
    pub fn full_text_keys(&self) -> Vec<FieldKey> {
        self.fields
            .iter()
            .filter(|f| f.full_text_indexed)
            .map(|f| f.key)
            .collect()
    }
}

/// One reference written before its target was stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokenReference {
    /// Object holding the reference.
    pub owner: ObjectId,
    pub owner_type: TypeName,
    pub key: FieldKey,
    /// The missing target.
    pub target: ObjectId,
}

/// Dangling references observed while writing.
///
/// Cascaded writes store parents before children, so a reference may
/// legitimately dangle mid-cascade. The writer collects them here and
/// re-checks the survivors once the cascade has finished; anything still
/// dangling then is a real integrity error.
#[derive(Clone, Debug, Default)]
pub struct PotentialBrokenReferences {
    entries: Vec<BrokenReference>,
}

impl PotentialBrokenReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BrokenReference) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BrokenReference] {
        &self.entries
    }

    /// Drop entries whose target exists after all, keep the rest.
    pub fn retain_missing(&mut self, mut exists: impl FnMut(ObjectId) -> bool) {
        self.entries.retain(|entry| !exists(entry.target));
    }
}

/// Storage backend for persistent objects.
///
/// One container per concrete type. Implementations are free to map
/// containers onto tables, collections, or in-memory structures; the
/// contract below is what the persistence layer relies on.
pub trait StorageDriver: Send + Sync {
    // ---- lifecycle ----

    /// Whether the underlying store has been prepared for use.
    fn is_initialized(&self) -> DriverResult<bool>;

    /// Prepare the underlying store. Idempotent.
    fn initialize(&self) -> DriverResult<()>;

    // ---- container orchestration ----

    /// Descriptions of all containers currently present.
    fn container_infos(&self) -> DriverResult<Vec<ContainerInfo>>;

    /// Create a container. Errors if the internal name is taken.
    fn add_container(&self, info: &ContainerInfo) -> DriverResult<()>;

    /// Re-shape an existing container to the given description, keeping
    /// stored rows for fields that survive.
    fn update_container(&self, info: &ContainerInfo) -> DriverResult<()>;

    /// Move a container to a new internal name, keeping its rows.
    fn rename_container(&self, from: &str, to: &ContainerInfo) -> DriverResult<()>;

    /// Drop a container and all its rows.
    fn remove_container(&self, internal_name: &str) -> DriverResult<()>;

    // ---- writes ----

    /// Store a new record. Errors if the id is already present. Dangling
    /// references go into `broken` for the caller to re-check later.
    fn insert(
        &self,
        container: &str,
        record: &ObjectRecord,
        broken: &mut PotentialBrokenReferences,
    ) -> DriverResult<()>;

    /// Overwrite an existing record. Errors if the id is absent.
    fn update(
        &self,
        container: &str,
        record: &ObjectRecord,
        broken: &mut PotentialBrokenReferences,
    ) -> DriverResult<()>;

    /// Delete a record and remember its id as permanently removed.
    /// Returns whether a record was actually deleted.
    fn remove(&self, container: &str, id: ObjectId) -> DriverResult<bool>;

    /// Take back a record written earlier in a failed cascade. Unlike
    /// [`remove`](Self::remove) the id is not remembered as deleted.
    fn rescind(&self, container: &str, id: ObjectId) -> DriverResult<()>;

    // ---- reads ----

    fn fetch(&self, container: &str, id: ObjectId) -> DriverResult<Option<ObjectRecord>>;

    fn contains(&self, container: &str, id: ObjectId) -> DriverResult<bool>;

    /// Whether any container holds the id.
    fn exists(&self, id: ObjectId) -> DriverResult<bool>;

    fn find(&self, container: &str, query: &Query) -> DriverResult<Vec<ObjectRecord>>;

    // ---- aggregation ----

    fn count(&self, container: &str, filter: &Filter) -> DriverResult<u64>;

    /// Counts per distinct value of `key` among matching records.
    /// Records without a value for `key` are not counted.
    fn count_grouped(
        &self,
        container: &str,
        key: FieldKey,
        filter: &Filter,
    ) -> DriverResult<Vec<(Value, u64)>>;

    /// Distinct values of `key` among matching records, sorted.
    fn distinct_values(
        &self,
        container: &str,
        key: FieldKey,
        filter: &Filter,
    ) -> DriverResult<Vec<Value>>;

    /// Mean of the numeric values of `key` among matching records, or
    /// `None` when no matching record carries one.
    fn average(&self, container: &str, key: FieldKey, filter: &Filter)
        -> DriverResult<Option<f64>>;

    /// Per-key sums of numeric values among matching records, in the
    /// order the keys were given. Missing values contribute nothing.
    fn sums(&self, container: &str, keys: &[FieldKey], filter: &Filter)
        -> DriverResult<Vec<f64>>;

    // ---- integrity ----

    /// How many stored references point at `target`, not counting those
    /// held by `excluding` owners.
    fn reference_count(&self, target: ObjectId, excluding: &[ObjectId]) -> DriverResult<u64>;

    /// Whether the id belonged to a record that was permanently removed.
    fn is_id_deleted(&self, id: ObjectId) -> DriverResult<bool>;

    // ---- transactions ----

    /// Open a transaction. Errors if one is already open.
    fn begin(&self) -> DriverResult<()>;

    /// Make the open transaction's writes permanent.
    fn commit(&self) -> DriverResult<()>;

    /// Discard the open transaction's writes.
    fn rollback(&self) -> DriverResult<()>;
}
