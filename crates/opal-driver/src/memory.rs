//! In-memory reference backend.
//!
//! Starts uninitialized like a freshly provisioned database, so callers
//! exercise the same initialize-and-retry path they need against real
//! backends. Transactions snapshot the whole state; rollback restores it.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use tracing::debug;

use opal_object::FieldPayload;
use opal_types::{FieldKey, ObjectId, Value};

use crate::error::{DriverError, DriverResult};
use crate::filter::{apply_page, sort_records, Filter, Query};
use crate::record::ObjectRecord;
use crate::traits::{BrokenReference, ContainerInfo, PotentialBrokenReferences, StorageDriver};

#[derive(Clone, Debug)]
struct ContainerState {
    info: ContainerInfo,
    rows: BTreeMap<ObjectId, ObjectRecord>,
}

#[derive(Debug, Default)]
struct MemoryState {
    initialized: bool,
    containers: BTreeMap<String, ContainerState>,
    deleted_ids: HashSet<ObjectId>,
    removal_log: Vec<(String, ObjectId)>,
    snapshot: Option<Box<MemoryState>>,
}

impl MemoryState {
    /// Copy for the transaction snapshot. Snapshots never nest.
    fn checkpoint(&self) -> Self {
        Self {
            initialized: self.initialized,
            containers: self.containers.clone(),
            deleted_ids: self.deleted_ids.clone(),
            removal_log: self.removal_log.clone(),
            snapshot: None,
        }
    }

    fn container(&self, name: &str) -> DriverResult<&ContainerState> {
        self.containers
            .get(name)
            .ok_or_else(|| DriverError::UnknownContainer(name.to_string()))
    }

    fn container_mut(&mut self, name: &str) -> DriverResult<&mut ContainerState> {
        self.containers
            .get_mut(name)
            .ok_or_else(|| DriverError::UnknownContainer(name.to_string()))
    }

    fn record_exists(&self, id: ObjectId) -> bool {
        self.containers.values().any(|c| c.rows.contains_key(&id))
    }

    /// References in `record` whose target is stored nowhere. The record's
    /// own id counts as present so self-references pass.
    fn collect_broken(&self, record: &ObjectRecord, broken: &mut PotentialBrokenReferences) {
        for (key, payload) in &record.fields {
            let targets: &[ObjectId] = match payload {
                FieldPayload::Reference(Some(id)) => std::slice::from_ref(id),
                FieldPayload::ReferenceList(ids) => ids,
                _ => &[],
            };
            for target in targets {
                if *target != record.id && !self.record_exists(*target) {
                    broken.push(BrokenReference {
                        owner: record.id,
                        owner_type: record.type_name,
                        key: *key,
                        target: *target,
                    });
                }
            }
        }
    }
}

impl ContainerState {
    /// Drop stored payloads for fields the container no longer declares
    /// and rebrand the rows to the container's type.
    fn reshape(&mut self, info: ContainerInfo) {
        let keep: HashSet<FieldKey> = info.fields.iter().map(|f| f.key).collect();
        for row in self.rows.values_mut() {
            row.type_name = info.type_name;
            row.fields.retain(|key, _| keep.contains(key));
        }
        self.info = info;
    }
}

/// The in-memory [`StorageDriver`].
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: RwLock<MemoryState>,
}

impl MemoryDriver {
    /// A fresh, uninitialized driver.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DriverResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        let state = self.state.read().expect("lock poisoned");
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        Ok(state)
    }

    fn write(&self) -> DriverResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        let state = self.state.write().expect("lock poisoned");
        if !state.initialized {
            return Err(DriverError::NotInitialized);
        }
        Ok(state)
    }

    // ---- introspection ----

    /// Internal names of all containers, sorted.
    pub fn container_names(&self) -> Vec<String> {
        let state = self.state.read().expect("lock poisoned");
        state.containers.keys().cloned().collect()
    }

    /// Every permanent removal in order, as (container, id) pairs.
    pub fn removal_log(&self) -> Vec<(String, ObjectId)> {
        let state = self.state.read().expect("lock poisoned");
        state.removal_log.clone()
    }
}

impl StorageDriver for MemoryDriver {
    // ---- lifecycle ----

    fn is_initialized(&self) -> DriverResult<bool> {
        Ok(self.state.read().expect("lock poisoned").initialized)
    }

    fn initialize(&self) -> DriverResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if !state.initialized {
            state.initialized = true;
            debug!("memory driver initialized");
        }
        Ok(())
    }

    // ---- container orchestration ----

    fn container_infos(&self) -> DriverResult<Vec<ContainerInfo>> {
        let state = self.read()?;
        Ok(state.containers.values().map(|c| c.info.clone()).collect())
    }

    fn add_container(&self, info: &ContainerInfo) -> DriverResult<()> {
        let mut state = self.write()?;
        if state.containers.contains_key(&info.internal_name) {
            return Err(DriverError::DuplicateContainer(info.internal_name.clone()));
        }
        debug!(container = %info.internal_name, "container added");
        state.containers.insert(
            info.internal_name.clone(),
            ContainerState {
                info: info.clone(),
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn update_container(&self, info: &ContainerInfo) -> DriverResult<()> {
        let mut state = self.write()?;
        state
            .container_mut(&info.internal_name)?
            .reshape(info.clone());
        Ok(())
    }

    fn rename_container(&self, from: &str, to: &ContainerInfo) -> DriverResult<()> {
        let mut state = self.write()?;
        if state.containers.contains_key(&to.internal_name) {
            return Err(DriverError::DuplicateContainer(to.internal_name.clone()));
        }
        let mut container = state
            .containers
            .remove(from)
            .ok_or_else(|| DriverError::UnknownContainer(from.to_string()))?;
        debug!(from, to = %to.internal_name, "container renamed");
        container.reshape(to.clone());
        state
            .containers
            .insert(to.internal_name.clone(), container);
        Ok(())
    }

    fn remove_container(&self, internal_name: &str) -> DriverResult<()> {
        let mut state = self.write()?;
        state
            .containers
            .remove(internal_name)
            .ok_or_else(|| DriverError::UnknownContainer(internal_name.to_string()))?;
        debug!(container = internal_name, "container removed");
        Ok(())
    }

    // ---- writes ----

    fn insert(
        &self,
        container: &str,
        record: &ObjectRecord,
        broken: &mut PotentialBrokenReferences,
    ) -> DriverResult<()> {
        let mut state = self.write()?;
        if state.container(container)?.rows.contains_key(&record.id) {
            return Err(DriverError::DuplicateRecord {
                container: container.to_string(),
                id: record.id,
            });
        }
        state.collect_broken(record, broken);
        state
            .container_mut(container)?
            .rows
            .insert(record.id, record.clone());
        Ok(())
    }

    fn update(
        &self,
        container: &str,
        record: &ObjectRecord,
        broken: &mut PotentialBrokenReferences,
    ) -> DriverResult<()> {
        let mut state = self.write()?;
        if !state.container(container)?.rows.contains_key(&record.id) {
            return Err(DriverError::MissingRecord {
                container: container.to_string(),
                id: record.id,
            });
        }
        state.collect_broken(record, broken);
        state
            .container_mut(container)?
            .rows
            .insert(record.id, record.clone());
        Ok(())
    }

    fn remove(&self, container: &str, id: ObjectId) -> DriverResult<bool> {
        let mut state = self.write()?;
        let removed = state.container_mut(container)?.rows.remove(&id).is_some();
        if removed {
            state.deleted_ids.insert(id);
            state.removal_log.push((container.to_string(), id));
            debug!(container, %id, "record removed");
        }
        Ok(removed)
    }

    fn rescind(&self, container: &str, id: ObjectId) -> DriverResult<()> {
        let mut state = self.write()?;
        state.container_mut(container)?.rows.remove(&id);
        Ok(())
    }

    // ---- reads ----

    fn fetch(&self, container: &str, id: ObjectId) -> DriverResult<Option<ObjectRecord>> {
        let state = self.read()?;
        Ok(state.container(container)?.rows.get(&id).cloned())
    }

    fn contains(&self, container: &str, id: ObjectId) -> DriverResult<bool> {
        let state = self.read()?;
        Ok(state.container(container)?.rows.contains_key(&id))
    }

    fn exists(&self, id: ObjectId) -> DriverResult<bool> {
        let state = self.read()?;
        Ok(state.record_exists(id))
    }

    fn find(&self, container: &str, query: &Query) -> DriverResult<Vec<ObjectRecord>> {
        let state = self.read()?;
        let container = state.container(container)?;
        let full_text = container.info.full_text_keys();
        let mut matches: Vec<ObjectRecord> = container
            .rows
            .values()
            .filter(|r| query.filter.matches(r, &full_text))
            .cloned()
            .collect();
        sort_records(&mut matches, &query.sort);
        Ok(apply_page(matches, query.page))
    }

    // ---- aggregation ----

    fn count(&self, container: &str, filter: &Filter) -> DriverResult<u64> {
        let state = self.read()?;
        let container = state.container(container)?;
        let full_text = container.info.full_text_keys();
        Ok(container
            .rows
            .values()
            .filter(|r| filter.matches(r, &full_text))
            .count() as u64)
    }

    fn count_grouped(
        &self,
        container: &str,
        key: FieldKey,
        filter: &Filter,
    ) -> DriverResult<Vec<(Value, u64)>> {
        let state = self.read()?;
        let container = state.container(container)?;
        let full_text = container.info.full_text_keys();
        let mut groups: Vec<(Value, u64)> = Vec::new();
        for record in container.rows.values() {
            if !filter.matches(record, &full_text) {
                continue;
            }
            let Some(FieldPayload::Element(Some(value))) = record.fields.get(&key) else {
                continue;
            };
            match groups.iter_mut().find(|(v, _)| v == value) {
                Some((_, n)) => *n += 1,
                None => groups.push((value.clone(), 1)),
            }
        }
        groups.sort_by(|(a, _), (b, _)| a.compare(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(groups)
    }

    fn distinct_values(
        &self,
        container: &str,
        key: FieldKey,
        filter: &Filter,
    ) -> DriverResult<Vec<Value>> {
        Ok(self
            .count_grouped(container, key, filter)?
            .into_iter()
            .map(|(value, _)| value)
            .collect())
    }

    fn average(
        &self,
        container: &str,
        key: FieldKey,
        filter: &Filter,
    ) -> DriverResult<Option<f64>> {
        let state = self.read()?;
        let container = state.container(container)?;
        let full_text = container.info.full_text_keys();
        let numbers: Vec<f64> = container
            .rows
            .values()
            .filter(|r| filter.matches(r, &full_text))
            .filter_map(|r| match r.fields.get(&key) {
                Some(FieldPayload::Element(Some(value))) => value.as_numeric(),
                _ => None,
            })
            .collect();
        if numbers.is_empty() {
            return Ok(None);
        }
        Ok(Some(numbers.iter().sum::<f64>() / numbers.len() as f64))
    }

    fn sums(
        &self,
        container: &str,
        keys: &[FieldKey],
        filter: &Filter,
    ) -> DriverResult<Vec<f64>> {
        let state = self.read()?;
        let container = state.container(container)?;
        let full_text = container.info.full_text_keys();
        let mut totals = vec![0.0; keys.len()];
        for record in container.rows.values() {
            if !filter.matches(record, &full_text) {
                continue;
            }
            for (slot, key) in totals.iter_mut().zip(keys) {
                if let Some(FieldPayload::Element(Some(value))) = record.fields.get(key) {
                    if let Some(n) = value.as_numeric() {
                        *slot += n;
                    }
                }
            }
        }
        Ok(totals)
    }

    // ---- integrity ----

    fn reference_count(&self, target: ObjectId, excluding: &[ObjectId]) -> DriverResult<u64> {
        let state = self.read()?;
        let mut count = 0;
        for container in state.containers.values() {
            for record in container.rows.values() {
                if excluding.contains(&record.id) {
                    continue;
                }
                count += record
                    .referenced_ids()
                    .iter()
                    .filter(|id| **id == target)
                    .count() as u64;
            }
        }
        Ok(count)
    }

    fn is_id_deleted(&self, id: ObjectId) -> DriverResult<bool> {
        let state = self.read()?;
        Ok(state.deleted_ids.contains(&id))
    }

    // ---- transactions ----

    fn begin(&self) -> DriverResult<()> {
        let mut state = self.write()?;
        if state.snapshot.is_some() {
            return Err(DriverError::NestedTransaction);
        }
        state.snapshot = Some(Box::new(state.checkpoint()));
        Ok(())
    }

    fn commit(&self) -> DriverResult<()> {
        let mut state = self.write()?;
        if state.snapshot.take().is_none() {
            return Err(DriverError::NoTransaction);
        }
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        let mut state = self.write()?;
        let snapshot = state.snapshot.take().ok_or(DriverError::NoTransaction)?;
        *state = *snapshot;
        Ok(())
    }
}
