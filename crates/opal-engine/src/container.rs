//! Typed containers: the query and collection surface over one type and
//! its subtypes.
//!
//! A container fans every operation out over the concrete family of its
//! content type, so querying an ancestor sees the whole hierarchy. Through
//! an enforcing engine, read-protected rows are filtered out before
//! anything is materialized or counted; aggregates run on the driver with
//! the visible rows scoped in, so a backend can still push them down.

use tracing::debug;

use opal_driver::{
    apply_page, sort_records, Filter, ObjectRecord, Page, Query, SortOrder,
};
use opal_object::SharedObject;
use opal_types::{FieldKey, ObjectId, TypeName, Value};

use crate::cascade::RemovalOutcome;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

/// A typed view over the stored objects of one type family.
#[derive(Clone, Debug)]
pub struct Container {
    engine: Engine,
    type_name: TypeName,
}

impl Container {
    pub(crate) fn new(engine: Engine, type_name: TypeName) -> Self {
        Self { engine, type_name }
    }

    /// The type this container serves.
    pub fn content_type(&self) -> TypeName {
        self.type_name
    }

    /// The engine this container operates through.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    // ---------------------------------------------------------------
    // Retrieval
    // ---------------------------------------------------------------

    /// A fresh instance of the content type, registered but not persisted.
    pub fn create_instance(&self) -> EngineResult<SharedObject> {
        self.engine.create_instance(self.type_name)
    }

    pub fn get(&self, id: ObjectId) -> EngineResult<Option<SharedObject>> {
        self.engine.get(self.type_name, id)
    }

    /// Matching objects, sorted and paged. Protected rows are absent.
    pub fn find(
        &self,
        filter: Filter,
        sort: &[SortOrder],
        page: Option<Page>,
    ) -> EngineResult<Vec<SharedObject>> {
        let mut records = self.visible_records(&filter)?;
        sort_records(&mut records, sort);
        let records = apply_page(records, page);
        records
            .iter()
            .map(|record| self.engine.materialize(record))
            .collect()
    }

    /// Every visible object of the family, unsorted beyond identity.
    pub fn find_all(&self) -> EngineResult<Vec<SharedObject>> {
        self.find(Filter::All, &[], None)
    }

    /// The first visible match in identity order, if any.
    pub fn find_one(&self, filter: Filter) -> EngineResult<Option<SharedObject>> {
        Ok(self.find(filter, &[], Some(Page { start: 0, max: 1 }))?.pop())
    }

    /// The visible objects NOT matching the filter.
    pub fn find_complement(
        &self,
        filter: Filter,
        sort: &[SortOrder],
        page: Option<Page>,
    ) -> EngineResult<Vec<SharedObject>> {
        self.find(Filter::Not(Box::new(filter)), sort, page)
    }

    /// Whether any visible object matches.
    pub fn contains(&self, filter: Filter) -> EngineResult<bool> {
        Ok(self.count_filtered(filter)? > 0)
    }

    /// Whether the id names a visible object of this family.
    pub fn contains_id(&self, id: ObjectId) -> EngineResult<bool> {
        for concrete in self.engine.registry().concrete_family(self.type_name) {
            let container = self.engine.internal_name(concrete)?;
            let Some(record) = self.engine.with_driver(|d| d.fetch(&container, id))? else {
                continue;
            };
            if self.engine.security().applies() && self.engine.record_read_protected(&record)? {
                return Ok(false);
            }
            return Ok(true);
        }
        Ok(false)
    }

    // ---------------------------------------------------------------
    // Aggregation
    // ---------------------------------------------------------------

    pub fn count(&self) -> EngineResult<u64> {
        self.count_filtered(Filter::All)
    }

    pub fn count_filtered(&self, filter: Filter) -> EngineResult<u64> {
        self.gate_full_text(&filter)?;
        let mut total = 0;
        for concrete in self.engine.registry().concrete_family(self.type_name) {
            let container = self.engine.internal_name(concrete)?;
            let scoped = self.scoped_filter(&container, filter.clone())?;
            total += self.engine.with_driver(|d| d.count(&container, &scoped))?;
        }
        Ok(total)
    }

    /// Counts per distinct value of `key` among visible matches.
    pub fn count_grouped(
        &self,
        key: FieldKey,
        filter: Filter,
    ) -> EngineResult<Vec<(Value, u64)>> {
        self.gate_full_text(&filter)?;
        let mut merged: Vec<(Value, u64)> = Vec::new();
        for concrete in self.engine.registry().concrete_family(self.type_name) {
            let container = self.engine.internal_name(concrete)?;
            let scoped = self.scoped_filter(&container, filter.clone())?;
            let groups =
                self.engine.with_driver(|d| d.count_grouped(&container, key, &scoped))?;
            for (value, n) in groups {
                match merged.iter_mut().find(|(v, _)| *v == value) {
                    Some((_, total)) => *total += n,
                    None => merged.push((value, n)),
                }
            }
        }
        merged.sort_by(|(a, _), (b, _)| a.compare(b).unwrap_or(std::cmp::Ordering::Equal));
        Ok(merged)
    }

    /// Distinct values of `key` among visible matches, sorted.
    pub fn find_distinct_values(
        &self,
        key: FieldKey,
        filter: Filter,
    ) -> EngineResult<Vec<Value>> {
        Ok(self
            .count_grouped(key, filter)?
            .into_iter()
            .map(|(value, _)| value)
            .collect())
    }

    /// Mean of the numeric values of `key` among visible matches.
    pub fn find_average_value(
        &self,
        key: FieldKey,
        filter: Filter,
    ) -> EngineResult<Option<f64>> {
        self.gate_full_text(&filter)?;
        let family = self.engine.registry().concrete_family(self.type_name);
        if let [concrete] = family.as_slice() {
            let container = self.engine.internal_name(*concrete)?;
            let scoped = self.scoped_filter(&container, filter)?;
            return Ok(self
                .engine
                .with_driver(|d| d.average(&container, key, &scoped))?);
        }
        // Averages of averages are wrong; a multi-container family is
        // aggregated from the rows themselves.
        let values: Vec<f64> = self
            .visible_records(&filter)?
            .iter()
            .filter_map(|record| match record.fields.get(&key) {
                Some(opal_object::FieldPayload::Element(Some(value))) => value.as_numeric(),
                _ => None,
            })
            .collect();
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    /// Per-key sums of numeric values among visible matches, in the order
    /// the keys were given.
    pub fn find_sums_of_values(
        &self,
        keys: &[FieldKey],
        filter: Filter,
    ) -> EngineResult<Vec<f64>> {
        self.gate_full_text(&filter)?;
        let mut totals = vec![0.0; keys.len()];
        for concrete in self.engine.registry().concrete_family(self.type_name) {
            let container = self.engine.internal_name(concrete)?;
            let scoped = self.scoped_filter(&container, filter.clone())?;
            let sums = self
                .engine
                .with_driver(|d| d.sums(&container, keys, &scoped))?;
            for (slot, sum) in totals.iter_mut().zip(sums) {
                *slot += sum;
            }
        }
        Ok(totals)
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    pub fn add(&self, object: &SharedObject) -> EngineResult<()> {
        self.check_type(object)?;
        self.engine.add(object)
    }

    pub fn add_cascadedly(&self, object: &SharedObject) -> EngineResult<()> {
        self.check_type(object)?;
        self.engine.add_cascadedly(object)
    }

    pub fn update(&self, object: &SharedObject) -> EngineResult<()> {
        self.check_type(object)?;
        self.engine.update(object)
    }

    pub fn update_cascadedly(&self, object: &SharedObject) -> EngineResult<()> {
        self.check_type(object)?;
        self.engine.update_cascadedly(object)
    }

    pub fn add_or_update(&self, object: &SharedObject) -> EngineResult<()> {
        self.check_type(object)?;
        self.engine.add_or_update(object)
    }

    pub fn add_or_update_cascadedly(&self, object: &SharedObject) -> EngineResult<()> {
        self.check_type(object)?;
        self.engine.add_or_update_cascadedly(object)
    }

    pub fn remove(&self, object: &SharedObject) -> EngineResult<bool> {
        self.check_type(object)?;
        self.engine.remove(object)
    }

    pub fn remove_cascadedly(&self, object: &SharedObject) -> EngineResult<RemovalOutcome> {
        self.check_type(object)?;
        self.engine.remove_cascadedly(object)
    }

    /// Remove every visible object of the family, no cascade. Returns how
    /// many rows were deleted; protected ones stay.
    pub fn clear(&self) -> EngineResult<usize> {
        let mut removed = 0;
        for object in self.find_all()? {
            if self.engine.remove(&object)? {
                removed += 1;
            }
        }
        debug!(container = %self.type_name, removed, "container cleared");
        Ok(removed)
    }

    /// The cascaded counterpart of [`clear`](Self::clear).
    pub fn clear_cascadedly(&self) -> EngineResult<usize> {
        let mut removed = 0;
        for object in self.find_all()? {
            if self.engine.remove_cascadedly(&object)? == RemovalOutcome::Removed {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------
    // Bulk loading and synchronization
    // ---------------------------------------------------------------

    /// Walk reference paths from the given objects and load every
    /// unretrieved field along the way, quietly: listeners and
    /// auto-retrieval stay off while the fields stream in.
    pub fn preload(
        &self,
        objects: &[SharedObject],
        paths: &[&[FieldKey]],
    ) -> EngineResult<()> {
        for path in paths {
            let mut frontier: Vec<SharedObject> = objects.to_vec();
            for key in *path {
                let mut next = Vec::new();
                for object in &frontier {
                    self.load_quietly(object, *key)?;
                    let (target, ids) = {
                        let borrowed = object.borrow();
                        match borrowed.field(*key) {
                            Ok(field) if field.is_reference() => {
                                (field.target(), field.referenced_ids())
                            }
                            _ => (None, Vec::new()),
                        }
                    };
                    let Some(target) = target else { continue };
                    for id in ids {
                        if let Some(child) = self.engine.get(target, id)? {
                            next.push(child);
                        }
                    }
                }
                frontier = next;
            }
        }
        Ok(())
    }

    fn load_quietly(&self, object: &SharedObject, key: FieldKey) -> EngineResult<()> {
        let (retrieved, notify, auto) = {
            let borrowed = object.borrow();
            let retrieved = borrowed
                .field(key)
                .map(|f| f.is_retrieved())
                .unwrap_or(true);
            (
                retrieved,
                borrowed.notifications_enabled(),
                borrowed.auto_retrieve(),
            )
        };
        if retrieved {
            return Ok(());
        }
        {
            let mut borrowed = object.borrow_mut();
            borrowed.set_notifications_enabled(false);
            borrowed.set_auto_retrieve(false);
        }
        let result = self.engine.retrieve_field(object, key);
        {
            let mut borrowed = object.borrow_mut();
            borrowed.set_notifications_enabled(notify);
            borrowed.set_auto_retrieve(auto);
        }
        result
    }

    /// Merge one object (and its reference graph) from another engine's
    /// storage into this container's engine.
    pub fn synchronize(&self, source: &Engine, id: ObjectId) -> EngineResult<()> {
        self.engine.synchronize(source, id)
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn check_type(&self, object: &SharedObject) -> EngineResult<()> {
        let (actual, id) = {
            let borrowed = object.borrow();
            (borrowed.type_name(), borrowed.id())
        };
        if !self.engine.registry().is_kind_of(actual, self.type_name) {
            return Err(EngineError::WrongContainer {
                container: self.type_name,
                type_name: actual,
                id,
            });
        }
        Ok(())
    }

    fn gate_full_text(&self, filter: &Filter) -> EngineResult<()> {
        if uses_full_text(filter) && !self.engine.full_text_enabled() {
            return Err(EngineError::FullTextDisabled);
        }
        Ok(())
    }

    /// Matching rows across the family, read-protected ones filtered out.
    fn visible_records(&self, filter: &Filter) -> EngineResult<Vec<ObjectRecord>> {
        self.gate_full_text(filter)?;
        let mut records = Vec::new();
        for concrete in self.engine.registry().concrete_family(self.type_name) {
            let container = self.engine.internal_name(concrete)?;
            let query = Query::new(filter.clone());
            let found = self.engine.with_driver(|d| d.find(&container, &query))?;
            for record in found {
                if self.engine.security().applies()
                    && self.engine.record_read_protected(&record)?
                {
                    continue;
                }
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Restrict a filter to the rows the current user may read, so
    /// driver-side aggregates never count protected rows. A pass-through
    /// on ignoring engines.
    fn scoped_filter(&self, container: &str, filter: Filter) -> EngineResult<Filter> {
        if !self.engine.security().applies() {
            return Ok(filter);
        }
        let query = Query::new(filter.clone());
        let matching = self.engine.with_driver(|d| d.find(container, &query))?;
        let mut visible = Vec::new();
        for record in matching {
            if !self.engine.record_read_protected(&record)? {
                visible.push(record.id);
            }
        }
        Ok(Filter::And(vec![filter, Filter::IdIn(visible)]))
    }
}

fn uses_full_text(filter: &Filter) -> bool {
    match filter {
        Filter::FullText(_) => true,
        Filter::Not(inner) => uses_full_text(inner),
        Filter::And(parts) | Filter::Or(parts) => parts.iter().any(uses_full_text),
        _ => false,
    }
}
