//! Version history over a separate snapshot store.
//!
//! An engine configured with a versioning driver snapshots the stored
//! state of an object right before each update overwrites it. Snapshots
//! are relation-stripped (element payloads only) and live in their own
//! store, beside small version rows pairing the source object with its
//! snapshot and the moment that state was current. Only engines applying
//! permissions emit versions; elevated internal writes leave no history.

use opal_driver::{
    ContainerInfo, DriverResult, Filter, ObjectRecord, PotentialBrokenReferences, Query,
    SortOrder, StorageDriver,
};
use opal_object::{FieldPayload, PersistentObject};
use opal_schema::FieldDescriptor;
use opal_types::{FieldKey, ObjectId, Timestamp, TypeName, Value, ValueKind};

use tracing::debug;

use crate::engine::Engine;
use crate::error::EngineResult;

pub(crate) const VERSIONS_CONTAINER: &str = "opal-versions";
pub(crate) const SNAPSHOTS_CONTAINER: &str = "opal-snapshots";

const VERSION_TYPE: TypeName = TypeName::new("opal-version");
const SNAPSHOT_TYPE: TypeName = TypeName::new("opal-snapshot");

/// The versioned object.
const SOURCE: FieldKey = FieldKey::new("source");
/// The snapshot row holding the past state.
const SNAPSHOT: FieldKey = FieldKey::new("snapshot");
/// When the snapshotted state was current.
const TAKEN_AT: FieldKey = FieldKey::new("taken-at");

/// One entry of an object's version history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub id: ObjectId,
    /// The object this version belongs to.
    pub source: ObjectId,
    /// The snapshot row holding the state.
    pub snapshot: ObjectId,
    /// When that state was current.
    pub taken_at: Timestamp,
}

/// Prepare a versioning store: both containers, created once.
pub(crate) fn bootstrap(driver: &dyn StorageDriver) -> DriverResult<()> {
    if !driver.is_initialized()? {
        driver.initialize()?;
    }
    let present: Vec<String> = driver
        .container_infos()?
        .into_iter()
        .map(|info| info.internal_name)
        .collect();
    if !present.iter().any(|name| name == VERSIONS_CONTAINER) {
        driver.add_container(&ContainerInfo::new(VERSION_TYPE, VERSIONS_CONTAINER).fields(
            vec![
                FieldDescriptor::element(SOURCE, ValueKind::Id),
                FieldDescriptor::element(SNAPSHOT, ValueKind::Id),
                FieldDescriptor::timestamp(TAKEN_AT),
            ],
        ))?;
    }
    if !present.iter().any(|name| name == SNAPSHOTS_CONTAINER) {
        // Snapshot rows keep their source's type name; the container
        // itself is schema-less.
        driver.add_container(&ContainerInfo::new(SNAPSHOT_TYPE, SNAPSHOTS_CONTAINER))?;
    }
    Ok(())
}

impl Engine {
    /// Snapshot a stored row into the versioning store, keyed by the
    /// moment that state became current. References are stripped: a
    /// version preserves an object's own state, not its neighborhood.
    pub(crate) fn emit_version(&self, stored: &ObjectRecord) -> EngineResult<()> {
        let repo = self.versioning_repository()?;
        let taken_at = stored
            .modified
            .map(|stamp| stamp.at)
            .unwrap_or_else(Timestamp::zero);

        let mut snapshot = stored.clone();
        snapshot.id = ObjectId::new();
        snapshot
            .fields
            .retain(|_, payload| !payload_is_reference(payload));

        let mut version = ObjectRecord {
            id: ObjectId::new(),
            type_name: VERSION_TYPE,
            created: stored.modified,
            modified: stored.modified,
            expires_at: None,
            fields: Default::default(),
        };
        version
            .fields
            .insert(SOURCE, FieldPayload::Element(Some(Value::Id(stored.id))));
        version.fields.insert(
            SNAPSHOT,
            FieldPayload::Element(Some(Value::Id(snapshot.id))),
        );
        version.fields.insert(
            TAKEN_AT,
            FieldPayload::Element(Some(Value::Timestamp(taken_at))),
        );

        // Neither row carries reference payloads, so nothing can dangle.
        let mut broken = PotentialBrokenReferences::new();
        repo.with_driver(|d| d.insert(SNAPSHOTS_CONTAINER, &snapshot, &mut broken))?;
        repo.with_driver(|d| d.insert(VERSIONS_CONTAINER, &version, &mut broken))?;
        debug!(source = %stored.id.short_id(), %taken_at, "version emitted");
        Ok(())
    }

    /// The version history of an object, newest first.
    pub fn find_versions(&self, source: ObjectId) -> EngineResult<Vec<Version>> {
        let repo = self.versioning_repository()?;
        let query = Query::new(Filter::Eq(SOURCE, Value::Id(source)))
            .sorted_by(SortOrder::descending(TAKEN_AT));
        let rows = repo.with_driver(|d| d.find(VERSIONS_CONTAINER, &query))?;
        Ok(rows.iter().filter_map(version_of).collect())
    }

    /// The state of an object as of `at`: the live object when its last
    /// modification is not newer, otherwise the newest snapshot taken at
    /// or before `at`. `None` when the object did not exist yet.
    ///
    /// The returned object is detached: inspectable, not persistable.
    pub fn version_value(
        &self,
        type_name: TypeName,
        source: ObjectId,
        at: Timestamp,
    ) -> EngineResult<Option<PersistentObject>> {
        if let Some((_, record)) = self.elevated().find_record_any(source)? {
            if self.registry().is_kind_of(record.type_name, type_name) {
                let current_since = record
                    .modified
                    .map(|stamp| stamp.at)
                    .unwrap_or_else(Timestamp::zero);
                if !current_since.is_after(&at) {
                    return Ok(Some(self.detached_value(&record, source)?));
                }
            }
        }
        let repo = self.versioning_repository()?;
        for version in self.find_versions(source)? {
            if version.taken_at.is_after(&at) {
                continue;
            }
            let Some(snapshot) =
                repo.with_driver(|d| d.fetch(SNAPSHOTS_CONTAINER, version.snapshot))?
            else {
                continue;
            };
            if !self.registry().is_kind_of(snapshot.type_name, type_name) {
                return Ok(None);
            }
            return Ok(Some(self.detached_value(&snapshot, source)?));
        }
        Ok(None)
    }

    /// Drop the whole history of an object. Called when the object itself
    /// is removed; a no-op on engines without versioning.
    pub(crate) fn remove_versions(&self, source: ObjectId) -> EngineResult<()> {
        if !self.has_versioning() {
            return Ok(());
        }
        let repo = self.versioning_repository()?;
        for version in self.find_versions(source)? {
            repo.with_driver(|d| d.remove(SNAPSHOTS_CONTAINER, version.snapshot))?;
            repo.with_driver(|d| d.remove(VERSIONS_CONTAINER, version.id))?;
        }
        Ok(())
    }

    /// An uncached object carrying a record's state under the source's
    /// identity.
    fn detached_value(
        &self,
        record: &ObjectRecord,
        source: ObjectId,
    ) -> EngineResult<PersistentObject> {
        let mut shell = PersistentObject::with_id(self.registry(), record.type_name, source)?;
        shell.mark_all_unretrieved();
        record.hydrate(&mut shell)?;
        Ok(shell)
    }
}

fn payload_is_reference(payload: &FieldPayload) -> bool {
    matches!(
        payload,
        FieldPayload::Reference(_) | FieldPayload::ReferenceList(_)
    )
}

fn version_of(row: &ObjectRecord) -> Option<Version> {
    let element = |key: FieldKey| match row.fields.get(&key) {
        Some(FieldPayload::Element(Some(value))) => Some(value.clone()),
        _ => None,
    };
    Some(Version {
        id: row.id,
        source: element(SOURCE)?.as_id()?,
        snapshot: element(SNAPSHOT)?.as_id()?,
        taken_at: element(TAKEN_AT)?.as_timestamp()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::EngineError;
    use crate::testutil::{self, DOCUMENT, TITLE};
    use opal_types::UserId;

    fn versioned_setup() -> (Engine, opal_object::SharedObject) {
        let user = UserId::new();
        let engine = testutil::open_versioned_as(user);
        let allowed = testutil::grant(&engine, user);
        let doc = engine.create_instance(DOCUMENT).unwrap();
        doc.borrow_mut().set_allowed_groups(Some(allowed)).unwrap();
        doc.borrow_mut()
            .set_value(TITLE, Some(Value::from("first")))
            .unwrap();
        engine.add(&doc).unwrap();
        (engine, doc)
    }

    #[test]
    fn updates_snapshot_the_overwritten_state() {
        let (engine, doc) = versioned_setup();
        let id = doc.borrow().id();
        assert!(engine.find_versions(id).unwrap().is_empty());

        doc.borrow_mut()
            .set_value(TITLE, Some(Value::from("second")))
            .unwrap();
        engine.update(&doc).unwrap();

        let versions = engine.find_versions(id).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].source, id);
    }

    #[test]
    fn history_is_newest_first() {
        let (engine, doc) = versioned_setup();
        let id = doc.borrow().id();
        for title in ["second", "third"] {
            doc.borrow_mut()
                .set_value(TITLE, Some(Value::from(title)))
                .unwrap();
            engine.update(&doc).unwrap();
        }
        let versions = engine.find_versions(id).unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].taken_at.is_after(&versions[1].taken_at));
    }

    #[test]
    fn version_value_walks_back_in_time() {
        let (engine, doc) = versioned_setup();
        let id = doc.borrow().id();
        let first_at = doc.borrow().modified().unwrap().at;

        doc.borrow_mut()
            .set_value(TITLE, Some(Value::from("second")))
            .unwrap();
        engine.update(&doc).unwrap();
        let second_at = doc.borrow().modified().unwrap().at;

        let past = engine.version_value(DOCUMENT, id, first_at).unwrap().unwrap();
        assert_eq!(past.value(TITLE).unwrap(), Some(&Value::from("first")));

        let live = engine.version_value(DOCUMENT, id, second_at).unwrap().unwrap();
        assert_eq!(live.value(TITLE).unwrap(), Some(&Value::from("second")));
    }

    #[test]
    fn version_value_before_creation_is_absent() {
        let (engine, doc) = versioned_setup();
        let id = doc.borrow().id();
        let value = engine.version_value(DOCUMENT, id, Timestamp::zero()).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn snapshots_carry_no_references() {
        let (engine, doc) = versioned_setup();
        let id = doc.borrow().id();
        let first_at = doc.borrow().modified().unwrap().at;
        doc.borrow_mut()
            .set_value(TITLE, Some(Value::from("second")))
            .unwrap();
        engine.update(&doc).unwrap();

        let past = engine.version_value(DOCUMENT, id, first_at).unwrap().unwrap();
        // The stored row had allowed groups; the snapshot dropped them
        // along with every other reference.
        assert_eq!(past.allowed_groups(), None);
    }

    #[test]
    fn elevated_writes_leave_no_history() {
        let (engine, doc) = versioned_setup();
        let id = doc.borrow().id();
        // The elevated copy shares storage but ignores permissions, and
        // its writes must not emit versions. It works on its own handle.
        let elevated = engine.elevated();
        let own = elevated.get(DOCUMENT, id).unwrap().unwrap();
        own.borrow_mut()
            .set_value(TITLE, Some(Value::from("internal")))
            .unwrap();
        elevated.update(&own).unwrap();
        assert!(engine.find_versions(id).unwrap().is_empty());
    }

    #[test]
    fn removal_clears_the_history() {
        let (engine, doc) = versioned_setup();
        let id = doc.borrow().id();
        doc.borrow_mut()
            .set_value(TITLE, Some(Value::from("second")))
            .unwrap();
        engine.update(&doc).unwrap();
        assert_eq!(engine.find_versions(id).unwrap().len(), 1);

        assert!(engine.remove(&doc).unwrap());
        assert!(engine.find_versions(id).unwrap().is_empty());
    }

    #[test]
    fn versioning_must_be_configured() {
        let engine = testutil::open_elevated();
        assert!(matches!(
            engine.find_versions(ObjectId::new()),
            Err(EngineError::VersioningDisabled)
        ));
    }
}
