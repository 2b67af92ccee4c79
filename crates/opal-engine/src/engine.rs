//! The persistence mechanism itself.
//!
//! An engine binds a schema registry, a storage driver, and an identity
//! directory under one security model. It keeps every live object in its
//! identity cache (one handle per ID), derives at most one elevated and
//! one current-user copy of itself, and lazily initializes its storage the
//! first time the driver reports itself unprepared.
//!
//! Engines are single-owner-per-thread: objects are `Rc<RefCell<_>>`
//! handles and the caches are unsynchronized. The driver behind them is
//! `Send + Sync` and may be shared across engines and threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, warn};

use opal_driver::{DriverError, DriverResult, ObjectRecord, StorageDriver};
use opal_object::{Origin, PersistentObject, SharedObject};
use opal_types::{
    AuditStamp, Clock, EngineId, ObjectId, SecurityModel, Timestamp, TypeName,
};

use crate::config::EngineConfig;
use crate::container::Container;
use crate::directory::IdentityDirectory;
use crate::error::{EngineError, EngineResult};

struct EngineInner {
    id: EngineId,
    registry: Rc<opal_schema::SchemaRegistry>,
    driver: Arc<dyn StorageDriver>,
    directory: Rc<dyn IdentityDirectory>,
    config: EngineConfig,
    clock: RefCell<Clock>,
    /// Identity cache: one shared handle per live object.
    objects: RefCell<HashMap<ObjectId, SharedObject>>,
    /// Resolved physical container names per concrete type.
    container_names: RefCell<HashMap<TypeName, String>>,
    elevated: RefCell<Option<Engine>>,
    current_user: RefCell<Option<Engine>>,
    versioning: RefCell<Option<Engine>>,
}

/// Handle to one persistence mechanism instance. Cloning is cheap and
/// yields the same instance.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    pub fn new(
        registry: Rc<opal_schema::SchemaRegistry>,
        driver: Arc<dyn StorageDriver>,
        directory: Rc<dyn IdentityDirectory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Rc::new(EngineInner {
                id: EngineId::new(),
                registry,
                driver,
                directory,
                config,
                clock: RefCell::new(Clock::new()),
                objects: RefCell::new(HashMap::new()),
                container_names: RefCell::new(HashMap::new()),
                elevated: RefCell::new(None),
                current_user: RefCell::new(None),
                versioning: RefCell::new(None),
            }),
        }
    }

    // ---------------------------------------------------------------
    // Identity and configuration
    // ---------------------------------------------------------------

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    pub fn security(&self) -> SecurityModel {
        self.inner.config.security
    }

    pub fn registry(&self) -> &opal_schema::SchemaRegistry {
        &self.inner.registry
    }

    pub(crate) fn registry_handle(&self) -> Rc<opal_schema::SchemaRegistry> {
        Rc::clone(&self.inner.registry)
    }

    pub fn directory(&self) -> &dyn IdentityDirectory {
        self.inner.directory.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn full_text_enabled(&self) -> bool {
        self.inner.config.full_text_enabled
    }

    pub fn has_versioning(&self) -> bool {
        self.inner.config.versioning_driver.is_some()
    }

    /// The provenance objects attached through this engine carry.
    pub(crate) fn origin(&self) -> Origin {
        Origin {
            engine: self.inner.id,
            security: self.security(),
        }
    }

    /// Issue the audit stamp for a write happening now.
    pub(crate) fn stamp(&self) -> AuditStamp {
        AuditStamp::new(
            self.inner.clock.borrow_mut().tick(),
            self.inner.directory.user_for_modifications(),
        )
    }

    /// A timestamp strictly after everything this engine stamped so far.
    pub fn now(&self) -> Timestamp {
        self.inner.clock.borrow_mut().tick()
    }

    // ---------------------------------------------------------------
    // Derived copies
    // ---------------------------------------------------------------

    /// The permission-bypassing copy of this engine: same driver, same
    /// directory, same configuration, fresh caches. An engine that already
    /// ignores permissions is its own elevated copy. Memoized.
    pub fn elevated(&self) -> Engine {
        if !self.security().applies() {
            return self.clone();
        }
        let mut slot = self.inner.elevated.borrow_mut();
        slot.get_or_insert_with(|| self.derive(SecurityModel::IgnorePermissions))
            .clone()
    }

    /// The permission-applying copy of this engine, for running caller
    /// operations under the current user after elevated work. Memoized.
    pub fn current_user_copy(&self) -> Engine {
        if self.security().applies() {
            return self.clone();
        }
        let mut slot = self.inner.current_user.borrow_mut();
        slot.get_or_insert_with(|| self.derive(SecurityModel::ApplyPermissions))
            .clone()
    }

    fn derive(&self, security: SecurityModel) -> Engine {
        debug!(parent = %self.id(), %security, "deriving engine copy");
        Engine::new(
            Rc::clone(&self.inner.registry),
            Arc::clone(&self.inner.driver),
            Rc::clone(&self.inner.directory),
            self.inner.config.clone().with_security(security),
        )
    }

    /// The nested engine over the versioning driver. Always ignores
    /// permissions: snapshots are engine-internal rows. Memoized.
    pub(crate) fn versioning_repository(&self) -> EngineResult<Engine> {
        if let Some(repo) = self.inner.versioning.borrow().as_ref() {
            return Ok(repo.clone());
        }
        let driver = self
            .inner
            .config
            .versioning_driver
            .clone()
            .ok_or(EngineError::VersioningDisabled)?;
        crate::versioning::bootstrap(driver.as_ref())?;
        let repo = Engine::new(
            Rc::clone(&self.inner.registry),
            driver,
            Rc::clone(&self.inner.directory),
            EngineConfig {
                security: SecurityModel::IgnorePermissions,
                full_text_enabled: false,
                enforce_self_reference: false,
                versioning_driver: None,
                initializer: None,
            },
        );
        *self.inner.versioning.borrow_mut() = Some(repo.clone());
        Ok(repo)
    }

    // ---------------------------------------------------------------
    // Driver access
    // ---------------------------------------------------------------

    pub(crate) fn raw_driver(&self) -> &dyn StorageDriver {
        self.inner.driver.as_ref()
    }

    pub(crate) fn driver_handle(&self) -> Arc<dyn StorageDriver> {
        Arc::clone(&self.inner.driver)
    }

    /// Run a driver operation. An uninitialized store triggers lazy
    /// self-initialization (initialize plus a full container migration)
    /// and the operation is retried exactly once.
    pub(crate) fn with_driver<T>(
        &self,
        mut op: impl FnMut(&dyn StorageDriver) -> DriverResult<T>,
    ) -> EngineResult<T> {
        match op(self.raw_driver()) {
            Err(DriverError::NotInitialized) => {
                warn!(engine = %self.id(), "storage uninitialized; initializing and retrying");
                self.initialize_storage()?;
                op(self.raw_driver()).map_err(EngineError::from)
            }
            result => result.map_err(EngineError::from),
        }
    }

    /// The physical container name of a concrete type, creating the
    /// container if storage does not have it yet.
    pub(crate) fn internal_name(&self, type_name: TypeName) -> EngineResult<String> {
        if let Some(name) = self.inner.container_names.borrow().get(&type_name) {
            return Ok(name.clone());
        }
        let infos = self.with_driver(|d| d.container_infos())?;
        let name = match infos.into_iter().find(|i| i.type_name == type_name) {
            Some(info) => info.internal_name,
            None => {
                self.ensure_container(type_name)?;
                type_name.as_str().to_string()
            }
        };
        self.inner
            .container_names
            .borrow_mut()
            .insert(type_name, name.clone());
        Ok(name)
    }

    /// Invalidate the container-name cache (after migration).
    pub(crate) fn forget_container_names(&self) {
        self.inner.container_names.borrow_mut().clear();
    }

    /// Locate a record by ID across every concrete container.
    pub(crate) fn find_record_any(
        &self,
        id: ObjectId,
    ) -> EngineResult<Option<(String, ObjectRecord)>> {
        for type_name in self.registry().concrete_types() {
            let container = self.internal_name(type_name)?;
            if let Some(record) = self.with_driver(|d| d.fetch(&container, id))? {
                return Ok(Some((container, record)));
            }
        }
        Ok(None)
    }

    // ---------------------------------------------------------------
    // Identity cache
    // ---------------------------------------------------------------

    /// The cached handle for an ID, if the object is live in this engine.
    pub fn lookup(&self, id: ObjectId) -> Option<SharedObject> {
        self.inner.objects.borrow().get(&id).cloned()
    }

    pub(crate) fn cache_insert(&self, object: &SharedObject) {
        let id = object.borrow().id();
        self.inner
            .objects
            .borrow_mut()
            .insert(id, Rc::clone(object));
    }

    pub(crate) fn evict(&self, id: ObjectId) {
        self.inner.objects.borrow_mut().remove(&id);
    }

    /// Number of objects currently held by the identity cache.
    pub fn cached_objects(&self) -> usize {
        self.inner.objects.borrow().len()
    }

    /// Register a caller-constructed object in the identity cache so
    /// cascades can resolve it by ID. Keeps an already-registered handle.
    pub fn adopt(&self, object: PersistentObject) -> SharedObject {
        let id = object.id();
        let mut objects = self.inner.objects.borrow_mut();
        if let Some(existing) = objects.get(&id) {
            return Rc::clone(existing);
        }
        let shared: SharedObject = Rc::new(RefCell::new(object));
        objects.insert(id, Rc::clone(&shared));
        shared
    }

    pub(crate) fn adopt_shared(&self, object: &SharedObject) {
        let id = object.borrow().id();
        self.inner
            .objects
            .borrow_mut()
            .entry(id)
            .or_insert_with(|| Rc::clone(object));
    }

    // ---------------------------------------------------------------
    // Instantiation and retrieval
    // ---------------------------------------------------------------

    /// Instantiate a fresh object of a concrete type, through the
    /// configured initializer hook if one is installed. The object is
    /// registered in the identity cache but not persisted.
    pub fn create_instance(&self, type_name: TypeName) -> EngineResult<SharedObject> {
        let object = match &self.inner.config.initializer {
            Some(initializer) => initializer(self.registry(), type_name)?,
            None => PersistentObject::new(self.registry(), type_name)?,
        };
        Ok(self.adopt(object))
    }

    /// A container handle for a registered type.
    pub fn container(&self, type_name: TypeName) -> EngineResult<Container> {
        self.registry().get(type_name)?;
        Ok(Container::new(self.clone(), type_name))
    }

    /// Retrieve an object by type and ID: identity cache first, then the
    /// containers of the type's concrete family. Through an enforcing
    /// engine a read-protected object reads as absent.
    pub fn get(
        &self,
        type_name: TypeName,
        id: ObjectId,
    ) -> EngineResult<Option<SharedObject>> {
        if let Some(object) = self.lookup(id) {
            let (removed, actual) = {
                let borrowed = object.borrow();
                (borrowed.is_removed(), borrowed.type_name())
            };
            if removed || !self.registry().is_kind_of(actual, type_name) {
                return Ok(None);
            }
            if self.security().applies() && self.is_read_protected(&object)? {
                return Ok(None);
            }
            return Ok(Some(object));
        }
        for concrete in self.registry().concrete_family(type_name) {
            let container = self.internal_name(concrete)?;
            let Some(record) = self.with_driver(|d| d.fetch(&container, id))? else {
                continue;
            };
            if self.security().applies() && self.record_read_protected(&record)? {
                return Ok(None);
            }
            return Ok(Some(self.materialize(&record)?));
        }
        Ok(None)
    }

    /// Turn a stored record into a cached live object. An existing handle
    /// for the ID wins over the record: in-memory state is newer.
    pub(crate) fn materialize(&self, record: &ObjectRecord) -> EngineResult<SharedObject> {
        if let Some(existing) = self.lookup(record.id) {
            return Ok(existing);
        }
        let mut shell =
            PersistentObject::with_id(self.registry(), record.type_name, record.id)?;
        shell.mark_all_unretrieved();
        record.hydrate(&mut shell)?;
        shell.set_origin(Some(self.origin()));
        let shared: SharedObject = Rc::new(RefCell::new(shell));
        self.cache_insert(&shared);
        Ok(shared)
    }

    /// Load one field of a partially retrieved object from its stored
    /// row. A new object has nothing to load; the field stays local.
    pub fn retrieve_field(
        &self,
        object: &SharedObject,
        key: opal_types::FieldKey,
    ) -> EngineResult<()> {
        let id = object.borrow().id();
        let Some((_, record)) = self.find_record_any(id)? else {
            return Ok(());
        };
        if let Some(payload) = record.fields.get(&key) {
            object.borrow_mut().load_payload(key, payload.clone())?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Temporary objects
    // ---------------------------------------------------------------

    /// Remove every stored object whose expiry lies before `now`.
    /// Expired objects go through plain (non-cascaded) removal; returns
    /// how many were swept.
    pub fn remove_expired_temporary_objects(&self, now: Timestamp) -> EngineResult<usize> {
        let mut swept = 0;
        for type_name in self.registry().concrete_types() {
            let container = self.internal_name(type_name)?;
            let records =
                self.with_driver(|d| d.find(&container, &opal_driver::Query::all()))?;
            for record in records {
                let expired = record
                    .expires_at
                    .map(|expiry| now.is_after(&expiry))
                    .unwrap_or(false);
                if !expired {
                    continue;
                }
                debug!(id = %record.id.short_id(), %type_name, "sweeping expired object");
                if self.with_driver(|d| d.remove(&container, record.id))? {
                    if let Some(object) = self.lookup(record.id) {
                        object.borrow_mut().mark_removed();
                    }
                    self.evict(record.id);
                    if self.has_versioning() {
                        self.remove_versions(record.id)?;
                    }
                    swept += 1;
                }
            }
        }
        Ok(swept)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.inner.id)
            .field("security", &self.security())
            .field("cached_objects", &self.cached_objects())
            .finish()
    }
}
