//! Shared fixtures: a small publishing schema and engine constructors
//! over in-memory storage.

use std::rc::Rc;
use std::sync::Arc;

use opal_driver::{MemoryDriver, StorageDriver};
use opal_object::{groups, SharedObject};
use opal_schema::{builtin, FieldDescriptor, SchemaRegistry, TypeDescriptor};
use opal_types::{FieldKey, RemovalBehavior, SecurityModel, TypeName, UserId};

use crate::config::EngineConfig;
use crate::directory::StaticDirectory;
use crate::engine::Engine;

pub(crate) const DOCUMENT: TypeName = TypeName::new("document");
pub(crate) const CHAPTER: TypeName = TypeName::new("chapter");
pub(crate) const ASSET: TypeName = TypeName::new("asset");
/// Unreferenced by the publishing types, for migration-scope tests.
pub(crate) const ORPHAN: TypeName = TypeName::new("orphan");
pub(crate) const SCRAP: TypeName = TypeName::new("scrap");

pub(crate) const TITLE: FieldKey = FieldKey::new("title");
pub(crate) const RANK: FieldKey = FieldKey::new("rank");
pub(crate) const CHAPTERS: FieldKey = FieldKey::new("chapters");
pub(crate) const APPENDIX: FieldKey = FieldKey::new("appendix");
pub(crate) const COVER: FieldKey = FieldKey::new("cover");
pub(crate) const BODY: FieldKey = FieldKey::new("body");
pub(crate) const SECTIONS: FieldKey = FieldKey::new("sections");
pub(crate) const SOURCE: FieldKey = FieldKey::new("source");
pub(crate) const NAME: FieldKey = FieldKey::new("name");
pub(crate) const LABEL: FieldKey = FieldKey::new("label");

pub(crate) fn registry() -> Rc<SchemaRegistry> {
    Rc::new(
        SchemaRegistry::builder()
            .register(
                TypeDescriptor::new(DOCUMENT)
                    .field(FieldDescriptor::text(TITLE).full_text())
                    .field(FieldDescriptor::integer(RANK))
                    .field(FieldDescriptor::composition_list(CHAPTERS, CHAPTER))
                    .field(FieldDescriptor::composition(APPENDIX, CHAPTER))
                    .field(
                        FieldDescriptor::aggregation(COVER, ASSET)
                            .removal(RemovalBehavior::IfUnreferenced),
                    ),
            )
            .register(
                TypeDescriptor::new(CHAPTER)
                    .field(FieldDescriptor::text(BODY))
                    .field(FieldDescriptor::composition_list(SECTIONS, CHAPTER))
                    .field(FieldDescriptor::aggregation(SOURCE, ASSET)),
            )
            .register(TypeDescriptor::new(ASSET).field(FieldDescriptor::text(NAME)))
            .register(TypeDescriptor::new(ORPHAN).field(FieldDescriptor::text(LABEL)))
            .register(TypeDescriptor::new(SCRAP).parent(ORPHAN))
            .build()
            .expect("fixture schema is valid"),
    )
}

pub(crate) fn open(security: SecurityModel) -> Engine {
    open_on(Arc::new(MemoryDriver::new()), security)
}

pub(crate) fn open_as(security: SecurityModel, user: UserId) -> Engine {
    open_on_as(Arc::new(MemoryDriver::new()), security, user)
}

pub(crate) fn open_elevated() -> Engine {
    open(SecurityModel::IgnorePermissions)
}

/// An elevated engine plus a handle to its driver, for reopening the
/// same storage or inspecting it directly.
pub(crate) fn open_elevated_with_driver() -> (Engine, Arc<MemoryDriver>) {
    let driver = Arc::new(MemoryDriver::new());
    let engine = open_on(driver.clone(), SecurityModel::IgnorePermissions);
    (engine, driver)
}

pub(crate) fn open_on(driver: Arc<dyn StorageDriver>, security: SecurityModel) -> Engine {
    Engine::new(
        registry(),
        driver,
        Rc::new(StaticDirectory::anonymous()),
        EngineConfig::default().with_security(security),
    )
}

pub(crate) fn open_on_as(
    driver: Arc<dyn StorageDriver>,
    security: SecurityModel,
    user: UserId,
) -> Engine {
    Engine::new(
        registry(),
        driver,
        Rc::new(StaticDirectory::new(user)),
        EngineConfig::default().with_security(security),
    )
}

pub(crate) fn open_without_full_text() -> Engine {
    Engine::new(
        registry(),
        Arc::new(MemoryDriver::new()),
        Rc::new(StaticDirectory::anonymous()),
        EngineConfig::default()
            .with_security(SecurityModel::IgnorePermissions)
            .without_full_text(),
    )
}

/// An enforcing engine for `user` with versioning over its own store.
pub(crate) fn open_versioned_as(user: UserId) -> Engine {
    Engine::new(
        registry(),
        Arc::new(MemoryDriver::new()),
        Rc::new(StaticDirectory::new(user)),
        EngineConfig::default()
            .with_security(SecurityModel::ApplyPermissions)
            .with_versioning(Arc::new(MemoryDriver::new())),
    )
}

pub(crate) fn driver_of(engine: &Engine) -> Arc<dyn StorageDriver> {
    engine.driver_handle()
}

/// Persist a group containing `user` and a self-referencing
/// allowed-groups object granting that group read and write. Returns the
/// allowed-groups id, ready for [`set_allowed_groups`].
pub(crate) fn grant(engine: &Engine, user: UserId) -> opal_types::ObjectId {
    let elevated = engine.elevated();
    let group = elevated.create_instance(builtin::GROUP).unwrap();
    groups::add_member(&mut group.borrow_mut(), user).unwrap();
    elevated.add(&group).unwrap();
    let group_id = group.borrow().id();

    let allowed = self_referencing_groups(&elevated);
    groups::add_reader(&mut allowed.borrow_mut(), group_id).unwrap();
    groups::add_writer(&mut allowed.borrow_mut(), group_id).unwrap();
    elevated.add(&allowed).unwrap();
    let id = allowed.borrow().id();
    id
}

/// A fresh allowed-groups object guarding itself, not yet persisted.
pub(crate) fn self_referencing_groups(engine: &Engine) -> SharedObject {
    let allowed = engine.create_instance(builtin::ALLOWED_GROUPS).unwrap();
    let own_id = allowed.borrow().id();
    allowed.borrow_mut().set_allowed_groups(Some(own_id)).unwrap();
    allowed
}
