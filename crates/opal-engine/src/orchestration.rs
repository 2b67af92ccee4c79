//! Container orchestration: keeping physical storage in step with the
//! schema.
//!
//! Every concrete type gets one container carrying the reserved
//! allowed-groups field plus the type's effective fields. Migration is
//! multi-pass: types whose container operation fails with a driver error
//! are deferred to the next pass, and a pass without progress aborts.
//! Containers for types no longer reachable from the migration roots are
//! dropped, rows included; the built-in permission types are always kept.

use std::collections::HashSet;

use tracing::{debug, info};

use opal_driver::ContainerInfo;
use opal_schema::builtin;
use opal_types::TypeName;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};

impl Engine {
    /// The container layout a concrete type should have right now.
    fn container_description(&self, type_name: TypeName) -> EngineResult<ContainerInfo> {
        let mut fields = vec![builtin::allowed_groups_field()];
        fields.extend(
            self.registry()
                .effective_fields(type_name)?
                .into_iter()
                .cloned(),
        );
        Ok(ContainerInfo::new(type_name, type_name.as_str()).fields(fields))
    }

    /// Bring one type's container in line with the schema: reshape an
    /// existing one, adopt a renamed type's old container, or create a
    /// fresh one. Abstract types have no container.
    pub fn ensure_container(&self, type_name: TypeName) -> EngineResult<()> {
        let descriptor = self.registry().get(type_name)?;
        if descriptor.is_abstract() {
            return Ok(());
        }
        let previous = descriptor.previous();
        let desired = self.container_description(type_name)?;
        let infos = self.with_driver(|d| d.container_infos())?;

        if let Some(existing) = infos.iter().find(|i| i.type_name == type_name) {
            // Renamed types keep their physical container name until a
            // migration decides otherwise.
            let mut desired = desired;
            desired.internal_name = existing.internal_name.clone();
            if *existing != desired {
                debug!(%type_name, container = %desired.internal_name, "reshaping container");
                self.with_driver(|d| d.update_container(&desired))?;
            }
            return Ok(());
        }
        if let Some(previous) = previous {
            if let Some(old) = infos.iter().find(|i| i.type_name == previous) {
                let from = old.internal_name.clone();
                info!(%type_name, %previous, "adopting renamed type's container");
                self.with_driver(|d| d.rename_container(&from, &desired))?;
                return Ok(());
            }
        }
        debug!(%type_name, "adding container");
        self.with_driver(|d| d.add_container(&desired))?;
        Ok(())
    }

    /// Migrate storage to serve exactly the types reachable from `roots`
    /// (plus the built-in permission types). Creates, reshapes, renames,
    /// and finally drops what is no longer served.
    pub fn migrate_containers(&self, roots: &[TypeName]) -> EngineResult<()> {
        if !self.raw_driver().is_initialized()? {
            self.raw_driver().initialize()?;
        }
        let mut wanted = self.registry().reachable_from(roots)?;
        for required in [builtin::GROUP, builtin::ALLOWED_GROUPS] {
            if !wanted.contains(&required) {
                wanted.push(required);
            }
        }
        let mut concrete: Vec<TypeName> = Vec::new();
        for type_name in wanted {
            if !self.registry().get(type_name)?.is_abstract() {
                concrete.push(type_name);
            }
        }

        let mut pending = concrete.clone();
        while !pending.is_empty() {
            let mut deferred: Vec<TypeName> = Vec::new();
            let mut stalled = None;
            for type_name in &pending {
                match self.ensure_container(*type_name) {
                    Ok(()) => {}
                    Err(EngineError::Driver(source)) => {
                        debug!(%type_name, %source, "deferring container to next pass");
                        deferred.push(*type_name);
                        stalled = Some((*type_name, source));
                    }
                    Err(other) => return Err(other),
                }
            }
            if deferred.len() == pending.len() {
                let (type_name, source) = stalled.expect("a full pass failed");
                return Err(EngineError::MigrationStalled { type_name, source });
            }
            pending = deferred;
        }

        let keep: HashSet<TypeName> = concrete.into_iter().collect();
        for info in self.with_driver(|d| d.container_infos())? {
            if !keep.contains(&info.type_name) {
                info!(container = %info.internal_name, "dropping retired container");
                self.with_driver(|d| d.remove_container(&info.internal_name))?;
            }
        }
        self.forget_container_names();
        Ok(())
    }

    /// Full storage preparation: initialize the driver and migrate every
    /// registered type. Runs lazily on the first driver operation against
    /// an unprepared store.
    pub(crate) fn initialize_storage(&self) -> EngineResult<()> {
        self.raw_driver().initialize()?;
        let roots: Vec<TypeName> = self.registry().types().map(|d| d.name()).collect();
        info!(engine = %self.id(), types = roots.len(), "initializing storage");
        self.migrate_containers(&roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::rc::Rc;
    use std::sync::Arc;

    use crate::config::EngineConfig;
    use crate::directory::StaticDirectory;
    use crate::testutil::{self, DOCUMENT, ORPHAN, TITLE};
    use opal_driver::{MemoryDriver, StorageDriver};
    use opal_schema::{FieldDescriptor, SchemaRegistry, TypeDescriptor};
    use opal_types::{FieldKey, SecurityModel, Value};

    #[test]
    fn lazy_initialization_creates_every_container() {
        let (engine, driver) = testutil::open_elevated_with_driver();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();

        let names = driver.container_names();
        for expected in ["document", "chapter", "asset", "orphan", "group", "allowed-groups"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn migration_drops_containers_outside_the_roots() {
        let (engine, driver) = testutil::open_elevated_with_driver();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();
        assert!(driver.container_names().iter().any(|n| n == "orphan"));

        engine.migrate_containers(&[DOCUMENT]).unwrap();
        let names = driver.container_names();
        assert!(!names.iter().any(|n| n == "orphan"));
        // Reachable types and the permission types survive, rows intact.
        for expected in ["document", "chapter", "asset", "group", "allowed-groups"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(driver.exists(doc.borrow().id()).unwrap());
    }

    #[test]
    fn ensure_container_includes_the_reserved_field() {
        let engine = testutil::open_elevated();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();

        let infos = engine.raw_driver().container_infos().unwrap();
        let document = infos.iter().find(|i| i.type_name == DOCUMENT).unwrap();
        assert_eq!(
            document.fields[0].key,
            opal_schema::builtin::ALLOWED_GROUPS_FIELD
        );
        assert!(document.fields.iter().any(|f| f.key == TITLE));
    }

    #[test]
    fn renamed_type_adopts_the_old_container() {
        const NOTE: TypeName = TypeName::new("note");
        const MEMO: TypeName = TypeName::new("memo");
        const HEADLINE: FieldKey = FieldKey::new("headline");

        let driver = Arc::new(MemoryDriver::new());
        let old_registry = SchemaRegistry::builder()
            .register(TypeDescriptor::new(NOTE).field(FieldDescriptor::text(HEADLINE)))
            .build()
            .unwrap();
        let old_engine = Engine::new(
            Rc::new(old_registry),
            driver.clone(),
            Rc::new(StaticDirectory::anonymous()),
            EngineConfig::default().with_security(SecurityModel::IgnorePermissions),
        );
        let note = old_engine.create_instance(NOTE).unwrap();
        note.borrow_mut()
            .set_value(HEADLINE, Some(Value::from("carried over")))
            .unwrap();
        old_engine.add(&note).unwrap();
        let id = note.borrow().id();

        let new_registry = SchemaRegistry::builder()
            .register(
                TypeDescriptor::new(MEMO)
                    .previous_name(NOTE)
                    .field(FieldDescriptor::text(HEADLINE)),
            )
            .build()
            .unwrap();
        let new_engine = Engine::new(
            Rc::new(new_registry),
            driver.clone(),
            Rc::new(StaticDirectory::anonymous()),
            EngineConfig::default().with_security(SecurityModel::IgnorePermissions),
        );
        new_engine.migrate_containers(&[MEMO]).unwrap();

        assert!(!driver.container_names().iter().any(|n| n == "note"));
        let memo = new_engine.get(MEMO, id).unwrap().unwrap();
        assert_eq!(
            memo.borrow().value(HEADLINE).unwrap(),
            Some(&Value::from("carried over"))
        );
    }

    #[test]
    fn migration_rejects_unknown_roots() {
        let engine = testutil::open_elevated();
        let err = engine
            .migrate_containers(&[TypeName::new("no-such-type")])
            .unwrap_err();
        assert!(matches!(err, EngineError::Schema(_)));
    }

    #[test]
    fn repeated_migration_is_idempotent() {
        let (engine, driver) = testutil::open_elevated_with_driver();
        let doc = engine.create_instance(DOCUMENT).unwrap();
        engine.add(&doc).unwrap();
        engine.migrate_containers(&[DOCUMENT, ORPHAN]).unwrap();
        let before = driver.container_names();
        engine.migrate_containers(&[DOCUMENT, ORPHAN]).unwrap();
        assert_eq!(driver.container_names(), before);
        assert!(driver.exists(doc.borrow().id()).unwrap());
    }
}
