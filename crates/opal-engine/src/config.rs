//! Engine configuration.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use opal_driver::StorageDriver;
use opal_object::{ObjectResult, PersistentObject};
use opal_schema::SchemaRegistry;
use opal_types::{SecurityModel, TypeName};

/// Factory hook producing a default instance of a registered type.
/// Installed when callers want application defaults (pre-filled fields,
/// temporary expiry) on every object the engine instantiates.
pub type ObjectInitializer =
    Rc<dyn Fn(&SchemaRegistry, TypeName) -> ObjectResult<PersistentObject>>;

/// Configuration of one engine instance.
///
/// Everything except `security` is permission-independent and survives
/// into the elevated and current-user copies an engine derives.
#[derive(Clone)]
pub struct EngineConfig {
    /// Whether this engine enforces the group-based permission model.
    pub security: SecurityModel,
    /// Whether [`Filter::FullText`](opal_driver::Filter::FullText) queries
    /// are accepted.
    pub full_text_enabled: bool,
    /// Enforce that an allowed-groups object guards itself with itself.
    /// Disabled only by migration tooling that rewrites permissions.
    pub enforce_self_reference: bool,
    /// Storage for version snapshots, separate from the main driver.
    /// `None` disables versioning.
    pub versioning_driver: Option<Arc<dyn StorageDriver>>,
    /// Custom default-instance factory; `None` falls back to plain
    /// construction.
    pub initializer: Option<ObjectInitializer>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            security: SecurityModel::ApplyPermissions,
            full_text_enabled: true,
            enforce_self_reference: true,
            versioning_driver: None,
            initializer: None,
        }
    }
}

impl EngineConfig {
    pub fn with_security(mut self, security: SecurityModel) -> Self {
        self.security = security;
        self
    }

    pub fn with_versioning(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.versioning_driver = Some(driver);
        self
    }

    pub fn with_initializer(mut self, initializer: ObjectInitializer) -> Self {
        self.initializer = Some(initializer);
        self
    }

    pub fn without_full_text(mut self) -> Self {
        self.full_text_enabled = false;
        self
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("security", &self.security)
            .field("full_text_enabled", &self.full_text_enabled)
            .field("enforce_self_reference", &self.enforce_self_reference)
            .field("versioning", &self.versioning_driver.is_some())
            .field("initializer", &self.initializer.is_some())
            .finish()
    }
}
