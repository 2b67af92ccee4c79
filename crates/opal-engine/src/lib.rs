//! The Opal persistence engine.
//!
//! An [`Engine`] keeps typed, change-tracked objects in an identity cache
//! and persists them through a pluggable [`StorageDriver`]. Writes cascade
//! over the object graph: compositions travel with their owner,
//! aggregations are shared, and every cascade ends with a broken-reference
//! check that rolls back the cascade's own inserts on failure.
//!
//! On top of that core the engine layers group-based read/write
//! permissions with [`elevated`](Engine::elevated) escape hatches,
//! per-object version history on a second store, two-way newest-wins
//! [`synchronize`](Engine::synchronize), and schema-driven container
//! migration.
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use std::sync::Arc;
//!
//! use opal_engine::{Engine, EngineConfig, MemoryDriver, StaticDirectory};
//! use opal_schema::{FieldDescriptor, SchemaRegistry, TypeDescriptor};
//! use opal_types::{FieldKey, TypeName, Value};
//!
//! const NOTE: TypeName = TypeName::new("note");
//! const BODY: FieldKey = FieldKey::new("body");
//!
//! # fn main() -> opal_engine::EngineResult<()> {
//! let registry = SchemaRegistry::builder()
//!     .register(TypeDescriptor::new(NOTE).field(FieldDescriptor::text(BODY)))
//!     .build()?;
//! let engine = Engine::new(
//!     Rc::new(registry),
//!     Arc::new(MemoryDriver::new()),
//!     Rc::new(StaticDirectory::anonymous()),
//!     EngineConfig::default(),
//! );
//!
//! let note = engine.create_instance(NOTE)?;
//! note.borrow_mut().set_value(BODY, Some(Value::from("hello")))?;
//! engine.add(&note)?;
//! # Ok(())
//! # }
//! ```

mod cascade;
mod config;
mod container;
mod directory;
mod engine;
mod error;
mod graph;
mod orchestration;
mod security;
mod sync;
mod transaction;
mod versioning;

#[cfg(test)]
pub(crate) mod testutil;

pub use cascade::RemovalOutcome;
pub use config::{EngineConfig, ObjectInitializer};
pub use container::Container;
pub use directory::{IdentityDirectory, StaticDirectory};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use transaction::Transaction;
pub use versioning::Version;

// The query vocabulary callers need to talk to containers.
pub use opal_driver::{Filter, MemoryDriver, Page, Query, SortOrder, StorageDriver};
