//! Persistent objects: the in-memory entity model of Opal.
//!
//! A [`PersistentObject`] is a typed bag of change-tracked [`Field`]s plus
//! the lifecycle state the engine manages: audit stamps, provenance, the
//! reserved allowed-groups reference, and the removal marker. Objects are
//! shared within one engine as [`SharedObject`] handles; they never hold a
//! reference back to the engine.
//!
//! # Key Types
//!
//! - [`Field`] — one element / reference field with `changed` and
//!   `retrieved` state
//! - [`PersistentObject`] — identity, lifecycle, fields, change listener
//! - [`SharedObject`] — `Rc<RefCell<PersistentObject>>` handle
//! - [`groups`] — typed accessors for the built-in permission types

pub mod error;
pub mod field;
pub mod groups;
pub mod object;

pub use error::{ObjectError, ObjectResult};
pub use field::{Field, FieldPayload};
pub use object::{Origin, PersistentObject, SharedListener, SharedObject};
