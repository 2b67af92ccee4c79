//! Statically declared type registry for Opal.
//!
//! Persistent types are described up front with [`TypeDescriptor`]s and
//! collected into an immutable [`SchemaRegistry`]. The registry answers the
//! questions the engine would otherwise need runtime reflection for: which
//! fields a type carries (its own and its ancestors'), which concrete types
//! belong to a type's family, and which types are reachable from a set of
//! roots through declared reference fields.
//!
//! # Key Types
//!
//! - [`FieldDescriptor`] / [`FieldShape`] — one field of a persistent type
//! - [`TypeDescriptor`] — a persistent type: fields, parent, rename fallback
//! - [`SchemaRegistry`] — validated, immutable collection of all types
//! - [`builtin`] — the pre-seeded `group` / `allowed-groups` types

pub mod builtin;
pub mod descriptor;
pub mod error;
pub mod registry;

pub use descriptor::{FieldDescriptor, FieldShape, TypeDescriptor};
pub use error::{SchemaError, SchemaResult};
pub use registry::{SchemaBuilder, SchemaRegistry};
