//! Foundation types for Opal, the object persistence abstraction layer.
//!
//! This crate provides the identity, temporal, and element-value types used
//! throughout the engine. Every other Opal crate depends on `opal-types`.
//!
//! # Key Types
//!
//! - [`ObjectId`] — 128-bit time-ordered object identity (UUID v7)
//! - [`Timestamp`] — hybrid wall-clock / logical-counter instant
//! - [`Value`] / [`ValueKind`] — typed element payloads
//! - [`TypeName`] / [`FieldKey`] / [`FieldPath`] — schema naming
//! - [`EdgeKind`] / [`RemovalBehavior`] — reference-field semantics
//! - [`SecurityModel`] — permission enforcement mode of an engine

pub mod behavior;
pub mod error;
pub mod id;
pub mod name;
pub mod temporal;
pub mod value;

pub use behavior::{EdgeKind, RemovalBehavior, RemoveOnUpdate, SecurityModel};
pub use error::TypeError;
pub use id::{EngineId, ObjectId, UserId};
pub use name::{FieldKey, FieldPath, TypeName};
pub use temporal::{AuditStamp, Clock, Timestamp};
pub use value::{Value, ValueKind};
