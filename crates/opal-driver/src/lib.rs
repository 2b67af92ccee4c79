//! The storage boundary of Opal.
//!
//! The engine never talks to a database directly; it talks to a
//! [`StorageDriver`]. The driver owns physical containers of
//! [`ObjectRecord`]s, answers filtered queries, keeps the permanent record
//! of deleted IDs, and accumulates [`PotentialBrokenReferences`] for the
//! engine's end-of-cascade validation.
//!
//! [`MemoryDriver`] is the complete in-memory reference implementation;
//! every engine test runs against it.
//!
//! # Key Types
//!
//! - [`StorageDriver`] — the backend contract
//! - [`ObjectRecord`] — one stored row
//! - [`Filter`] / [`Query`] / [`SortOrder`] / [`Page`] — the query model
//! - [`ContainerInfo`] — physical container description
//! - [`MemoryDriver`] — reference backend with snapshot transactions

pub mod error;
pub mod filter;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{DriverError, DriverResult};
pub use filter::{apply_page, sort_records, Filter, Page, Query, SortDirection, SortOrder};
pub use memory::MemoryDriver;
pub use record::ObjectRecord;
pub use traits::{BrokenReference, ContainerInfo, PotentialBrokenReferences, StorageDriver};
