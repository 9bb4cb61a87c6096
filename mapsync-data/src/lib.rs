//! Data access and synchronisation logic for the mapsync engine.
//!
//! Responsibilities:
//! - Decode snapshot files in parallel, preserving block order.
//! - Cache coordinates and references off-heap for the length of an import.
//! - Materialize and reproject entity geometry.
//! - Import snapshots, apply replication changesets and compute their tile
//!   footprint.
//! - Provide repository adapters for memory and SQLite.
//!
//! Boundaries:
//! - Do not encode domain types or tile arithmetic (live in `mapsync-core`).
//! - Changesets are applied strictly one after another.
//!
//! Invariants:
//! - The replication checkpoint only ever advances after the data it covers
//!   has been written.
//! - Decode failures end a stream; no partial block is surfaced.
#![deny(unsafe_code)]

pub mod diff;
pub mod geometry;
pub mod import;
pub mod pbf;
pub mod pipeline;
pub mod replication;
pub mod repository;
mod rings;
pub mod store;
pub mod update;

pub use diff::{DiffError, DiffOptions, diff};
pub use geometry::{GeometryMaterializer, LookupGap};
pub use import::{CacheStrategy, ImportError, ImportOptions, ImportSummary, import_snapshot};
pub use repository::{Repositories, RepositoryError, SqliteDatabase};
pub use update::{UpdateError, UpdateSummary, apply_changeset, catch_up, update};
