//! Facade crate for the mapsync engine.
//!
//! This crate re-exports the core entity model, tile indexer and projection
//! types, and exposes the snapshot import, changeset replication and tile
//! diff orchestrators behind the `data` feature.

#![forbid(unsafe_code)]

pub use mapsync_core::{
    Bound, Change, ChangeKind, Element, Entity, EntityKind, Header, Info, MAX_ZOOM, Member, Node,
    Projection, ProjectionError, Relation, Srid, Tags, TileCoord, TileError, TileRange, Way,
};

#[cfg(feature = "data")]
pub use mapsync_data::{
    CacheStrategy, DiffError, DiffOptions, GeometryMaterializer, ImportError, ImportOptions,
    ImportSummary, LookupGap, Repositories, RepositoryError, SqliteDatabase, UpdateError,
    UpdateSummary, apply_changeset, catch_up, diff, import_snapshot, update,
};
