//! Core domain types for the mapsync engine.
//!
//! This crate has no I/O. It defines the entity model shared by the snapshot
//! decoder, the changeset applier and the repositories, together with the
//! tile pyramid arithmetic and the reprojection used to place geometry on
//! that pyramid.

mod change;
mod entity;
mod header;
pub mod projection;
pub mod tile;

pub use change::{Change, ChangeKind, Element};
pub use entity::{Entity, EntityKind, Info, Member, Node, Relation, Tags, Way};
pub use header::{Bound, Header};
pub use projection::{Projection, ProjectionError, Srid};
pub use tile::{MAX_ZOOM, TileCoord, TileError, TileRange};
