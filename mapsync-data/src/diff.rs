//! Tiles touched by a changeset.
//!
//! For every changed element the geometry before the edit (as stored) and
//! after it (as carried by the change) is mapped onto tiles at one zoom
//! level. Run a diff before applying the changeset, while the repositories
//! still hold the previous state.

use std::collections::BTreeSet;

use geo::{BoundingRect, Geometry};
use log::{debug, warn};
use mapsync_core::{
    Change, ChangeKind, Entity, EntityKind, Projection, Srid, TileCoord, TileError,
};
use thiserror::Error;

use crate::geometry::{
    GeometryMaterializer, LookupError, NodeCoordinates, RelationGeometries, WayReferences,
};
use crate::repository::{Repositories, RepositoryError};

/// Zoom level used when none is configured.
pub const DEFAULT_ZOOM: u8 = 14;

/// Tuning for [`diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    zoom: u8,
    target: Srid,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            target: Srid::default(),
        }
    }
}

impl DiffOptions {
    /// Zoom level of the reported tiles.
    #[must_use]
    pub const fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    /// Reference system of the stored geometry.
    #[must_use]
    pub const fn with_target(mut self, target: Srid) -> Self {
        self.target = target;
        self
    }

    /// Zoom level of the reported tiles.
    #[must_use]
    pub const fn zoom(&self) -> u8 {
        self.zoom
    }
}

/// Errors returned while computing a diff.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiffError {
    /// Reading the current state failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// A geometry lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// The configured zoom is not addressable.
    #[error(transparent)]
    Tile(#[from] TileError),
}

/// Tiles at the configured zoom whose content `changes` alter, ordered by
/// linear tile index.
///
/// # Examples
/// ```
/// use mapsync_core::{Change, ChangeKind, Entity, Node, Srid};
/// use mapsync_data::diff::{DiffOptions, diff};
/// use mapsync_data::repository::MemoryDatabase;
///
/// let database = MemoryDatabase::default();
/// let changes = [Change::new(ChangeKind::Create, vec![Entity::Node(Node::new(1, 0.0, 0.0))])];
/// let options = DiffOptions::default().with_zoom(1).with_target(Srid::Wgs84);
/// let tiles = diff(database.repositories(), &changes, &options)?;
/// assert_eq!(tiles.len(), 1);
/// # Ok::<(), mapsync_data::diff::DiffError>(())
/// ```
pub fn diff(
    repositories: Repositories<'_>,
    changes: &[Change],
    options: &DiffOptions,
) -> Result<BTreeSet<TileCoord>, DiffError> {
    let coordinates = NodeCoordinates(repositories.nodes);
    let references = WayReferences(repositories.ways);
    let relations = RelationGeometries::new(repositories.relations, options.target);
    let materializer =
        GeometryMaterializer::new(&coordinates, &references, &relations, Srid::Wgs84);
    let to_wgs84 = Projection::to_wgs84(options.target);

    let mut tiles = BTreeSet::new();
    for change in changes {
        for element in &change.elements {
            if let Some(before) = stored(repositories, element.kind(), element.id())? {
                let geometry = match before.geometry() {
                    Some(geometry) => readable(&to_wgs84, &before, geometry),
                    None => materializer.wgs84_geometry(&before)?,
                };
                cover(&mut tiles, geometry.as_ref(), options.zoom)?;
            }
            if change.kind != ChangeKind::Delete {
                let after = materializer.wgs84_geometry(element)?;
                cover(&mut tiles, after.as_ref(), options.zoom)?;
            }
        }
    }
    debug!("changeset touches {} tiles at zoom {}", tiles.len(), options.zoom);
    Ok(tiles)
}

fn stored(
    repositories: Repositories<'_>,
    kind: EntityKind,
    id: i64,
) -> Result<Option<Entity>, RepositoryError> {
    Ok(match kind {
        EntityKind::Node => repositories.nodes.get(id)?.map(Entity::Node),
        EntityKind::Way => repositories.ways.get(id)?.map(Entity::Way),
        EntityKind::Relation => repositories.relations.get(id)?.map(Entity::Relation),
    })
}

fn readable(
    to_wgs84: &Projection,
    entity: &Entity,
    geometry: &Geometry<f64>,
) -> Option<Geometry<f64>> {
    match to_wgs84.transform(geometry) {
        Ok(geometry) => Some(geometry),
        Err(err) => {
            warn!(
                "stored geometry of {} {} cannot be read back: {err}",
                entity.kind(),
                entity.id()
            );
            None
        }
    }
}

fn cover(
    tiles: &mut BTreeSet<TileCoord>,
    geometry: Option<&Geometry<f64>>,
    zoom: u8,
) -> Result<(), TileError> {
    let Some(envelope) = geometry.and_then(|geometry| geometry.bounding_rect()) else {
        return Ok(());
    };
    match TileCoord::range(envelope, zoom) {
        Ok(range) => {
            tiles.extend(range);
            Ok(())
        }
        Err(TileError::NonFinite { lon, lat }) => {
            warn!("ignoring geometry with non-finite coordinate ({lon}, {lat})");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryDatabase, Repository};
    use mapsync_core::{Member, Node, Relation, Way};
    use rstest::{fixture, rstest};

    #[fixture]
    fn database() -> MemoryDatabase {
        MemoryDatabase::default()
    }

    fn tile(x: u32, y: u32, z: u8) -> TileCoord {
        TileCoord::new(x, y, z).expect("tile")
    }

    #[rstest]
    fn moved_nodes_touch_the_old_and_new_tiles(database: MemoryDatabase) {
        database.nodes.put(&Node::new(1, 0.0, 0.0)).expect("node");
        let changes = [Change::new(
            ChangeKind::Modify,
            vec![Entity::Node(Node::new(1, 10.0, 10.0))],
        )];
        let options = DiffOptions::default().with_zoom(4).with_target(Srid::Wgs84);
        let tiles = diff(database.repositories(), &changes, &options).expect("diff");
        assert_eq!(tiles, BTreeSet::from([tile(8, 8, 4), tile(8, 7, 4)]));
    }

    #[rstest]
    fn stored_mercator_geometry_is_read_back(database: MemoryDatabase) {
        let mut node = Node::new(1, 0.0, 0.0);
        node.geometry = Projection::from_wgs84(Srid::WebMercator)
            .transform(&GeometryMaterializer::node_geometry(&Node::new(1, 100.0, 40.0)))
            .ok();
        database.nodes.put(&node).expect("node");
        let changes = [Change::new(
            ChangeKind::Delete,
            vec![Entity::Node(Node::new(1, f64::NAN, f64::NAN))],
        )];
        let options = DiffOptions::default().with_zoom(2);
        let tiles = diff(database.repositories(), &changes, &options).expect("diff");
        assert_eq!(
            tiles,
            BTreeSet::from([TileCoord::from_lon_lat(100.0, 40.0, 2).expect("tile")])
        );
    }

    #[rstest]
    fn ways_cover_every_tile_under_their_envelope(database: MemoryDatabase) {
        database
            .nodes
            .put_many(&[Node::new(1, -10.0, -10.0), Node::new(2, 10.0, 10.0)])
            .expect("nodes");
        let changes = [Change::new(
            ChangeKind::Create,
            vec![Entity::Way(Way::new(3, vec![1, 2]))],
        )];
        let options = DiffOptions::default().with_zoom(1).with_target(Srid::Wgs84);
        let tiles = diff(database.repositories(), &changes, &options).expect("diff");
        assert_eq!(tiles.len(), 4);
    }

    #[rstest]
    fn relation_changes_cover_their_assembled_geometry_only(database: MemoryDatabase) {
        database
            .nodes
            .put_many(&[
                Node::new(1, 10.0, 10.0),
                Node::new(2, 10.5, 10.5),
                Node::new(9, -100.0, -40.0),
            ])
            .expect("nodes");
        database.ways.put(&Way::new(3, vec![1, 2])).expect("way");
        let relation = Relation::new(4, vec![Member::new(3, EntityKind::Way, "")]);
        let changes = [Change::new(
            ChangeKind::Modify,
            vec![Entity::Relation(relation)],
        )];
        let options = DiffOptions::default().with_zoom(4).with_target(Srid::Wgs84);
        let tiles = diff(database.repositories(), &changes, &options).expect("diff");
        assert_eq!(tiles, BTreeSet::from([tile(8, 7, 4)]));
    }

    #[rstest]
    fn deletes_of_unknown_entities_touch_nothing(database: MemoryDatabase) {
        let changes = [Change::new(
            ChangeKind::Delete,
            vec![Entity::Way(Way::new(3, vec![1, 2]))],
        )];
        let tiles =
            diff(database.repositories(), &changes, &DiffOptions::default()).expect("diff");
        assert!(tiles.is_empty());
    }

    #[rstest]
    fn unaddressable_zooms_are_rejected(database: MemoryDatabase) {
        let changes = [Change::new(
            ChangeKind::Create,
            vec![Entity::Node(Node::new(1, 0.0, 0.0))],
        )];
        let options = DiffOptions::default().with_zoom(31);
        assert!(matches!(
            diff(database.repositories(), &changes, &options),
            Err(DiffError::Tile(TileError::ZoomOutOfRange { z: 31 }))
        ));
    }
}
