//! Geometry materialization for decoded and changed entities.
//!
//! Geometry is assembled in WGS84 from three lookups (node coordinates, way
//! node lists and already materialized relation geometry) and reprojected to
//! the configured target last. Missing references never fail an entity: the
//! geometry is built from whatever resolved and a [`LookupGap`] is logged.
//! A reprojection failure keeps the entity but clears its geometry.
//!
//! During an import the lookups are the off-heap caches; during updates and
//! diffs they are thin proxies over the repositories.

use std::fmt;

use geo::{Coord, Geometry, GeometryCollection, LineString, Point, Polygon};
use log::warn;
use mapsync_core::{Entity, EntityKind, Member, Node, Projection, Relation, Srid, Way};
use thiserror::Error;

use crate::repository::{Repository, RepositoryError};
use crate::rings;
use crate::store::{
    CoordinateCodec, DenseDataMap, GeometryCodec, LongListCodec, Memory, MonotonicDataMap,
    PairedDataMap, StoreError,
};

/// Failure of the storage behind a lookup.
///
/// Absent keys are not errors; they surface as `None`.
#[derive(Debug, Error)]
pub enum LookupError {
    /// An off-heap cache failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Read access to values keyed by entity id.
pub trait KeyValueLookup<V> {
    /// Value stored under `key`, if any.
    fn get(&self, key: i64) -> Result<Option<V>, LookupError>;

    /// Values for `keys`, aligned with the input.
    fn get_many(&self, keys: &[i64]) -> Result<Vec<Option<V>>, LookupError> {
        keys.iter().map(|key| self.get(*key)).collect()
    }
}

impl<M: Memory> KeyValueLookup<Coord<f64>> for DenseDataMap<CoordinateCodec, M> {
    fn get(&self, key: i64) -> Result<Option<Coord<f64>>, LookupError> {
        Ok(Self::get(self, key))
    }
}

impl<KM: Memory, VM: Memory> KeyValueLookup<Coord<f64>>
    for MonotonicDataMap<CoordinateCodec, KM, VM>
{
    fn get(&self, key: i64) -> Result<Option<Coord<f64>>, LookupError> {
        Ok(Self::get(self, key))
    }
}

impl<IM: Memory, LM: Memory> KeyValueLookup<Vec<i64>> for PairedDataMap<LongListCodec, IM, LM> {
    fn get(&self, key: i64) -> Result<Option<Vec<i64>>, LookupError> {
        Ok(Self::get(self, key)?)
    }
}

impl<IM: Memory, LM: Memory> KeyValueLookup<Geometry<f64>>
    for PairedDataMap<GeometryCodec, IM, LM>
{
    fn get(&self, key: i64) -> Result<Option<Geometry<f64>>, LookupError> {
        Ok(Self::get(self, key)?)
    }
}

/// A lookup that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl<V> KeyValueLookup<V> for NoLookup {
    fn get(&self, _key: i64) -> Result<Option<V>, LookupError> {
        Ok(None)
    }
}

/// Node coordinates read from a node repository.
#[derive(Clone, Copy)]
pub struct NodeCoordinates<'a>(pub &'a dyn Repository<Node>);

impl KeyValueLookup<Coord<f64>> for NodeCoordinates<'_> {
    fn get(&self, key: i64) -> Result<Option<Coord<f64>>, LookupError> {
        Ok(self.0.get(key)?.map(|node| coordinate(&node)))
    }

    fn get_many(&self, keys: &[i64]) -> Result<Vec<Option<Coord<f64>>>, LookupError> {
        Ok(self
            .0
            .get_many(keys)?
            .into_iter()
            .map(|node| node.map(|node| coordinate(&node)))
            .collect())
    }
}

/// Way node lists read from a way repository.
#[derive(Clone, Copy)]
pub struct WayReferences<'a>(pub &'a dyn Repository<Way>);

impl KeyValueLookup<Vec<i64>> for WayReferences<'_> {
    fn get(&self, key: i64) -> Result<Option<Vec<i64>>, LookupError> {
        Ok(self.0.get(key)?.map(|way| way.nodes))
    }
}

/// Stored relation geometry, projected back to WGS84.
#[derive(Clone, Copy)]
pub struct RelationGeometries<'a> {
    relations: &'a dyn Repository<Relation>,
    to_wgs84: Projection,
}

impl<'a> RelationGeometries<'a> {
    /// Read geometry stored in `stored` from `relations`.
    #[must_use]
    pub const fn new(relations: &'a dyn Repository<Relation>, stored: Srid) -> Self {
        Self {
            relations,
            to_wgs84: Projection::to_wgs84(stored),
        }
    }
}

impl KeyValueLookup<Geometry<f64>> for RelationGeometries<'_> {
    fn get(&self, key: i64) -> Result<Option<Geometry<f64>>, LookupError> {
        let geometry = self
            .relations
            .get(key)?
            .and_then(|relation| relation.geometry);
        Ok(geometry.and_then(|geometry| match self.to_wgs84.transform(&geometry) {
            Ok(geometry) => Some(geometry),
            Err(err) => {
                warn!("stored geometry of relation {key} cannot be read back: {err}");
                None
            }
        }))
    }
}

/// References an entity needed but no lookup could resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupGap {
    /// Kind of the entity being materialized.
    pub kind: EntityKind,
    /// Identifier of the entity being materialized.
    pub id: i64,
    /// Unresolved references.
    pub missing: Vec<(EntityKind, i64)>,
}

impl LookupGap {
    fn report(&self) {
        warn!("{self}; geometry built from the remaining references");
    }
}

impl fmt::Display for LookupGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} is missing", self.kind, self.id)?;
        for (index, (kind, id)) in self.missing.iter().enumerate() {
            let separator = if index == 0 { " " } else { ", " };
            write!(f, "{separator}{kind} {id}")?;
        }
        Ok(())
    }
}

/// Geometry of one relation member, tagged with its role.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberGeometry {
    /// The member as declared by the relation.
    pub member: Member,
    /// Resolved WGS84 geometry.
    pub geometry: Geometry<f64>,
}

/// Builds entity geometry from coordinate and reference lookups.
pub struct GeometryMaterializer<'a> {
    coordinates: &'a dyn KeyValueLookup<Coord<f64>>,
    references: &'a dyn KeyValueLookup<Vec<i64>>,
    relations: &'a dyn KeyValueLookup<Geometry<f64>>,
    projection: Projection,
}

impl fmt::Debug for GeometryMaterializer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryMaterializer")
            .field("projection", &self.projection)
            .finish_non_exhaustive()
    }
}

impl<'a> GeometryMaterializer<'a> {
    /// Create a materializer writing geometry in `target`.
    #[must_use]
    pub fn new(
        coordinates: &'a dyn KeyValueLookup<Coord<f64>>,
        references: &'a dyn KeyValueLookup<Vec<i64>>,
        relations: &'a dyn KeyValueLookup<Geometry<f64>>,
        target: Srid,
    ) -> Self {
        Self {
            coordinates,
            references,
            relations,
            projection: Projection::from_wgs84(target),
        }
    }

    /// Reference system of materialized geometry.
    #[must_use]
    pub const fn target(&self) -> Srid {
        self.projection.target()
    }

    /// The node's own coordinate.
    #[must_use]
    pub fn node_geometry(node: &Node) -> Geometry<f64> {
        Geometry::Point(Point(coordinate(node)))
    }

    /// WGS84 geometry of `way`, degraded when nodes are missing.
    ///
    /// A closed ring of at least four points is a polygon, two or more
    /// points a line string and a single point a point.
    pub fn way_geometry(&self, way: &Way) -> Result<Option<Geometry<f64>>, LookupError> {
        let resolved = self.coordinates.get_many(&way.nodes)?;
        let mut missing = Vec::new();
        let mut coords = Vec::with_capacity(resolved.len());
        for (id, coord) in way.nodes.iter().zip(resolved) {
            match coord {
                Some(coord) => coords.push(coord),
                None => missing.push((EntityKind::Node, *id)),
            }
        }
        if !missing.is_empty() {
            LookupGap {
                kind: EntityKind::Way,
                id: way.id,
                missing,
            }
            .report();
        }
        Ok(shape(coords))
    }

    /// Resolve every member of `relation` one level deep.
    ///
    /// Member relations contribute their stored geometry and are not
    /// expanded further. Unresolvable members are left out.
    pub fn resolve_members(&self, relation: &Relation) -> Result<Vec<MemberGeometry>, LookupError> {
        Ok(relation
            .members
            .iter()
            .zip(self.member_geometries(relation)?)
            .filter_map(|(member, geometry)| {
                geometry.map(|geometry| MemberGeometry {
                    member: member.clone(),
                    geometry,
                })
            })
            .collect())
    }

    /// Geometry of each member in member order, `None` where a member did
    /// not resolve.
    fn member_geometries(
        &self,
        relation: &Relation,
    ) -> Result<Vec<Option<Geometry<f64>>>, LookupError> {
        let mut resolved = Vec::with_capacity(relation.members.len());
        let mut missing = Vec::new();
        for member in &relation.members {
            let geometry = match member.kind {
                EntityKind::Node => self
                    .coordinates
                    .get(member.reference)?
                    .map(|coord| Geometry::Point(Point(coord))),
                EntityKind::Way => match self.references.get(member.reference)? {
                    Some(nodes) => self.way_geometry(&Way::new(member.reference, nodes))?,
                    None => None,
                },
                EntityKind::Relation => self.relations.get(member.reference)?,
            };
            if geometry.is_none() {
                missing.push((member.kind, member.reference));
            }
            resolved.push(geometry);
        }
        if !missing.is_empty() {
            LookupGap {
                kind: EntityKind::Relation,
                id: relation.id,
                missing,
            }
            .report();
        }
        Ok(resolved)
    }

    /// WGS84 geometry of `relation`, or `None` when no member resolves.
    ///
    /// Relations typed `multipolygon` or `boundary` assemble their way
    /// members into a polygon, or a multipolygon when several outer rings
    /// close. Other relations, and areas whose outer rings do not close,
    /// become a collection aligned with the member list: entry `i` belongs
    /// to member `i` and its role, and is an empty collection when that
    /// member did not resolve.
    pub fn relation_geometry(
        &self,
        relation: &Relation,
    ) -> Result<Option<Geometry<f64>>, LookupError> {
        let resolved = self.member_geometries(relation)?;
        if resolved.iter().all(Option::is_none) {
            return Ok(None);
        }
        if rings::is_area(relation) {
            let members: Vec<MemberGeometry> = relation
                .members
                .iter()
                .zip(&resolved)
                .filter_map(|(member, geometry)| {
                    geometry.as_ref().map(|geometry| MemberGeometry {
                        member: member.clone(),
                        geometry: geometry.clone(),
                    })
                })
                .collect();
            match rings::assemble(relation.id, &members) {
                Some(mut polygons) if polygons.0.len() == 1 => {
                    return Ok(polygons.0.pop().map(Geometry::Polygon));
                }
                Some(polygons) => return Ok(Some(Geometry::MultiPolygon(polygons))),
                None => warn!(
                    "relation {} has no closed outer ring; keeping its members as a collection",
                    relation.id
                ),
            }
        }
        Ok(Some(Geometry::GeometryCollection(GeometryCollection::new_from(
            resolved
                .into_iter()
                .map(|geometry| {
                    geometry.unwrap_or_else(|| {
                        Geometry::GeometryCollection(GeometryCollection::new_from(Vec::new()))
                    })
                })
                .collect(),
        ))))
    }

    /// WGS84 geometry of any entity.
    pub fn wgs84_geometry(&self, entity: &Entity) -> Result<Option<Geometry<f64>>, LookupError> {
        match entity {
            Entity::Node(node) => Ok(Some(Self::node_geometry(node))),
            Entity::Way(way) => self.way_geometry(way),
            Entity::Relation(relation) => self.relation_geometry(relation),
        }
    }

    /// Reproject WGS84 `geometry` to the target, or `None` with a warning
    /// when a coordinate cannot be represented.
    #[must_use]
    pub fn reproject(
        &self,
        kind: EntityKind,
        id: i64,
        geometry: &Geometry<f64>,
    ) -> Option<Geometry<f64>> {
        match self.projection.transform(geometry) {
            Ok(projected) => Some(projected),
            Err(err) => {
                warn!("dropping geometry of {kind} {id}: {err}");
                None
            }
        }
    }

    /// Set the node's target geometry.
    pub fn materialize_node(&self, node: &mut Node) {
        node.geometry = self.reproject(EntityKind::Node, node.id, &Self::node_geometry(node));
    }

    /// Set the way's target geometry.
    pub fn materialize_way(&self, way: &mut Way) -> Result<(), LookupError> {
        way.geometry = self
            .way_geometry(way)?
            .and_then(|geometry| self.reproject(EntityKind::Way, way.id, &geometry));
        Ok(())
    }

    /// Set the relation's target geometry.
    pub fn materialize_relation(&self, relation: &mut Relation) -> Result<(), LookupError> {
        relation.geometry = self
            .relation_geometry(relation)?
            .and_then(|geometry| self.reproject(EntityKind::Relation, relation.id, &geometry));
        Ok(())
    }

    /// Set the entity's target geometry.
    pub fn materialize(&self, entity: &mut Entity) -> Result<(), LookupError> {
        match entity {
            Entity::Node(node) => {
                self.materialize_node(node);
                Ok(())
            }
            Entity::Way(way) => self.materialize_way(way),
            Entity::Relation(relation) => self.materialize_relation(relation),
        }
    }
}

const fn coordinate(node: &Node) -> Coord<f64> {
    Coord {
        x: node.lon,
        y: node.lat,
    }
}

fn shape(mut coords: Vec<Coord<f64>>) -> Option<Geometry<f64>> {
    match coords.len() {
        0 => None,
        1 => coords.pop().map(|coord| Geometry::Point(Point(coord))),
        len => {
            let line = LineString::new(coords);
            if len >= 4 && line.is_closed() {
                Some(Geometry::Polygon(Polygon::new(line, Vec::new())))
            } else {
                Some(Geometry::LineString(line))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryDatabase;
    use crate::store::HeapMemory;
    use geo::{line_string, polygon};
    use rstest::{fixture, rstest};

    struct Caches {
        coordinates: DenseDataMap<CoordinateCodec, HeapMemory>,
        references: PairedDataMap<LongListCodec, HeapMemory, HeapMemory>,
    }

    #[fixture]
    fn caches() -> Caches {
        let mut coordinates =
            DenseDataMap::new(CoordinateCodec, HeapMemory::default()).expect("coordinates");
        for (id, x, y) in [(1, 0.0, 0.0), (2, 1.0, 0.0), (3, 1.0, 1.0), (5, 3.0, 3.0)] {
            coordinates.put(id, &Coord { x, y }).expect("put");
        }
        let mut references =
            PairedDataMap::new(LongListCodec, HeapMemory::default(), HeapMemory::default())
                .expect("references");
        references.put(10, &vec![1, 2, 3, 1]).expect("put");
        references.put(11, &vec![2, 3]).expect("put");
        Caches {
            coordinates,
            references,
        }
    }

    fn materializer(caches: &Caches, target: Srid) -> GeometryMaterializer<'_> {
        GeometryMaterializer::new(&caches.coordinates, &caches.references, &NoLookup, target)
    }

    #[rstest]
    #[case(vec![1, 2, 3, 1], Some(Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)])))]
    #[case(vec![1, 2, 3], Some(Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0)])))]
    #[case(vec![1, 2, 1], Some(Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 0.0, y: 0.0)])))]
    #[case(vec![5], Some(Geometry::Point(Point::new(3.0, 3.0))))]
    #[case(vec![], None)]
    fn way_shapes_follow_the_resolved_points(
        caches: Caches,
        #[case] nodes: Vec<i64>,
        #[case] expected: Option<Geometry<f64>>,
    ) {
        let geometry = materializer(&caches, Srid::Wgs84)
            .way_geometry(&Way::new(1, nodes))
            .expect("lookup");
        assert_eq!(geometry, expected);
    }

    #[rstest]
    fn missing_nodes_degrade_the_way(caches: Caches) {
        let geometry = materializer(&caches, Srid::Wgs84)
            .way_geometry(&Way::new(1, vec![1, 99, 2]))
            .expect("lookup");
        assert_eq!(
            geometry,
            Some(Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0)]))
        );
    }

    #[rstest]
    fn relation_members_resolve_one_level_with_roles(caches: Caches) {
        let relation = Relation::new(
            20,
            vec![
                Member::new(10, EntityKind::Way, "outer"),
                Member::new(5, EntityKind::Node, "label"),
                Member::new(77, EntityKind::Way, "inner"),
                Member::new(30, EntityKind::Relation, "subarea"),
            ],
        );
        let members = materializer(&caches, Srid::Wgs84)
            .resolve_members(&relation)
            .expect("lookup");
        let roles: Vec<&str> = members.iter().map(|member| member.member.role.as_str()).collect();
        assert_eq!(roles, vec!["outer", "label"]);
        assert!(matches!(members.first().map(|m| &m.geometry), Some(Geometry::Polygon(_))));
    }

    #[rstest]
    fn relation_collections_stay_aligned_with_member_roles(caches: Caches) {
        let relation = Relation::new(
            21,
            vec![
                Member::new(10, EntityKind::Way, "outer"),
                Member::new(77, EntityKind::Way, "inner"),
                Member::new(5, EntityKind::Node, "label"),
            ],
        );
        let geometry = materializer(&caches, Srid::Wgs84)
            .relation_geometry(&relation)
            .expect("lookup");
        let Some(Geometry::GeometryCollection(collection)) = geometry else {
            panic!("expected a collection, found {geometry:?}");
        };
        assert_eq!(collection.0.len(), relation.members.len());
        assert!(matches!(collection.0.first(), Some(Geometry::Polygon(_))));
        assert_eq!(
            collection.0.get(1),
            Some(&Geometry::GeometryCollection(GeometryCollection::new_from(Vec::new())))
        );
        assert_eq!(collection.0.get(2), Some(&Geometry::Point(Point::new(3.0, 3.0))));
    }

    #[rstest]
    fn multipolygon_relations_assemble_rings_with_holes() {
        let mut coordinates =
            DenseDataMap::new(CoordinateCodec, HeapMemory::default()).expect("coordinates");
        let corners = [
            (1, 0.0, 0.0),
            (2, 10.0, 0.0),
            (3, 10.0, 10.0),
            (4, 0.0, 10.0),
            (5, 2.0, 2.0),
            (6, 4.0, 2.0),
            (7, 4.0, 4.0),
            (8, 2.0, 4.0),
        ];
        for (id, x, y) in corners {
            coordinates.put(id, &Coord { x, y }).expect("put");
        }
        let mut references =
            PairedDataMap::new(LongListCodec, HeapMemory::default(), HeapMemory::default())
                .expect("references");
        references.put(40, &vec![1, 2, 3]).expect("put");
        references.put(41, &vec![3, 4, 1]).expect("put");
        references.put(42, &vec![5, 6, 7, 8, 5]).expect("put");
        let mut relation = Relation::new(
            50,
            vec![
                Member::new(40, EntityKind::Way, "outer"),
                Member::new(41, EntityKind::Way, "outer"),
                Member::new(42, EntityKind::Way, "inner"),
                Member::new(9, EntityKind::Node, "label"),
            ],
        );
        relation.tags.insert("type".to_owned(), "multipolygon".to_owned());
        let geometry = GeometryMaterializer::new(&coordinates, &references, &NoLookup, Srid::Wgs84)
            .relation_geometry(&relation)
            .expect("lookup");
        let Some(Geometry::Polygon(polygon)) = geometry else {
            panic!("expected a polygon, found {geometry:?}");
        };
        assert_eq!(polygon.exterior().0.len(), 5);
        assert!(polygon.exterior().is_closed());
        assert_eq!(polygon.interiors().len(), 1);
    }

    #[rstest]
    fn areas_without_a_closed_ring_fall_back_to_a_collection(caches: Caches) {
        let mut relation = Relation::new(22, vec![Member::new(11, EntityKind::Way, "outer")]);
        relation.tags.insert("type".to_owned(), "boundary".to_owned());
        let geometry = materializer(&caches, Srid::Wgs84)
            .relation_geometry(&relation)
            .expect("lookup");
        assert_eq!(
            geometry,
            Some(Geometry::GeometryCollection(GeometryCollection::new_from(vec![
                Geometry::LineString(line_string![(x: 1.0, y: 0.0), (x: 1.0, y: 1.0)])
            ])))
        );
    }

    #[rstest]
    fn relation_members_come_from_the_relation_lookup(caches: Caches) {
        let mut relations =
            PairedDataMap::new(GeometryCodec, HeapMemory::default(), HeapMemory::default())
                .expect("relations");
        relations
            .put(30, &Geometry::Point(Point::new(4.0, 4.0)))
            .expect("put");
        let materializer = GeometryMaterializer::new(
            &caches.coordinates,
            &caches.references,
            &relations,
            Srid::Wgs84,
        );
        let geometry = materializer
            .relation_geometry(&Relation::new(
                31,
                vec![Member::new(30, EntityKind::Relation, "")],
            ))
            .expect("lookup");
        assert_eq!(
            geometry,
            Some(Geometry::GeometryCollection(GeometryCollection::new_from(vec![
                Geometry::Point(Point::new(4.0, 4.0))
            ])))
        );
    }

    #[rstest]
    fn reprojection_failure_clears_geometry_but_keeps_tags(caches: Caches) {
        let mut node = Node::new(1, f64::NAN, 0.0);
        node.tags.insert("name".to_owned(), "nowhere".to_owned());
        materializer(&caches, Srid::WebMercator).materialize_node(&mut node);
        assert!(node.geometry.is_none());
        assert_eq!(node.tags.get("name").map(String::as_str), Some("nowhere"));
    }

    #[rstest]
    fn repository_proxies_feed_the_materializer() {
        let database = MemoryDatabase::default();
        database
            .nodes
            .put_many(&[Node::new(1, 0.0, 0.0), Node::new(2, 2.0, 2.0)])
            .expect("nodes");
        database.ways.put(&Way::new(3, vec![1, 2])).expect("way");
        let coordinates = NodeCoordinates(&database.nodes);
        let references = WayReferences(&database.ways);
        let relations = RelationGeometries::new(&database.relations, Srid::Wgs84);
        let materializer =
            GeometryMaterializer::new(&coordinates, &references, &relations, Srid::Wgs84);
        let mut entity = Entity::Relation(Relation::new(
            4,
            vec![Member::new(3, EntityKind::Way, "route")],
        ));
        materializer.materialize(&mut entity).expect("materialize");
        assert_eq!(
            entity.geometry(),
            Some(&Geometry::GeometryCollection(GeometryCollection::new_from(vec![
                Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0)])
            ])))
        );
    }

    #[rstest]
    fn gaps_render_every_missing_reference() {
        let gap = LookupGap {
            kind: EntityKind::Way,
            id: 7,
            missing: vec![(EntityKind::Node, 1), (EntityKind::Node, 2)],
        };
        assert_eq!(gap.to_string(), "way 7 is missing node 1, node 2");
    }
}
