//! Ring assembly for area relations.
//!
//! Way members are split by role into outer and inner pieces. Closed pieces
//! are rings already; open pieces are joined end to end until they close.
//! Members without a role become holes when an outer ring contains them and
//! outer rings otherwise. Each hole is given to the first outer ring that
//! contains it.

use geo::{Contains, Coord, Geometry, LineString, MultiPolygon, Polygon};
use log::warn;
use mapsync_core::{EntityKind, Relation};

use crate::geometry::MemberGeometry;

/// Whether `relation` describes an area built from rings.
pub(crate) fn is_area(relation: &Relation) -> bool {
    matches!(
        relation.tags.get("type").map(String::as_str),
        Some("multipolygon" | "boundary")
    )
}

/// Assemble the way members of an area relation into polygons.
///
/// Returns `None` when no outer ring closes.
pub(crate) fn assemble(
    relation_id: i64,
    members: &[MemberGeometry],
) -> Option<MultiPolygon<f64>> {
    let mut outer = Vec::new();
    let mut inner = Vec::new();
    let mut unassigned = Vec::new();
    for member in members {
        if member.member.kind != EntityKind::Way {
            continue;
        }
        let Some(piece) = piece(&member.geometry) else {
            continue;
        };
        match member.member.role.as_str() {
            "outer" => outer.push(piece),
            "inner" => inner.push(piece),
            "" => unassigned.push(piece),
            _ => {}
        }
    }

    let mut shells: Vec<Polygon<f64>> = close(relation_id, outer)
        .into_iter()
        .map(|ring| Polygon::new(ring, Vec::new()))
        .collect();
    let mut holes = close(relation_id, inner);
    for ring in close(relation_id, unassigned) {
        let candidate = Polygon::new(ring.clone(), Vec::new());
        if shells.iter().any(|shell| shell.contains(&candidate)) {
            holes.push(ring);
        } else {
            shells.push(candidate);
        }
    }
    if shells.is_empty() {
        return None;
    }

    let mut polygons = Vec::with_capacity(shells.len());
    for shell in shells {
        let (inside, outside): (Vec<_>, Vec<_>) = holes
            .into_iter()
            .partition(|hole| shell.contains(&Polygon::new(hole.clone(), Vec::new())));
        holes = outside;
        let (exterior, _) = shell.into_inner();
        polygons.push(Polygon::new(exterior, inside));
    }
    if !holes.is_empty() {
        warn!(
            "relation {relation_id}: dropping {} inner ring(s) outside every outer ring",
            holes.len()
        );
    }
    Some(MultiPolygon::new(polygons))
}

/// Coordinates a way member contributes to a ring.
fn piece(geometry: &Geometry<f64>) -> Option<Vec<Coord<f64>>> {
    match geometry {
        Geometry::LineString(line) => Some(line.0.clone()),
        Geometry::Polygon(polygon) => Some(polygon.exterior().0.clone()),
        _ => None,
    }
}

/// Join `pieces` into closed rings, dropping what does not close.
fn close(relation_id: i64, mut pieces: Vec<Vec<Coord<f64>>>) -> Vec<LineString<f64>> {
    pieces.reverse();
    let mut rings = Vec::new();
    let mut open = 0_usize;
    while let Some(mut ring) = pieces.pop() {
        while !is_closed(&ring) {
            let Some(next) = take_adjoining(&mut pieces, &ring) else {
                break;
            };
            ring.extend(next.into_iter().skip(1));
        }
        if is_closed(&ring) && ring.len() >= 4 {
            rings.push(LineString::new(ring));
        } else {
            open += 1;
        }
    }
    if open > 0 {
        warn!("relation {relation_id}: {open} way chain(s) do not close into a ring");
    }
    rings
}

fn is_closed(coords: &[Coord<f64>]) -> bool {
    coords.len() > 1 && coords.first() == coords.last()
}

/// Remove the piece continuing `ring` from its last coordinate, oriented to
/// start there.
fn take_adjoining(
    pieces: &mut Vec<Vec<Coord<f64>>>,
    ring: &[Coord<f64>],
) -> Option<Vec<Coord<f64>>> {
    let end = ring.last()?;
    let position = pieces
        .iter()
        .position(|piece| piece.first() == Some(end) || piece.last() == Some(end))?;
    let mut piece = pieces.swap_remove(position);
    if piece.first() != Some(end) {
        piece.reverse();
    }
    Some(piece)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use mapsync_core::Member;
    use rstest::rstest;

    fn way(role: &str, geometry: Geometry<f64>) -> MemberGeometry {
        MemberGeometry {
            member: Member::new(1, EntityKind::Way, role),
            geometry,
        }
    }

    fn line(points: &[(f64, f64)]) -> Geometry<f64> {
        Geometry::LineString(points.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    fn square(min: f64, max: f64) -> Geometry<f64> {
        line(&[(min, min), (max, min), (max, max), (min, max), (min, min)])
    }

    #[rstest]
    fn split_outer_ways_are_joined_into_one_ring() {
        let members = [
            way("outer", line(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0)])),
            way("outer", line(&[(0.0, 0.0), (0.0, 4.0), (4.0, 4.0)])),
        ];
        let assembled = assemble(1, &members).expect("ring closes");
        assert_eq!(assembled.0.len(), 1);
        let exterior = assembled.0.first().expect("polygon").exterior();
        assert!(exterior.is_closed());
        assert_eq!(exterior.0.len(), 5);
    }

    #[rstest]
    fn inner_rings_become_holes_of_their_outer_ring() {
        let members = [
            way("outer", square(0.0, 10.0)),
            way("outer", square(20.0, 30.0)),
            way("inner", square(22.0, 24.0)),
            way("", square(2.0, 3.0)),
        ];
        let assembled = assemble(1, &members).expect("rings close");
        let holes: Vec<usize> = assembled
            .0
            .iter()
            .map(|polygon| polygon.interiors().len())
            .collect();
        assert_eq!(holes, vec![1, 1]);
    }

    #[rstest]
    fn unclosed_outer_chains_yield_nothing() {
        let members = [
            way("outer", line(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0)])),
            way("label", Geometry::Point(Point::new(1.0, 1.0))),
        ];
        assert!(assemble(1, &members).is_none());
    }

    #[rstest]
    #[case("multipolygon", true)]
    #[case("boundary", true)]
    #[case("route", false)]
    fn area_relations_are_recognised_by_type(#[case] kind: &str, #[case] expected: bool) {
        let mut relation = Relation::new(1, Vec::new());
        relation.tags.insert("type".to_owned(), kind.to_owned());
        assert_eq!(is_area(&relation), expected);
    }
}
