//! Map entities decoded from snapshots or carried by changesets.
//!
//! Nodes, ways and relations share an identifier space per kind, a metadata
//! [`Info`] record and free-form [`Tags`]. Geometry is optional: it is filled
//! in by the materializer once coordinates and references are resolved.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use geo::Geometry;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// OpenStreetMap-style key/value tags.
pub type Tags = HashMap<String, String>;

/// Discriminates the three entity kinds.
///
/// The same type doubles as the member type of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EntityKind {
    /// A single coordinate.
    Node,
    /// An ordered list of node references.
    Way,
    /// An ordered list of typed members with roles.
    Relation,
}

impl EntityKind {
    /// Lowercase label used in logs, tables and change documents.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }

    /// Parse the lowercase label produced by [`EntityKind::as_str`].
    ///
    /// # Examples
    /// ```
    /// use mapsync_core::EntityKind;
    ///
    /// assert_eq!(EntityKind::parse("way"), Some(EntityKind::Way));
    /// assert_eq!(EntityKind::parse("area"), None);
    /// ```
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "node" => Some(Self::Node),
            "way" => Some(Self::Way),
            "relation" => Some(Self::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edit metadata attached to every entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Info {
    /// Entity version; non-decreasing across writes to the same id.
    pub version: i32,
    /// Time of the last edit, when the source carried one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Changeset that produced this version.
    pub changeset: i64,
    /// Identifier of the author.
    pub uid: i32,
}

/// A point entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node identifier.
    pub id: i64,
    /// Edit metadata.
    pub info: Info,
    /// Free-form tags.
    pub tags: Tags,
    /// WGS84 longitude in degrees.
    pub lon: f64,
    /// WGS84 latitude in degrees.
    pub lat: f64,
    /// Materialized geometry in the target reference system.
    pub geometry: Option<Geometry<f64>>,
}

impl Node {
    /// Construct a node without tags or geometry.
    ///
    /// # Examples
    /// ```
    /// use mapsync_core::Node;
    ///
    /// let node = Node::new(7, 13.4, 52.5);
    /// assert_eq!(node.id, 7);
    /// assert!(node.geometry.is_none());
    /// ```
    #[must_use]
    pub fn new(id: i64, lon: f64, lat: f64) -> Self {
        Self {
            id,
            info: Info::default(),
            tags: Tags::new(),
            lon,
            lat,
            geometry: None,
        }
    }
}

/// An ordered sequence of node references.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    /// Way identifier.
    pub id: i64,
    /// Edit metadata.
    pub info: Info,
    /// Free-form tags.
    pub tags: Tags,
    /// Member node identifiers in traversal order.
    pub nodes: Vec<i64>,
    /// Materialized geometry in the target reference system.
    pub geometry: Option<Geometry<f64>>,
}

impl Way {
    /// Construct a way from its node references.
    #[must_use]
    pub fn new(id: i64, nodes: Vec<i64>) -> Self {
        Self {
            id,
            info: Info::default(),
            tags: Tags::new(),
            nodes,
            geometry: None,
        }
    }
}

/// A typed, role-annotated reference held by a [`Relation`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Member {
    /// Identifier of the referenced entity.
    pub reference: i64,
    /// Kind of the referenced entity.
    pub kind: EntityKind,
    /// Role of the member within the relation (may be empty).
    pub role: String,
}

impl Member {
    /// Construct a member reference.
    pub fn new(reference: i64, kind: EntityKind, role: impl Into<String>) -> Self {
        Self {
            reference,
            kind,
            role: role.into(),
        }
    }
}

/// An ordered collection of members.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// Relation identifier.
    pub id: i64,
    /// Edit metadata.
    pub info: Info,
    /// Free-form tags.
    pub tags: Tags,
    /// Members in declaration order.
    pub members: Vec<Member>,
    /// Materialized geometry in the target reference system.
    pub geometry: Option<Geometry<f64>>,
}

impl Relation {
    /// Construct a relation from its members.
    #[must_use]
    pub fn new(id: i64, members: Vec<Member>) -> Self {
        Self {
            id,
            info: Info::default(),
            tags: Tags::new(),
            members,
            geometry: None,
        }
    }
}

/// Any of the three entity kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// A node.
    Node(Node),
    /// A way.
    Way(Way),
    /// A relation.
    Relation(Relation),
}

impl Entity {
    /// Kind discriminant of the wrapped entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Node(_) => EntityKind::Node,
            Self::Way(_) => EntityKind::Way,
            Self::Relation(_) => EntityKind::Relation,
        }
    }

    /// Identifier of the wrapped entity.
    #[must_use]
    pub const fn id(&self) -> i64 {
        match self {
            Self::Node(node) => node.id,
            Self::Way(way) => way.id,
            Self::Relation(relation) => relation.id,
        }
    }

    /// Edit metadata of the wrapped entity.
    #[must_use]
    pub const fn info(&self) -> &Info {
        match self {
            Self::Node(node) => &node.info,
            Self::Way(way) => &way.info,
            Self::Relation(relation) => &relation.info,
        }
    }

    /// Tags of the wrapped entity.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        match self {
            Self::Node(node) => &node.tags,
            Self::Way(way) => &way.tags,
            Self::Relation(relation) => &relation.tags,
        }
    }

    /// Materialized geometry, if any.
    #[must_use]
    pub const fn geometry(&self) -> Option<&Geometry<f64>> {
        match self {
            Self::Node(node) => node.geometry.as_ref(),
            Self::Way(way) => way.geometry.as_ref(),
            Self::Relation(relation) => relation.geometry.as_ref(),
        }
    }

    /// Replace the materialized geometry.
    pub fn set_geometry(&mut self, geometry: Option<Geometry<f64>>) {
        match self {
            Self::Node(node) => node.geometry = geometry,
            Self::Way(way) => way.geometry = geometry,
            Self::Relation(relation) => relation.geometry = geometry,
        }
    }
}

impl From<Node> for Entity {
    fn from(value: Node) -> Self {
        Self::Node(value)
    }
}

impl From<Way> for Entity {
    fn from(value: Way) -> Self {
        Self::Way(value)
    }
}

impl From<Relation> for Entity {
    fn from(value: Relation) -> Self {
        Self::Relation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, Point};
    use rstest::rstest;

    #[rstest]
    #[case(EntityKind::Node)]
    #[case(EntityKind::Way)]
    #[case(EntityKind::Relation)]
    fn kind_labels_parse_back(#[case] kind: EntityKind) {
        assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
    }

    #[rstest]
    fn entity_accessors_reach_the_wrapped_value() {
        let mut entity = Entity::from(Way::new(9, vec![1, 2, 3]));
        assert_eq!(entity.kind(), EntityKind::Way);
        assert_eq!(entity.id(), 9);
        assert!(entity.geometry().is_none());

        entity.set_geometry(Some(Geometry::Point(Point::new(1.0, 2.0))));
        assert_eq!(
            entity.geometry(),
            Some(&Geometry::Point(Point::new(1.0, 2.0)))
        );
    }
}
