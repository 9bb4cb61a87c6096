//! Incremental changes and the flattened element stream.

use std::fmt;

use crate::{Bound, Entity, Header, Node, Relation, Way};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Kind of edit applied by a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChangeKind {
    /// The elements did not exist before.
    Create,
    /// The elements replace an earlier version.
    Modify,
    /// The elements are removed.
    Delete,
}

impl ChangeKind {
    /// Parse the element name used by change documents.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "create" => Some(Self::Create),
            "modify" => Some(Self::Modify),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        })
    }
}

/// One unit of an incremental changeset.
///
/// A changeset is an ordered sequence of changes; elements keep document
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Edit applied to every element.
    pub kind: ChangeKind,
    /// Affected entities, in document order.
    pub elements: Vec<Entity>,
}

impl Change {
    /// Construct a change.
    #[must_use]
    pub const fn new(kind: ChangeKind, elements: Vec<Entity>) -> Self {
        Self { kind, elements }
    }
}

/// Flattened view of a decoded snapshot, one item per header, bound or
/// entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Snapshot header.
    Header(Header),
    /// Declared bounding box.
    Bound(Bound),
    /// A node.
    Node(Node),
    /// A way.
    Way(Way),
    /// A relation.
    Relation(Relation),
}

impl From<Entity> for Element {
    fn from(value: Entity) -> Self {
        match value {
            Entity::Node(node) => Self::Node(node),
            Entity::Way(way) => Self::Way(way),
            Entity::Relation(relation) => Self::Relation(relation),
        }
    }
}
