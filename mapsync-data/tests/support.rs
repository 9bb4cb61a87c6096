//! Shared fixtures for the behaviour tests.
#![allow(
    dead_code,
    reason = "each test binary uses a different subset of the helpers"
)]

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use mapsync_core::{Bound, EntityKind, Header, Member, Node, Relation, Tags, Way};
use mapsync_data::pbf::SnapshotWriter;
use tempfile::{Builder, TempPath};

/// Epsilon for floating-point coordinate comparisons in tests
const COORDINATE_EPSILON: f64 = 1.0e-7;

/// Sequence number carried by the fixture snapshot header.
pub const SNAPSHOT_SEQUENCE: i64 = 100;

fn tagged(mut node: Node, key: &str, value: &str) -> Node {
    node.tags = Tags::from([(key.to_owned(), value.to_owned())]);
    node
}

/// Nodes forming a small square near Berlin plus one tagged corner.
pub fn fixture_nodes() -> Vec<Node> {
    vec![
        tagged(Node::new(1, 13.0, 52.0), "amenity", "cafe"),
        Node::new(2, 13.1, 52.0),
        Node::new(3, 13.1, 52.1),
        Node::new(4, 13.0, 52.1),
    ]
}

/// One closed ring and one open line over [`fixture_nodes`].
pub fn fixture_ways() -> Vec<Way> {
    vec![Way::new(10, vec![1, 2, 3, 4, 1]), Way::new(11, vec![1, 2])]
}

/// A relation grouping the ring and a labelled node.
pub fn fixture_relations() -> Vec<Relation> {
    vec![Relation::new(
        20,
        vec![
            Member::new(10, EntityKind::Way, "outer"),
            Member::new(3, EntityKind::Node, "label"),
        ],
    )]
}

/// Write the fixture snapshot to a temporary `.osm.pbf` file.
///
/// Nodes, ways and relations are written to separate blocks so that every
/// geometry is resolved across block boundaries.
pub fn write_snapshot() -> TempPath {
    let header = Header {
        replication_sequence: SNAPSHOT_SEQUENCE,
        replication_url: Some("https://example.org/replication/".to_owned()),
        source: Some("behaviour fixture".to_owned()),
        ..Header::default()
    };
    let bound = Bound {
        min_lon: 13.0,
        min_lat: 52.0,
        max_lon: 13.1,
        max_lat: 52.1,
    };
    let mut writer = SnapshotWriter::new(Vec::new());
    writer
        .write_header(&header, Some(&bound))
        .unwrap_or_else(|err| panic!("failed to encode header: {err}"));
    writer
        .write_data(&fixture_nodes(), &[], &[])
        .unwrap_or_else(|err| panic!("failed to encode nodes: {err}"));
    writer
        .write_plain_data(&[], &fixture_ways(), &[])
        .unwrap_or_else(|err| panic!("failed to encode ways: {err}"));
    writer
        .write_plain_data(&[], &[], &fixture_relations())
        .unwrap_or_else(|err| panic!("failed to encode relations: {err}"));
    write_bytes("fixture", &writer.into_inner())
}

/// Write the fixture snapshot cut off part way through its last blob.
pub fn write_truncated_snapshot() -> TempPath {
    let complete = write_snapshot();
    let bytes = std::fs::read(&complete)
        .unwrap_or_else(|err| panic!("failed to read fixture snapshot: {err}"));
    let cut = bytes.len().saturating_sub(5);
    write_bytes("truncated", bytes.get(..cut).unwrap_or_default())
}

fn write_bytes(stem: &str, bytes: &[u8]) -> TempPath {
    let mut tempfile = Builder::new()
        .prefix(stem)
        .suffix(".osm.pbf")
        .tempfile()
        .unwrap_or_else(|err| panic!("failed to create temporary snapshot for {stem}: {err}"));
    tempfile
        .write_all(bytes)
        .unwrap_or_else(|err| panic!("failed to write snapshot for {stem}: {err}"));
    tempfile.into_temp_path()
}

/// View a temporary path as UTF-8.
pub fn utf8(path: &TempPath) -> &Utf8Path {
    Utf8Path::from_path(path).unwrap_or_else(|| panic!("temporary path {path:?} is not UTF-8"))
}

/// Database path inside a scenario's working directory.
pub fn database_path(dir: &tempfile::TempDir) -> Utf8PathBuf {
    let path = dir.path().join("mapsync.sqlite");
    Utf8PathBuf::from_path_buf(path)
        .unwrap_or_else(|path| panic!("database path {path:?} is not UTF-8"))
}

#[expect(
    clippy::float_arithmetic,
    reason = "test helper compares floating-point coordinates"
)]
pub fn assert_close(actual: f64, expected: f64) {
    let delta = (actual - expected).abs();
    assert!(
        delta <= COORDINATE_EPSILON,
        "expected {expected}, found {actual} (delta {delta})"
    );
}
