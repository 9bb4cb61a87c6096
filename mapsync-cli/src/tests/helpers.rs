//! Test helpers for building snapshot workspaces and configuration layers.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use mapsync_core::{Header, Node, Way};
use mapsync_data::pbf::SnapshotWriter;
use serde_json::Value;
use tempfile::TempDir;

/// Sequence number carried by the generated snapshot.
pub(super) const SNAPSHOT_SEQUENCE: i64 = 7;

/// A temporary directory holding a snapshot and room for a database.
pub(super) struct Workspace {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    pub(super) fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
        Self { _dir: dir, root }
    }

    pub(super) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(super) fn database(&self) -> Utf8PathBuf {
        self.root.join("mapsync.sqlite")
    }

    /// Write a snapshot with two nodes and a way joining them.
    pub(super) fn snapshot(&self) -> Utf8PathBuf {
        self.snapshot_following(None)
    }

    /// Write the fixture snapshot, recording `stream` as its replication
    /// URL.
    pub(super) fn snapshot_following(&self, stream: Option<&str>) -> Utf8PathBuf {
        let path = self.root.join("fixture.osm.pbf");
        let header = Header {
            replication_sequence: SNAPSHOT_SEQUENCE,
            replication_url: stream.map(str::to_owned),
            ..Header::default()
        };
        let mut writer = SnapshotWriter::new(Vec::new());
        writer.write_header(&header, None).expect("encode header");
        writer
            .write_data(
                &[Node::new(1, 5.0, 5.0), Node::new(2, 10.0, 10.0)],
                &[Way::new(3, vec![1, 2])],
                &[],
            )
            .expect("encode data");
        fs::write(&path, writer.into_inner()).expect("write snapshot");
        path
    }

    /// Write an osmChange document under `name`.
    pub(super) fn changes(&self, name: &str, document: &str) -> Utf8PathBuf {
        let path = self.root.join(name);
        fs::write(&path, document).expect("write changes");
        path
    }
}

/// Serialize CLI arguments into a merge layer, leaving unset flags out so
/// they do not mask lower-precedence layers.
pub(super) fn cli_layer<T: serde::Serialize>(args: &T) -> Value {
    let mut value = serde_json::to_value(args).expect("serialize CLI arguments");
    if let Value::Object(map) = &mut value {
        map.retain(|_, field| !field.is_null());
    }
    value
}
