//! Command integration tests covering import, update and diff end to end.

use super::helpers::{SNAPSHOT_SEQUENCE, Workspace};
use super::*;
use crate::diff::{DiffArgs, load_changes, run_diff};
use crate::import::{ImportArgs, run_import};
use crate::update::{UpdateConfig, execute_update, resolve_stream_url};
use mapsync_data::replication::{DEFAULT_REPLICATION_URL, StubSource};
use mapsync_data::repository::SqliteDatabase;
use rstest::{fixture, rstest};
use serde_json::Value;

const MOVE_NODE_ONE: &str = r#"<osmChange version="0.6">
  <modify>
    <node id="1" version="2" lat="-10" lon="-10"/>
  </modify>
</osmChange>"#;

#[fixture]
fn imported() -> Workspace {
    let workspace = Workspace::new();
    let args = ImportArgs {
        snapshot: Some(workspace.snapshot()),
        database: Some(workspace.database()),
        ..ImportArgs::default()
    };
    let mut output = Vec::new();
    run_import(args, &mut output).expect("import should succeed");
    workspace
}

fn report(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("report should be JSON")
}

#[rstest]
fn import_reports_counts_and_checkpoint() {
    let workspace = Workspace::new();
    let args = ImportArgs {
        snapshot: Some(workspace.snapshot()),
        database: Some(workspace.database()),
        srid: Some(4326),
        ..ImportArgs::default()
    };
    let mut output = Vec::new();
    run_import(args, &mut output).expect("import should succeed");

    let report = report(&output);
    assert_eq!(report["nodes"], 2);
    assert_eq!(report["ways"], 1);
    assert_eq!(report["relations"], 0);
    assert_eq!(report["sequence"], SNAPSHOT_SEQUENCE);
    let bounds: Vec<f64> = report["bounds"]
        .as_array()
        .expect("bounds array")
        .iter()
        .map(|value| value.as_f64().expect("number"))
        .collect();
    for (actual, expected) in bounds.iter().zip([5.0, 5.0, 10.0, 10.0]) {
        assert!((actual - expected).abs() < 1.0e-7, "bounds {bounds:?}");
    }
    assert!(workspace.database().exists(), "expected database file");
}

#[rstest]
fn import_rejects_a_missing_snapshot() {
    let workspace = Workspace::new();
    let args = ImportArgs {
        snapshot: Some(workspace.root().join("absent.osm.pbf")),
        database: Some(workspace.database()),
        ..ImportArgs::default()
    };
    let err = run_import(args, &mut Vec::new()).expect_err("missing snapshot");
    assert!(matches!(err, CliError::MissingSourceFile { .. }));
    assert!(!workspace.database().exists(), "no database should be created");
}

#[rstest]
fn diff_lists_old_and_new_tiles(imported: Workspace) {
    let changes = imported.changes("move.osc", MOVE_NODE_ONE);
    let args = DiffArgs {
        database: Some(imported.database()),
        changes: Some(changes),
        zoom: Some(1),
        ..DiffArgs::default()
    };
    let mut output = Vec::new();
    run_diff(args, &mut output).expect("diff should succeed");

    let report = report(&output);
    assert_eq!(report["zoom"], 1);
    let tiles: Vec<(u64, u64)> = report["tiles"]
        .as_array()
        .expect("tile array")
        .iter()
        .map(|tile| {
            (
                tile["x"].as_u64().expect("x"),
                tile["y"].as_u64().expect("y"),
            )
        })
        .collect();
    assert_eq!(tiles, vec![(1, 0), (0, 1)]);
}

#[rstest]
fn load_changes_reports_unreadable_files() {
    let workspace = Workspace::new();
    let missing = workspace.root().join("absent.osc");
    let err = load_changes(&missing).expect_err("missing changes");
    match err {
        CliError::OpenChanges { path, .. } => assert_eq!(path, missing),
        other => panic!("expected OpenChanges, found {other:?}"),
    }
}

#[rstest]
fn update_applies_published_changesets(imported: Workspace) {
    let source = StubSource::new()
        .with_changeset(
            SNAPSHOT_SEQUENCE + 1,
            "2024-05-01T10:00:00Z",
            MOVE_NODE_ONE,
        )
        .with_latest(SNAPSHOT_SEQUENCE + 1, "2024-05-01T10:00:00Z");
    let config = UpdateConfig {
        database: imported.database(),
        replication_url: Some("https://example.org/replication/".to_owned()),
        target: Srid::WebMercator,
    };
    let summaries = execute_update(&config, &source).expect("update should succeed");
    assert_eq!(summaries.len(), 1);
    let applied = summaries.first().expect("one summary");
    assert_eq!(applied.sequence, SNAPSHOT_SEQUENCE + 1);
    assert_eq!(applied.applied, 1);

    let again = execute_update(&config, &source).expect("second update should succeed");
    assert!(again.is_empty(), "checkpoint already at the newest changeset");
}

const GEOFABRIK_BERLIN: &str = "https://download.geofabrik.de/europe/germany/berlin-updates/";

fn import_following(stream: Option<&str>) -> Workspace {
    let workspace = Workspace::new();
    let args = ImportArgs {
        snapshot: Some(workspace.snapshot_following(stream)),
        database: Some(workspace.database()),
        ..ImportArgs::default()
    };
    let mut output = Vec::new();
    run_import(args, &mut output).expect("import should succeed");
    workspace
}

#[rstest]
#[case(Some(GEOFABRIK_BERLIN), None, GEOFABRIK_BERLIN)]
#[case(Some(GEOFABRIK_BERLIN), Some("https://example.org/minute/"), "https://example.org/minute/")]
#[case(None, None, DEFAULT_REPLICATION_URL)]
fn update_follows_the_stream_recorded_at_import(
    #[case] stored: Option<&str>,
    #[case] flag: Option<&str>,
    #[case] expected: &str,
) {
    let workspace = import_following(stored);
    let config = UpdateConfig {
        database: workspace.database(),
        replication_url: flag.map(str::to_owned),
        target: Srid::WebMercator,
    };
    let database = SqliteDatabase::open(&config.database).expect("open database");
    let url = resolve_stream_url(&config, &database).expect("checkpoint readable");
    assert_eq!(url, expected);
}
