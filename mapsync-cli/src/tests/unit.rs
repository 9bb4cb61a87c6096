//! Focused unit tests covering command configuration validation.

use super::helpers::Workspace;
use camino::Utf8PathBuf;
use super::*;
use crate::diff::{DiffArgs, DiffConfig};
use crate::import::{ImportArgs, ImportConfig};
use crate::update::{UpdateArgs, UpdateConfig};
use mapsync_core::Header;
use mapsync_data::import::CacheStrategy;
use mapsync_data::replication::DEFAULT_REPLICATION_URL;
use ortho_config::MergeComposer;
use rstest::rstest;
use serde_json::json;

#[rstest]
#[case(None, Some(Utf8PathBuf::from("db.sqlite")), ARG_SNAPSHOT, ENV_IMPORT_SNAPSHOT)]
#[case(
    Some(Utf8PathBuf::from("planet.osm.pbf")),
    None,
    ARG_DATABASE,
    ENV_IMPORT_DATABASE
)]
fn converting_import_without_required_fields_errors(
    #[case] snapshot: Option<Utf8PathBuf>,
    #[case] database: Option<Utf8PathBuf>,
    #[case] field: &'static str,
    #[case] env_var: &'static str,
) {
    let args = ImportArgs {
        snapshot,
        database,
        ..ImportArgs::default()
    };
    let err = ImportConfig::try_from(args).expect_err("missing field should error");
    match err {
        CliError::MissingArgument {
            field: missing,
            env,
        } => {
            assert_eq!(missing, field);
            assert_eq!(env, env_var);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn import_defaults_fill_optional_fields() {
    let args = ImportArgs {
        snapshot: Some(Utf8PathBuf::from("planet.osm.pbf")),
        database: Some(Utf8PathBuf::from("planet.sqlite")),
        ..ImportArgs::default()
    };
    let config = ImportConfig::try_from(args).expect("config");
    assert_eq!(config.target, Srid::WebMercator);
    assert_eq!(config.batch_size, 1000);
    assert_eq!(config.cache_strategy, CacheStrategy::Auto);
    assert!(!config.clean_cache);
    assert!(config.cache_dir.is_none());
}

#[rstest]
#[case("heap", CacheStrategy::Heap)]
#[case("Mapped", CacheStrategy::Mapped)]
#[case("AUTO", CacheStrategy::Auto)]
fn cache_strategies_parse_case_insensitively(
    #[case] value: &str,
    #[case] expected: CacheStrategy,
) {
    let args = ImportArgs {
        snapshot: Some(Utf8PathBuf::from("planet.osm.pbf")),
        database: Some(Utf8PathBuf::from("planet.sqlite")),
        cache_strategy: Some(value.to_owned()),
        ..ImportArgs::default()
    };
    let config = ImportConfig::try_from(args).expect("config");
    assert_eq!(config.cache_strategy, expected);
}

#[rstest]
fn unknown_cache_strategies_are_rejected() {
    let args = ImportArgs {
        snapshot: Some(Utf8PathBuf::from("planet.osm.pbf")),
        database: Some(Utf8PathBuf::from("planet.sqlite")),
        cache_strategy: Some("disk".to_owned()),
        ..ImportArgs::default()
    };
    let err = ImportConfig::try_from(args).expect_err("unknown strategy");
    match err {
        CliError::InvalidArgument { field, value, .. } => {
            assert_eq!(field, ARG_CACHE_STRATEGY);
            assert_eq!(value, "disk");
        }
        other => panic!("expected InvalidArgument, found {other:?}"),
    }
}

#[rstest]
#[case(None, Srid::WebMercator)]
#[case(Some(4326), Srid::Wgs84)]
#[case(Some(3857), Srid::WebMercator)]
fn srid_codes_resolve(#[case] code: Option<u32>, #[case] expected: Srid) {
    assert_eq!(resolve_srid(code).expect("supported code"), expected);
}

#[rstest]
fn unsupported_srid_codes_are_rejected() {
    let err = resolve_srid(Some(27_700)).expect_err("unsupported code");
    assert!(matches!(err, CliError::UnsupportedSrid { .. }));
}

#[rstest]
fn validate_sources_reports_missing_snapshot() {
    let workspace = Workspace::new();
    let config = ImportConfig::try_from(ImportArgs {
        snapshot: Some(workspace.root().join("missing.osm.pbf")),
        database: Some(workspace.database()),
        ..ImportArgs::default()
    })
    .expect("config");
    match config.validate_sources().expect_err("expected failure") {
        CliError::MissingSourceFile { field, .. } => assert_eq!(field, ARG_SNAPSHOT),
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn validate_sources_rejects_directories() {
    let workspace = Workspace::new();
    let config = ImportConfig::try_from(ImportArgs {
        snapshot: Some(workspace.root().to_path_buf()),
        database: Some(workspace.database()),
        ..ImportArgs::default()
    })
    .expect("config");
    match config.validate_sources().expect_err("expected failure") {
        CliError::SourcePathNotFile { field, .. } => assert_eq!(field, ARG_SNAPSHOT),
        other => panic!("unexpected error {other:?}"),
    }
}

#[rstest]
fn update_defaults_to_the_hourly_planet_stream() {
    let config = UpdateConfig::try_from(UpdateArgs {
        database: Some(Utf8PathBuf::from("planet.sqlite")),
        ..UpdateArgs::default()
    })
    .expect("config");
    assert_eq!(config.replication_url, None);
    assert_eq!(config.stream_url(None), DEFAULT_REPLICATION_URL);
    assert_eq!(config.target, Srid::WebMercator);
}

#[rstest]
fn update_prefers_the_checkpoint_stream_over_the_default() {
    let config = UpdateConfig::try_from(UpdateArgs {
        database: Some(Utf8PathBuf::from("berlin.sqlite")),
        ..UpdateArgs::default()
    })
    .expect("config");
    let checkpoint = Header {
        replication_url: Some("https://example.org/daily/".to_owned()),
        ..Header::default()
    };
    assert_eq!(config.stream_url(Some(&checkpoint)), "https://example.org/daily/");

    let overridden = UpdateConfig {
        replication_url: Some("https://example.org/minute/".to_owned()),
        ..config
    };
    assert_eq!(
        overridden.stream_url(Some(&checkpoint)),
        "https://example.org/minute/"
    );
}

#[rstest]
fn update_requires_a_database() {
    match UpdateConfig::try_from(UpdateArgs::default()).expect_err("missing database") {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_DATABASE);
            assert_eq!(env, ENV_UPDATE_DATABASE);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn diff_defaults_to_zoom_fourteen() {
    let config = DiffConfig::try_from(DiffArgs {
        database: Some(Utf8PathBuf::from("planet.sqlite")),
        changes: Some(Utf8PathBuf::from("changes.osc")),
        ..DiffArgs::default()
    })
    .expect("config");
    assert_eq!(config.zoom, 14);
}

#[rstest]
fn diff_requires_a_changes_file() {
    let err = DiffConfig::try_from(DiffArgs {
        database: Some(Utf8PathBuf::from("planet.sqlite")),
        ..DiffArgs::default()
    })
    .expect_err("missing changes");
    match err {
        CliError::MissingArgument { field, env } => {
            assert_eq!(field, ARG_CHANGES);
            assert_eq!(env, ENV_DIFF_CHANGES);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[rstest]
fn merge_layers_maps_configuration_errors() {
    let mut composer = MergeComposer::new();
    composer.push_cli(json!({ "batch_size": "many" }));

    let err = import::config_from_layers_for_test(composer.layers())
        .expect_err("invalid config layer should map to CliError::Configuration");
    match err {
        CliError::Configuration(_) => {}
        other => panic!("expected CliError::Configuration, found {other:?}"),
    }
}

#[rstest]
fn merge_layers_honour_precedence() {
    let mut composer = MergeComposer::new();
    composer.push_file(
        json!({
            "database": "from-file.sqlite",
            "replication_url": "https://example.org/minute/",
            "srid": 4326,
        }),
        None,
    );
    composer.push_environment(json!({ "database": "from-env.sqlite" }));
    composer.push_cli(json!({ "srid": 3857 }));

    let config =
        update::config_from_layers_for_test(composer.layers()).expect("merged config should build");
    assert_eq!(config.database, Utf8PathBuf::from("from-env.sqlite"));
    assert_eq!(
        config.replication_url.as_deref(),
        Some("https://example.org/minute/")
    );
    assert_eq!(config.target, Srid::WebMercator);
}

#[rstest]
fn diff_layers_fill_the_zoom() {
    let mut composer = MergeComposer::new();
    composer.push_file(json!({ "zoom": 12 }), None);
    composer.push_cli(json!({
        "database": "planet.sqlite",
        "changes": "changes.osc.gz",
    }));

    let config =
        diff::config_from_layers_for_test(composer.layers()).expect("merged config should build");
    assert_eq!(config.zoom, 12);
    assert_eq!(config.changes, Utf8PathBuf::from("changes.osc.gz"));
}
