//! Behaviour-driven step definitions driving the import CLI scenarios.

use super::helpers::{Workspace, cli_layer};
use super::*;
use crate::import::{ImportConfig, config_from_layers_for_test, resolve_import_config};
use camino::Utf8PathBuf;
use ortho_config::MergeComposer;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};
use std::cell::RefCell;

/// Aggregates import CLI scenario state so each step only needs a single
/// world argument.
struct ImportWorld {
    workspace: Workspace,
    snapshot: RefCell<Option<Utf8PathBuf>>,
    cli_args: RefCell<Vec<String>>,
    cli_result: RefCell<Option<Result<ImportConfig, CliError>>>,
    config_layer: RefCell<Option<Value>>,
    env_layer: RefCell<Option<Value>>,
}

impl ImportWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::new(),
            snapshot: RefCell::new(None),
            cli_args: RefCell::new(Vec::new()),
            cli_result: RefCell::new(None),
            config_layer: RefCell::new(None),
            env_layer: RefCell::new(None),
        }
    }

    fn snapshot(&self) -> Utf8PathBuf {
        self.snapshot
            .borrow()
            .clone()
            .expect("snapshot should be written")
    }

    fn file_database(&self) -> Utf8PathBuf {
        self.workspace.root().join("from-file.sqlite")
    }

    fn env_database(&self) -> Utf8PathBuf {
        self.workspace.root().join("from-env.sqlite")
    }
}

#[fixture]
fn world() -> ImportWorld {
    ImportWorld::new()
}

#[given("a snapshot file exists on disk")]
fn snapshot_exists(#[from(world)] world: &ImportWorld) {
    let path = world.workspace.snapshot();
    assert!(path.exists(), "expected the snapshot to exist on disk");
    world.snapshot.replace(Some(path));
}

#[given("I pass the snapshot and database paths with CLI flags")]
fn cli_provides_paths(#[from(world)] world: &ImportWorld) {
    let snapshot = world.snapshot();
    let database = world.workspace.database();
    world.cli_args.borrow_mut().extend([
        format!("--{ARG_SNAPSHOT}"),
        snapshot.to_string(),
        format!("--{ARG_DATABASE}"),
        database.to_string(),
    ]);
}

#[given("I omit all import configuration")]
fn omit_configuration(#[from(world)] world: &ImportWorld) {
    world.cli_args.borrow_mut().clear();
    world.config_layer.replace(None);
    world.env_layer.replace(None);
}

#[given("the database path and SRID are provided via a config file")]
fn provided_via_config(#[from(world)] world: &ImportWorld) {
    world.config_layer.replace(Some(json!({
        "database": world.file_database().as_str(),
        "srid": 4326,
    })));
}

#[given("the database path is overridden via environment variables")]
fn database_overridden_by_env(#[from(world)] world: &ImportWorld) {
    world.env_layer.replace(Some(json!({
        "database": world.env_database().as_str(),
    })));
}

#[given("I pass only the snapshot CLI flag")]
fn cli_only_snapshot(#[from(world)] world: &ImportWorld) {
    let snapshot = world.snapshot();
    world
        .cli_args
        .borrow_mut()
        .extend([format!("--{ARG_SNAPSHOT}"), snapshot.to_string()]);
}

#[when("I configure the import command")]
fn configure_import(#[from(world)] world: &ImportWorld) {
    let mut invocation = vec!["mapsync".to_owned(), "import".to_owned()];
    invocation.extend(world.cli_args.borrow().iter().cloned());
    let file_layer = world.config_layer.borrow().clone();
    let env_layer = world.env_layer.borrow().clone();
    let outcome = Cli::try_parse_from(invocation)
        .map_err(CliError::ArgumentParsing)
        .and_then(|cli| match cli.command {
            Command::Import(args) => {
                if file_layer.is_some() || env_layer.is_some() {
                    let mut composer = MergeComposer::new();
                    if let Some(layer) = file_layer {
                        composer.push_file(layer, None);
                    }
                    if let Some(layer) = env_layer {
                        composer.push_environment(layer);
                    }
                    composer.push_cli(cli_layer(&args));
                    config_from_layers_for_test(composer.layers())
                } else {
                    resolve_import_config(args)
                }
            }
            other => panic!("expected the import command, found {other:?}"),
        });
    world.cli_result.replace(Some(outcome));
}

#[then("the import plan uses the CLI-provided paths")]
fn plan_uses_cli_paths(#[from(world)] world: &ImportWorld) {
    let borrowed = world.cli_result.borrow();
    let config = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect("expected success");
    assert_eq!(config.snapshot, world.snapshot());
    assert_eq!(config.database, world.workspace.database());
}

#[then("the CLI reports that the \"snapshot\" flag is missing")]
fn reports_missing_snapshot(#[from(world)] world: &ImportWorld) {
    let borrowed = world.cli_result.borrow();
    let error = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::MissingArgument { field, .. } => assert_eq!(*field, ARG_SNAPSHOT),
        other => panic!("unexpected error {other:?}"),
    }
}

#[then("CLI and environment layers override configuration file values")]
fn precedence_holds(#[from(world)] world: &ImportWorld) {
    let borrowed = world.cli_result.borrow();
    let config = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect("expected success");
    assert_eq!(config.snapshot, world.snapshot());
    assert_eq!(config.database, world.env_database());
    assert_eq!(config.target, Srid::Wgs84);
}

macro_rules! register_import_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/import_command.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: ImportWorld) {
            let _ = world;
        }
    };
}

register_import_scenario!(cli_flag_selection, "selecting paths via CLI flags");
register_import_scenario!(rejecting_missing_args, "rejecting missing arguments");
register_import_scenario!(
    layering_cli_config_env,
    "layering CLI, config file, and environment values"
);
