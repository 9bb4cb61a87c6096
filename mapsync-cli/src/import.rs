//! Import command implementation for the mapsync CLI.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use mapsync_core::Srid;
use mapsync_data::import::{CacheStrategy, DEFAULT_BATCH_SIZE, ImportOptions, ImportSummary};
use mapsync_data::repository::SqliteDatabase;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_BATCH_SIZE, ARG_CACHE_DIR, ARG_CACHE_STRATEGY, ARG_CLEAN_CACHE, ARG_DATABASE,
    ARG_SNAPSHOT, ARG_SRID, CliError, ENV_IMPORT_DATABASE, ENV_IMPORT_SNAPSHOT, require_existing,
    resolve_srid, write_report,
};

/// CLI arguments for the `import` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Decode an OpenStreetMap snapshot (.osm.pbf), materialize \
                 the geometry of every node, way and relation, and persist \
                 them with the snapshot's replication checkpoint. Paths can \
                 come from CLI flags, configuration files, or environment \
                 variables.",
    about = "Import a snapshot into a database"
)]
#[ortho_config(prefix = "MAPSYNC")]
pub(crate) struct ImportArgs {
    /// Path to the `.osm.pbf` snapshot.
    #[arg(long = ARG_SNAPSHOT, value_name = "path")]
    #[serde(default)]
    pub(crate) snapshot: Option<Utf8PathBuf>,
    /// Path to the SQLite database; created when missing.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Directory for memory-mapped caches.
    #[arg(long = ARG_CACHE_DIR, value_name = "dir")]
    #[serde(default)]
    pub(crate) cache_dir: Option<Utf8PathBuf>,
    /// Where caches live: `heap`, `mapped` or `auto`.
    #[arg(long = ARG_CACHE_STRATEGY, value_name = "strategy")]
    #[serde(default)]
    pub(crate) cache_strategy: Option<String>,
    /// Remove the cache directory after a successful import.
    #[arg(long = ARG_CLEAN_CACHE, value_name = "bool")]
    #[serde(default)]
    pub(crate) clean_cache: Option<bool>,
    /// Entities per bulk write.
    #[arg(long = ARG_BATCH_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
    /// EPSG code of persisted geometry (4326 or 3857).
    #[arg(long = ARG_SRID, value_name = "code")]
    #[serde(default)]
    pub(crate) srid: Option<u32>,
}

impl ImportArgs {
    pub(crate) fn into_config(self) -> Result<ImportConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        ImportConfig::try_from(merged)
    }
}

/// Resolved `import` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportConfig {
    pub(crate) snapshot: Utf8PathBuf,
    pub(crate) database: Utf8PathBuf,
    pub(crate) cache_dir: Option<Utf8PathBuf>,
    pub(crate) cache_strategy: CacheStrategy,
    pub(crate) clean_cache: bool,
    pub(crate) batch_size: usize,
    pub(crate) target: Srid,
}

impl ImportConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.snapshot, ARG_SNAPSHOT)
    }

    pub(crate) fn options(&self) -> ImportOptions {
        let options = ImportOptions::default()
            .with_target(self.target)
            .with_batch_size(self.batch_size)
            .with_cache_strategy(self.cache_strategy)
            .with_clean_cache(self.clean_cache);
        match &self.cache_dir {
            Some(dir) => options.with_cache_dir(dir.clone()),
            None => options,
        }
    }
}

impl TryFrom<ImportArgs> for ImportConfig {
    type Error = CliError;

    fn try_from(args: ImportArgs) -> Result<Self, Self::Error> {
        let snapshot = args.snapshot.ok_or(CliError::MissingArgument {
            field: ARG_SNAPSHOT,
            env: ENV_IMPORT_SNAPSHOT,
        })?;
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_IMPORT_DATABASE,
        })?;
        let cache_strategy = args
            .cache_strategy
            .as_deref()
            .map_or(Ok(CacheStrategy::default()), parse_cache_strategy)?;
        Ok(Self {
            snapshot,
            database,
            cache_dir: args.cache_dir,
            cache_strategy,
            clean_cache: args.clean_cache.unwrap_or(false),
            batch_size: args.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            target: resolve_srid(args.srid)?,
        })
    }
}

fn parse_cache_strategy(value: &str) -> Result<CacheStrategy, CliError> {
    match value.to_ascii_lowercase().as_str() {
        "heap" => Ok(CacheStrategy::Heap),
        "mapped" => Ok(CacheStrategy::Mapped),
        "auto" => Ok(CacheStrategy::Auto),
        _ => Err(CliError::InvalidArgument {
            field: ARG_CACHE_STRATEGY,
            value: value.to_owned(),
            expected: "heap, mapped or auto",
        }),
    }
}

/// JSON report printed once the import completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ImportReport {
    pub(crate) nodes: u64,
    pub(crate) ways: u64,
    pub(crate) relations: u64,
    pub(crate) blocks: u64,
    pub(crate) sequence: i64,
    /// `[min_lon, min_lat, max_lon, max_lat]` of the imported nodes.
    pub(crate) bounds: Option<[f64; 4]>,
}

impl From<&ImportSummary> for ImportReport {
    fn from(summary: &ImportSummary) -> Self {
        Self {
            nodes: summary.nodes,
            ways: summary.ways,
            relations: summary.relations,
            blocks: summary.blocks,
            sequence: summary.header.replication_sequence,
            bounds: summary
                .bounds
                .map(|rect| [rect.min().x, rect.min().y, rect.max().x, rect.max().y]),
        }
    }
}

pub(crate) fn run_import(args: ImportArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = resolve_import_config(args)?;
    let summary = execute_import(&config)?;
    write_report(writer, &ImportReport::from(&summary))
}

pub(crate) fn resolve_import_config(args: ImportArgs) -> Result<ImportConfig, CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    Ok(config)
}

pub(crate) fn execute_import(config: &ImportConfig) -> Result<ImportSummary, CliError> {
    let database =
        SqliteDatabase::open(&config.database).map_err(|source| CliError::OpenDatabase {
            path: config.database.clone(),
            source,
        })?;
    let summary = mapsync_data::import_snapshot(
        &config.snapshot,
        database.repositories(),
        &config.options(),
    )?;
    Ok(summary)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<ImportConfig, CliError> {
    let merged = ImportArgs::merge_from_layers(layers).map_err(CliError::from)?;
    ImportConfig::try_from(merged)
}
