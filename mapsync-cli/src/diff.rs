//! Diff command implementation for the mapsync CLI.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use mapsync_core::{Change, Srid, TileCoord};
use mapsync_data::diff::DEFAULT_ZOOM;
use mapsync_data::replication::{parse_changes, parse_compressed_changes};
use mapsync_data::repository::SqliteDatabase;
use mapsync_data::{DiffOptions, diff};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_CHANGES, ARG_DATABASE, ARG_SRID, ARG_ZOOM, CliError, ENV_DIFF_CHANGES, ENV_DIFF_DATABASE,
    require_existing, resolve_srid, write_report,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// CLI arguments for the `diff` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Read an osmChange document (.osc or .osc.gz) and list the \
                 tiles whose content it alters, comparing each element with \
                 its stored state. Run it before applying the changeset.",
    about = "List the tiles touched by a changeset"
)]
#[ortho_config(prefix = "MAPSYNC")]
pub(crate) struct DiffArgs {
    /// Path to an imported SQLite database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Path to the osmChange document, optionally gzip-compressed.
    #[arg(long = ARG_CHANGES, value_name = "path")]
    #[serde(default)]
    pub(crate) changes: Option<Utf8PathBuf>,
    /// Zoom level of the reported tiles.
    #[arg(long = ARG_ZOOM, value_name = "level")]
    #[serde(default)]
    pub(crate) zoom: Option<u8>,
    /// EPSG code of the stored geometry (4326 or 3857).
    #[arg(long = ARG_SRID, value_name = "code")]
    #[serde(default)]
    pub(crate) srid: Option<u32>,
}

impl DiffArgs {
    pub(crate) fn into_config(self) -> Result<DiffConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        DiffConfig::try_from(merged)
    }
}

/// Resolved `diff` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DiffConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) changes: Utf8PathBuf,
    pub(crate) zoom: u8,
    pub(crate) target: Srid,
}

impl DiffConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.database, ARG_DATABASE)?;
        require_existing(&self.changes, ARG_CHANGES)?;
        Ok(())
    }

    fn options(&self) -> DiffOptions {
        DiffOptions::default()
            .with_zoom(self.zoom)
            .with_target(self.target)
    }
}

impl TryFrom<DiffArgs> for DiffConfig {
    type Error = CliError;

    fn try_from(args: DiffArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_DIFF_DATABASE,
        })?;
        let changes = args.changes.ok_or(CliError::MissingArgument {
            field: ARG_CHANGES,
            env: ENV_DIFF_CHANGES,
        })?;
        Ok(Self {
            database,
            changes,
            zoom: args.zoom.unwrap_or(DEFAULT_ZOOM),
            target: resolve_srid(args.srid)?,
        })
    }
}

/// JSON report listing the touched tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DiffReport {
    pub(crate) zoom: u8,
    pub(crate) tiles: Vec<TileCoord>,
}

pub(crate) fn run_diff(args: DiffArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    config.validate_sources()?;
    let tiles = execute_diff(&config)?;
    write_report(
        writer,
        &DiffReport {
            zoom: config.zoom,
            tiles: tiles.into_iter().collect(),
        },
    )
}

pub(crate) fn execute_diff(config: &DiffConfig) -> Result<BTreeSet<TileCoord>, CliError> {
    let changes = load_changes(&config.changes)?;
    let database =
        SqliteDatabase::open(&config.database).map_err(|source| CliError::OpenDatabase {
            path: config.database.clone(),
            source,
        })?;
    let tiles = diff(database.repositories(), &changes, &config.options())?;
    Ok(tiles)
}

/// Parse the osmChange document at `path`, inflating it when it starts
/// with the gzip magic bytes.
pub(crate) fn load_changes(path: &Utf8Path) -> Result<Vec<Change>, CliError> {
    let open_error = |source| CliError::OpenChanges {
        path: path.to_path_buf(),
        source,
    };
    let file = mapsync_fs::open_utf8_file(path).map_err(open_error)?;
    let mut reader = BufReader::new(file);
    let compressed = reader.fill_buf().map_err(open_error)?.starts_with(&GZIP_MAGIC);
    let changes = if compressed {
        parse_compressed_changes(reader)?
    } else {
        parse_changes(reader)?
    };
    Ok(changes)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<DiffConfig, CliError> {
    let merged = DiffArgs::merge_from_layers(layers).map_err(CliError::from)?;
    DiffConfig::try_from(merged)
}
