//! Update command implementation for the mapsync CLI.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use log::info;
use mapsync_core::{Header, Srid};
use mapsync_data::replication::{
    DEFAULT_REPLICATION_URL, HttpReplicationSource, ReplicationSource,
};
use mapsync_data::repository::{HeaderRepository, SqliteDatabase};
use mapsync_data::{UpdateSummary, catch_up};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_DATABASE, ARG_REPLICATION_URL, ARG_SRID, CliError, ENV_UPDATE_DATABASE, resolve_srid,
    write_report,
};

/// CLI arguments for the `update` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Fetch and apply, in sequence order, every changeset the \
                 replication stream has published since the checkpoint \
                 stored in the database. The checkpoint advances after each \
                 changeset is fully applied.",
    about = "Catch a database up with its replication stream"
)]
#[ortho_config(prefix = "MAPSYNC")]
pub(crate) struct UpdateArgs {
    /// Path to an imported SQLite database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Base URL of the replication stream; defaults to the stream recorded
    /// in the database checkpoint.
    #[arg(long = ARG_REPLICATION_URL, value_name = "url")]
    #[serde(default)]
    pub(crate) replication_url: Option<String>,
    /// EPSG code of persisted geometry (4326 or 3857).
    #[arg(long = ARG_SRID, value_name = "code")]
    #[serde(default)]
    pub(crate) srid: Option<u32>,
}

impl UpdateArgs {
    pub(crate) fn into_config(self) -> Result<UpdateConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        UpdateConfig::try_from(merged)
    }
}

/// Resolved `update` command configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) replication_url: Option<String>,
    pub(crate) target: Srid,
}

impl UpdateConfig {
    /// Stream to follow: the configured URL, else the one recorded with the
    /// checkpoint, else the hourly planet stream.
    pub(crate) fn stream_url(&self, checkpoint: Option<&Header>) -> String {
        self.replication_url
            .clone()
            .or_else(|| checkpoint.and_then(|header| header.replication_url.clone()))
            .unwrap_or_else(|| DEFAULT_REPLICATION_URL.to_owned())
    }
}

impl TryFrom<UpdateArgs> for UpdateConfig {
    type Error = CliError;

    fn try_from(args: UpdateArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_UPDATE_DATABASE,
        })?;
        Ok(Self {
            database,
            replication_url: args.replication_url,
            target: resolve_srid(args.srid)?,
        })
    }
}

/// One applied changeset in the JSON report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct AppliedChangeset {
    pub(crate) sequence: i64,
    pub(crate) applied: u64,
    pub(crate) skipped: u64,
}

impl From<&UpdateSummary> for AppliedChangeset {
    fn from(summary: &UpdateSummary) -> Self {
        Self {
            sequence: summary.sequence,
            applied: summary.applied,
            skipped: summary.skipped,
        }
    }
}

pub(crate) fn run_update(args: UpdateArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = args.into_config()?;
    let database = open_database(&config)?;
    let url = resolve_stream_url(&config, &database)?;
    info!("following replication stream {url}");
    let source = HttpReplicationSource::new(&url)?;
    let summaries = apply_changesets(&config, &database, &source)?;
    let report: Vec<AppliedChangeset> = summaries.iter().map(AppliedChangeset::from).collect();
    write_report(writer, &report)
}

/// Apply every changeset `source` has published past the stored checkpoint.
pub(crate) fn execute_update(
    config: &UpdateConfig,
    source: &dyn ReplicationSource,
) -> Result<Vec<UpdateSummary>, CliError> {
    let database = open_database(config)?;
    apply_changesets(config, &database, source)
}

/// Replication stream for `database`, honouring the stored checkpoint.
pub(crate) fn resolve_stream_url(
    config: &UpdateConfig,
    database: &SqliteDatabase,
) -> Result<String, CliError> {
    let checkpoint = database.latest().map_err(|source| CliError::ReadCheckpoint {
        path: config.database.clone(),
        source,
    })?;
    Ok(config.stream_url(checkpoint.as_ref()))
}

fn open_database(config: &UpdateConfig) -> Result<SqliteDatabase, CliError> {
    SqliteDatabase::open(&config.database).map_err(|source| CliError::OpenDatabase {
        path: config.database.clone(),
        source,
    })
}

fn apply_changesets(
    config: &UpdateConfig,
    database: &SqliteDatabase,
    source: &dyn ReplicationSource,
) -> Result<Vec<UpdateSummary>, CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    let summaries = runtime.block_on(catch_up(database.repositories(), source, config.target))?;
    Ok(summaries)
}

#[cfg(test)]
pub(crate) fn config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<UpdateConfig, CliError> {
    let merged = UpdateArgs::merge_from_layers(layers).map_err(CliError::from)?;
    UpdateConfig::try_from(merged)
}
