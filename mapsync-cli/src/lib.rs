//! Command-line interface for importing snapshots into a mapsync database
//! and keeping it in step with a replication stream.
#![forbid(unsafe_code)]

use std::io::Write;

use camino::Utf8Path;
use clap::{Parser, Subcommand};
use mapsync_core::Srid;
use serde::Serialize;

mod diff;
mod error;
mod import;
mod update;

pub use error::CliError;

use diff::DiffArgs;
use import::ImportArgs;
use update::UpdateArgs;

pub(crate) const ARG_SNAPSHOT: &str = "snapshot";
pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_CHANGES: &str = "changes";
pub(crate) const ARG_CACHE_DIR: &str = "cache-dir";
pub(crate) const ARG_CACHE_STRATEGY: &str = "cache-strategy";
pub(crate) const ARG_CLEAN_CACHE: &str = "clean-cache";
pub(crate) const ARG_BATCH_SIZE: &str = "batch-size";
pub(crate) const ARG_SRID: &str = "srid";
pub(crate) const ARG_ZOOM: &str = "zoom";
pub(crate) const ARG_REPLICATION_URL: &str = "replication-url";
pub(crate) const ENV_IMPORT_SNAPSHOT: &str = "MAPSYNC_CMDS_IMPORT_SNAPSHOT";
pub(crate) const ENV_IMPORT_DATABASE: &str = "MAPSYNC_CMDS_IMPORT_DATABASE";
pub(crate) const ENV_UPDATE_DATABASE: &str = "MAPSYNC_CMDS_UPDATE_DATABASE";
pub(crate) const ENV_DIFF_DATABASE: &str = "MAPSYNC_CMDS_DIFF_DATABASE";
pub(crate) const ENV_DIFF_CHANGES: &str = "MAPSYNC_CMDS_DIFF_CHANGES";

/// Run the mapsync CLI with the current process arguments and environment,
/// writing command reports to standard output.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Command::Import(args) => import::run_import(args, &mut stdout),
        Command::Update(args) => update::run_update(args, &mut stdout),
        Command::Diff(args) => diff::run_diff(args, &mut stdout),
    }
}

/// Install the log subscriber.
///
/// `RUST_LOG` selects the verbosity; `info` is used when it is unset or
/// invalid. Records emitted through the `log` facade are forwarded.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(err) = installed {
        log::debug!("log subscriber already installed: {err}");
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "mapsync",
    about = "Import OpenStreetMap snapshots and replay replication changesets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a snapshot into a fresh database.
    Import(ImportArgs),
    /// Apply every published changeset that follows the stored checkpoint.
    Update(UpdateArgs),
    /// List the tiles a changeset file touches.
    Diff(DiffArgs),
}

/// Map an optional EPSG code onto a supported reference system.
pub(crate) fn resolve_srid(code: Option<u32>) -> Result<Srid, CliError> {
    code.map_or_else(
        || Ok(Srid::default()),
        |code| Srid::try_from(code).map_err(|source| CliError::UnsupportedSrid { source }),
    )
}

/// Fail unless `path` names an existing regular file.
pub(crate) fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
    match mapsync_fs::file_is_file(path) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CliError::SourcePathNotFile {
            field,
            path: path.to_path_buf(),
        }),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
            Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            })
        }
        Err(source) => Err(CliError::InspectSourcePath {
            field,
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write `report` as pretty-printed JSON followed by a newline.
pub(crate) fn write_report<T: Serialize>(
    writer: &mut dyn Write,
    report: &T,
) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(report).map_err(CliError::SerializeReport)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteReport)?;
    writer.write_all(b"\n").map_err(CliError::WriteReport)?;
    Ok(())
}

#[cfg(test)]
mod tests;
