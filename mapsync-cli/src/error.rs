//! Error types emitted by the mapsync CLI.
//!
//! Keep this error type reasonably small, as every command helper returns
//! `Result<_, CliError>`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use mapsync_core::ProjectionError;
use mapsync_data::replication::ReplicationError;
use mapsync_data::{DiffError, ImportError, RepositoryError, UpdateError};
use thiserror::Error;

/// Errors emitted by the mapsync CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        /// Flag name.
        field: &'static str,
        /// Environment variable that can supply it.
        env: &'static str,
    },
    /// An option holds a value outside its accepted set.
    #[error("invalid {field} {value:?}: expected {expected}")]
    InvalidArgument {
        /// Flag name.
        field: &'static str,
        /// Value received.
        value: String,
        /// Accepted values.
        expected: &'static str,
    },
    /// The requested reference system is not supported.
    #[error("invalid --srid: {source}")]
    UnsupportedSrid {
        /// Underlying error.
        #[source]
        source: ProjectionError,
    },
    /// A referenced input path does not exist on disk.
    #[error("{field} path {path:?} does not exist")]
    MissingSourceFile {
        /// Flag name.
        field: &'static str,
        /// Path supplied.
        path: Utf8PathBuf,
    },
    /// A referenced input path exists but is not a file.
    #[error("{field} path {path:?} exists but is not a file")]
    SourcePathNotFile {
        /// Flag name.
        field: &'static str,
        /// Path supplied.
        path: Utf8PathBuf,
    },
    /// A referenced input path could not be inspected due to an IO error.
    #[error("failed to inspect {field} path {path:?}: {source}")]
    InspectSourcePath {
        /// Flag name.
        field: &'static str,
        /// Path supplied.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Opening the database failed.
    #[error("failed to open database at {path:?}: {source}")]
    OpenDatabase {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: RepositoryError,
    },
    /// Reading the stored checkpoint failed.
    #[error("failed to read the checkpoint in {path:?}: {source}")]
    ReadCheckpoint {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: RepositoryError,
    },
    /// Importing the snapshot failed.
    #[error("failed to import snapshot: {0}")]
    Import(#[from] ImportError),
    /// Applying changesets failed.
    #[error("failed to apply changesets: {0}")]
    Update(#[from] UpdateError),
    /// Reading the changes file or reaching the replication stream failed.
    #[error("failed to read changes: {0}")]
    Replication(#[from] ReplicationError),
    /// Opening the changes file failed.
    #[error("failed to open changes at {path:?}: {source}")]
    OpenChanges {
        /// Changes path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Computing the tile diff failed.
    #[error("failed to compute tile diff: {0}")]
    Diff(#[from] DiffError),
    /// The async runtime could not be started.
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// Serializing a command report failed.
    #[error("failed to serialize report: {0}")]
    SerializeReport(#[source] serde_json::Error),
    /// Writing a command report failed.
    #[error("failed to write report: {0}")]
    WriteReport(#[source] std::io::Error),
}
