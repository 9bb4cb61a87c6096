//! Persistence contract for entities and replication checkpoints.
//!
//! Orchestrators never talk to a database directly: they receive a
//! [`Repositories`] bundle of trait objects. [`MemoryDatabase`] backs tests
//! and dry runs; [`SqliteDatabase`] persists to a single SQLite file.
//!
//! Invariants: `put` is an upsert by id, deleting an absent id is a no-op,
//! and `get_many` results align with the requested ids.

use std::io;

use camino::Utf8PathBuf;
use mapsync_core::{Header, Node, Relation, Way};
use thiserror::Error;

use crate::store::CodecError;

mod memory;
mod sqlite;

pub use memory::{Identified, MemoryDatabase, MemoryHeaders, MemoryRepository};
pub use sqlite::SqliteDatabase;

/// Failure of a backing store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RepositoryError {
    /// Creating the database directory failed.
    #[error("failed to create parent directory for {path}")]
    CreateDirectory {
        /// Database path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Opening the database failed.
    #[error("failed to open database at {path}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A statement failed.
    #[error("{operation} on {table} failed")]
    Query {
        /// Statement being run.
        operation: &'static str,
        /// Table involved.
        table: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// A JSON column failed to encode or decode.
    #[error("invalid JSON for {table} row {id}")]
    Json {
        /// Table involved.
        table: &'static str,
        /// Row identifier.
        id: i64,
        /// Source error produced by `serde_json`.
        #[source]
        source: serde_json::Error,
    },
    /// A geometry column failed to decode.
    #[error("invalid geometry for {table} row {id}")]
    Geometry {
        /// Table involved.
        table: &'static str,
        /// Row identifier.
        id: i64,
        /// Codec error.
        #[source]
        source: CodecError,
    },
    /// A column held a value of the wrong type.
    #[error("corrupt {table} row {id}: {reason}")]
    Corrupt {
        /// Table involved.
        table: &'static str,
        /// Row identifier.
        id: i64,
        /// What was wrong.
        reason: String,
    },
    /// The store cannot serve requests.
    #[error("repository unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

/// Access to one kind of entity, keyed by id.
pub trait Repository<E> {
    /// Entity stored under `id`.
    fn get(&self, id: i64) -> Result<Option<E>, RepositoryError>;

    /// Entities for `ids`, aligned with the input; absent ids yield `None`.
    fn get_many(&self, ids: &[i64]) -> Result<Vec<Option<E>>, RepositoryError> {
        ids.iter().map(|id| self.get(*id)).collect()
    }

    /// Insert or replace `entity`.
    fn put(&self, entity: &E) -> Result<(), RepositoryError>;

    /// Insert or replace every entity.
    fn put_many(&self, entities: &[E]) -> Result<(), RepositoryError> {
        entities.iter().try_for_each(|entity| self.put(entity))
    }

    /// Remove the entity stored under `id`, if any.
    fn delete(&self, id: i64) -> Result<(), RepositoryError>;

    /// Remove every listed id.
    fn delete_many(&self, ids: &[i64]) -> Result<(), RepositoryError> {
        ids.iter().try_for_each(|id| self.delete(*id))
    }

    /// Bulk load used by imports; same semantics as [`Self::put_many`].
    fn copy(&self, entities: &[E]) -> Result<(), RepositoryError> {
        self.put_many(entities)
    }
}

/// Access to the replication checkpoint.
pub trait HeaderRepository {
    /// Most recent checkpoint, by replication sequence.
    fn latest(&self) -> Result<Option<Header>, RepositoryError>;

    /// Record a checkpoint.
    fn put(&self, header: &Header) -> Result<(), RepositoryError>;
}

/// The repositories an orchestrator writes to.
#[derive(Clone, Copy)]
pub struct Repositories<'a> {
    /// Node repository.
    pub nodes: &'a dyn Repository<Node>,
    /// Way repository.
    pub ways: &'a dyn Repository<Way>,
    /// Relation repository.
    pub relations: &'a dyn Repository<Relation>,
    /// Checkpoint repository.
    pub headers: &'a dyn HeaderRepository,
}
