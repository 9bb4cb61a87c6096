//! SQLite persistence for entities and checkpoints.
//!
//! One table per entity kind plus `headers`. Tags, way node lists and
//! relation members are JSON text; geometry is a blob in the
//! [`GeometryCodec`] format; timestamps are RFC 3339 text. Writes use
//! `INSERT OR REPLACE` inside a transaction, so a batch lands whole or not
//! at all.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use geo::Geometry;
use mapsync_core::{Header, Info, Member, Node, Relation, Tags, Way};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::{HeaderRepository, Repositories, Repository, RepositoryError};
use crate::store::{GeometryCodec, VariableSizeCodec};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY,
        version INTEGER NOT NULL,
        uid INTEGER NOT NULL,
        timestamp TEXT,
        changeset INTEGER NOT NULL,
        tags TEXT NOT NULL,
        lon REAL NOT NULL,
        lat REAL NOT NULL,
        geom BLOB
    );
    CREATE TABLE IF NOT EXISTS ways (
        id INTEGER PRIMARY KEY,
        version INTEGER NOT NULL,
        uid INTEGER NOT NULL,
        timestamp TEXT,
        changeset INTEGER NOT NULL,
        tags TEXT NOT NULL,
        nodes TEXT NOT NULL,
        geom BLOB
    );
    CREATE TABLE IF NOT EXISTS relations (
        id INTEGER PRIMARY KEY,
        version INTEGER NOT NULL,
        uid INTEGER NOT NULL,
        timestamp TEXT,
        changeset INTEGER NOT NULL,
        tags TEXT NOT NULL,
        members TEXT NOT NULL,
        geom BLOB
    );
    CREATE TABLE IF NOT EXISTS headers (
        replication_sequence INTEGER PRIMARY KEY,
        replication_timestamp TEXT,
        replication_url TEXT,
        source TEXT,
        writing_program TEXT
    );
";

/// Entities and checkpoints persisted in one SQLite database.
///
/// # Examples
/// ```
/// use mapsync_core::Node;
/// use mapsync_data::repository::{Repository, SqliteDatabase};
///
/// let database = SqliteDatabase::open_in_memory()?;
/// database.put(&Node::new(1, 13.4, 52.5))?;
/// let node: Option<Node> = database.get(1)?;
/// assert_eq!(node.map(|node| node.lat), Some(52.5));
/// # Ok::<(), mapsync_data::repository::RepositoryError>(())
/// ```
pub struct SqliteDatabase {
    path: Option<Utf8PathBuf>,
    connection: Connection,
}

impl fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    /// Open or create the database at `path`, creating parent directories
    /// and tables as needed.
    pub fn open(path: &Utf8Path) -> Result<Self, RepositoryError> {
        mapsync_fs::ensure_parent_dir(path).map_err(|source| {
            RepositoryError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let connection =
            Connection::open(path.as_std_path()).map_err(|source| RepositoryError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Self::with_connection(Some(path.to_path_buf()), connection)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        let connection = Connection::open_in_memory().map_err(|source| RepositoryError::Open {
            path: Utf8PathBuf::from(":memory:"),
            source,
        })?;
        Self::with_connection(None, connection)
    }

    fn with_connection(
        path: Option<Utf8PathBuf>,
        connection: Connection,
    ) -> Result<Self, RepositoryError> {
        connection
            .execute_batch(SCHEMA)
            .map_err(|source| RepositoryError::Query {
                operation: "create schema",
                table: "all",
                source,
            })?;
        Ok(Self { path, connection })
    }

    /// Borrow the database as a set of repositories.
    #[must_use]
    pub fn repositories(&self) -> Repositories<'_> {
        Repositories {
            nodes: self,
            ways: self,
            relations: self,
            headers: self,
        }
    }

    fn select<R: Row>(&self, id: i64) -> Result<Option<R>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1",
            R::COLUMNS.join(", "),
            R::TABLE
        );
        let query_error = |source| RepositoryError::Query {
            operation: "select",
            table: R::TABLE,
            source,
        };
        let mut statement = self.connection.prepare_cached(&sql).map_err(query_error)?;
        let values = statement
            .query_row([id], |row| {
                (0..R::COLUMNS.len())
                    .map(|index| row.get::<_, Value>(index))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .optional()
            .map_err(query_error)?;
        values
            .map(|values| R::from_columns(&mut Columns::new(R::TABLE, values)))
            .transpose()
    }

    fn upsert<R: Row>(&self, rows: &[R]) -> Result<(), RepositoryError> {
        if rows.is_empty() {
            return Ok(());
        }
        let query_error = |operation| {
            move |source| RepositoryError::Query {
                operation,
                table: R::TABLE,
                source,
            }
        };
        let placeholders: Vec<String> = (1..=R::COLUMNS.len())
            .map(|index| format!("?{index}"))
            .collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            R::TABLE,
            R::COLUMNS.join(", "),
            placeholders.join(", ")
        );
        let transaction = self
            .connection
            .unchecked_transaction()
            .map_err(query_error("begin transaction"))?;
        {
            let mut statement = transaction
                .prepare_cached(&sql)
                .map_err(query_error("prepare insert"))?;
            for row in rows {
                statement
                    .execute(params_from_iter(row.values()?))
                    .map_err(query_error("insert"))?;
            }
        }
        transaction.commit().map_err(query_error("commit"))
    }

    fn remove<R: Row>(&self, ids: &[i64]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let query_error = |operation| {
            move |source| RepositoryError::Query {
                operation,
                table: R::TABLE,
                source,
            }
        };
        let sql = format!("DELETE FROM {} WHERE id = ?1", R::TABLE);
        let transaction = self
            .connection
            .unchecked_transaction()
            .map_err(query_error("begin transaction"))?;
        {
            let mut statement = transaction
                .prepare_cached(&sql)
                .map_err(query_error("prepare delete"))?;
            for id in ids {
                statement.execute([id]).map_err(query_error("delete"))?;
            }
        }
        transaction.commit().map_err(query_error("commit"))
    }
}

macro_rules! sqlite_repository {
    ($entity:ty) => {
        impl Repository<$entity> for SqliteDatabase {
            fn get(&self, id: i64) -> Result<Option<$entity>, RepositoryError> {
                self.select(id)
            }

            fn put(&self, entity: &$entity) -> Result<(), RepositoryError> {
                self.upsert(std::slice::from_ref(entity))
            }

            fn put_many(&self, entities: &[$entity]) -> Result<(), RepositoryError> {
                self.upsert(entities)
            }

            fn delete(&self, id: i64) -> Result<(), RepositoryError> {
                self.remove::<$entity>(&[id])
            }

            fn delete_many(&self, ids: &[i64]) -> Result<(), RepositoryError> {
                self.remove::<$entity>(ids)
            }

            fn copy(&self, entities: &[$entity]) -> Result<(), RepositoryError> {
                self.upsert(entities)
            }
        }
    };
}

sqlite_repository!(Node);
sqlite_repository!(Way);
sqlite_repository!(Relation);

impl HeaderRepository for SqliteDatabase {
    fn latest(&self) -> Result<Option<Header>, RepositoryError> {
        let query_error = |source| RepositoryError::Query {
            operation: "select",
            table: "headers",
            source,
        };
        let row = self
            .connection
            .query_row(
                "SELECT replication_sequence, replication_timestamp, replication_url, source, \
                 writing_program FROM headers ORDER BY replication_sequence DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(query_error)?;
        row.map(|(sequence, timestamp, url, source, program)| {
            Ok(Header {
                replication_sequence: sequence,
                replication_timestamp: timestamp
                    .map(|text| parse_timestamp("headers", sequence, &text))
                    .transpose()?,
                replication_url: url,
                source,
                writing_program: program,
            })
        })
        .transpose()
    }

    fn put(&self, header: &Header) -> Result<(), RepositoryError> {
        self.connection
            .execute(
                "INSERT OR REPLACE INTO headers (replication_sequence, replication_timestamp, \
                 replication_url, source, writing_program) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    header.replication_sequence,
                    header.replication_timestamp.as_ref().map(format_timestamp),
                    header.replication_url.as_deref(),
                    header.source.as_deref(),
                    header.writing_program.as_deref(),
                ),
            )
            .map(|_| ())
            .map_err(|source| RepositoryError::Query {
                operation: "insert",
                table: "headers",
                source,
            })
    }
}

/// Mapping between an entity and its table row.
trait Row: Sized {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];

    fn values(&self) -> Result<Vec<Value>, RepositoryError>;

    fn from_columns(columns: &mut Columns) -> Result<Self, RepositoryError>;
}

impl Row for Node {
    const TABLE: &'static str = "nodes";
    const COLUMNS: &'static [&'static str] = &[
        "id", "version", "uid", "timestamp", "changeset", "tags", "lon", "lat", "geom",
    ];

    fn values(&self) -> Result<Vec<Value>, RepositoryError> {
        let mut values = common_values(Self::TABLE, self.id, &self.info, &self.tags)?;
        values.extend([
            Value::Real(self.lon),
            Value::Real(self.lat),
            geometry_value(self.geometry.as_ref()),
        ]);
        Ok(values)
    }

    fn from_columns(columns: &mut Columns) -> Result<Self, RepositoryError> {
        Ok(Self {
            id: columns.id,
            info: columns.info()?,
            tags: columns.json()?,
            lon: columns.real()?,
            lat: columns.real()?,
            geometry: columns.geometry()?,
        })
    }
}

impl Row for Way {
    const TABLE: &'static str = "ways";
    const COLUMNS: &'static [&'static str] = &[
        "id", "version", "uid", "timestamp", "changeset", "tags", "nodes", "geom",
    ];

    fn values(&self) -> Result<Vec<Value>, RepositoryError> {
        let mut values = common_values(Self::TABLE, self.id, &self.info, &self.tags)?;
        values.extend([
            json_value(Self::TABLE, self.id, &self.nodes)?,
            geometry_value(self.geometry.as_ref()),
        ]);
        Ok(values)
    }

    fn from_columns(columns: &mut Columns) -> Result<Self, RepositoryError> {
        Ok(Self {
            id: columns.id,
            info: columns.info()?,
            tags: columns.json()?,
            nodes: columns.json()?,
            geometry: columns.geometry()?,
        })
    }
}

impl Row for Relation {
    const TABLE: &'static str = "relations";
    const COLUMNS: &'static [&'static str] = &[
        "id", "version", "uid", "timestamp", "changeset", "tags", "members", "geom",
    ];

    fn values(&self) -> Result<Vec<Value>, RepositoryError> {
        let mut values = common_values(Self::TABLE, self.id, &self.info, &self.tags)?;
        values.extend([
            json_value(Self::TABLE, self.id, &self.members)?,
            geometry_value(self.geometry.as_ref()),
        ]);
        Ok(values)
    }

    fn from_columns(columns: &mut Columns) -> Result<Self, RepositoryError> {
        Ok(Self {
            id: columns.id,
            info: columns.info()?,
            tags: columns.json()?,
            members: columns.json::<Vec<Member>>()?,
            geometry: columns.geometry()?,
        })
    }
}

fn common_values(
    table: &'static str,
    id: i64,
    info: &Info,
    tags: &Tags,
) -> Result<Vec<Value>, RepositoryError> {
    Ok(vec![
        Value::Integer(id),
        Value::Integer(i64::from(info.version)),
        Value::Integer(i64::from(info.uid)),
        info.timestamp
            .as_ref()
            .map_or(Value::Null, |timestamp| Value::Text(format_timestamp(timestamp))),
        Value::Integer(info.changeset),
        json_value(table, id, tags)?,
    ])
}

fn json_value<T: Serialize>(table: &'static str, id: i64, value: &T) -> Result<Value, RepositoryError> {
    serde_json::to_string(value)
        .map(Value::Text)
        .map_err(|source| RepositoryError::Json { table, id, source })
}

fn geometry_value(geometry: Option<&Geometry<f64>>) -> Value {
    geometry.map_or(Value::Null, |geometry| {
        let mut blob = Vec::with_capacity(GeometryCodec.encoded_len(geometry));
        GeometryCodec.encode(geometry, &mut blob);
        Value::Blob(blob)
    })
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(
    table: &'static str,
    id: i64,
    text: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(text)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Corrupt {
            table,
            id,
            reason: format!("invalid timestamp {text:?}: {err}"),
        })
}

/// Sequential reader over the columns of one row.
struct Columns {
    table: &'static str,
    id: i64,
    values: std::vec::IntoIter<Value>,
}

impl Columns {
    fn new(table: &'static str, values: Vec<Value>) -> Self {
        let mut values = values.into_iter();
        let id = match values.next() {
            Some(Value::Integer(id)) => id,
            _ => 0,
        };
        Self { table, id, values }
    }

    fn corrupt(&self, expected: &str, found: &Value) -> RepositoryError {
        RepositoryError::Corrupt {
            table: self.table,
            id: self.id,
            reason: format!("expected {expected}, found {found:?}"),
        }
    }

    fn next(&mut self) -> Value {
        self.values.next().unwrap_or(Value::Null)
    }

    fn integer(&mut self) -> Result<i64, RepositoryError> {
        match self.next() {
            Value::Integer(value) => Ok(value),
            other => Err(self.corrupt("integer", &other)),
        }
    }

    fn small_integer(&mut self) -> Result<i32, RepositoryError> {
        let value = self.integer()?;
        i32::try_from(value).map_err(|_| self.corrupt("32-bit integer", &Value::Integer(value)))
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "SQLite returns whole-number reals as integers, which are small coordinates"
    )]
    fn real(&mut self) -> Result<f64, RepositoryError> {
        match self.next() {
            Value::Real(value) => Ok(value),
            Value::Integer(value) => Ok(value as f64),
            other => Err(self.corrupt("real", &other)),
        }
    }

    fn optional_text(&mut self) -> Result<Option<String>, RepositoryError> {
        match self.next() {
            Value::Null => Ok(None),
            Value::Text(text) => Ok(Some(text)),
            other => Err(self.corrupt("text", &other)),
        }
    }

    fn info(&mut self) -> Result<Info, RepositoryError> {
        let version = self.small_integer()?;
        let uid = self.small_integer()?;
        let timestamp = self
            .optional_text()?
            .map(|text| parse_timestamp(self.table, self.id, &text))
            .transpose()?;
        let changeset = self.integer()?;
        Ok(Info {
            version,
            timestamp,
            changeset,
            uid,
        })
    }

    fn json<T: DeserializeOwned>(&mut self) -> Result<T, RepositoryError> {
        let text = self
            .optional_text()?
            .ok_or_else(|| self.corrupt("JSON text", &Value::Null))?;
        serde_json::from_str(&text).map_err(|source| RepositoryError::Json {
            table: self.table,
            id: self.id,
            source,
        })
    }

    fn geometry(&mut self) -> Result<Option<Geometry<f64>>, RepositoryError> {
        match self.next() {
            Value::Null => Ok(None),
            Value::Blob(blob) => GeometryCodec
                .decode(&blob)
                .map(Some)
                .map_err(|source| RepositoryError::Geometry {
                    table: self.table,
                    id: self.id,
                    source,
                }),
            other => Err(self.corrupt("geometry blob", &other)),
        }
    }
}
