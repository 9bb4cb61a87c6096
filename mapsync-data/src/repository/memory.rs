//! In-memory repositories for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use mapsync_core::{Header, Node, Relation, Way};

use super::{HeaderRepository, Repositories, Repository, RepositoryError};

/// Entities that carry their own key.
pub trait Identified {
    /// Repository key.
    fn id(&self) -> i64;
}

impl Identified for Node {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Identified for Way {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Identified for Relation {
    fn id(&self) -> i64 {
        self.id
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RepositoryError {
    RepositoryError::Unavailable {
        message: "lock poisoned".to_owned(),
    }
}

/// Entities held in an ordered map.
#[derive(Debug)]
pub struct MemoryRepository<E> {
    entities: RwLock<BTreeMap<i64, E>>,
}

impl<E> Default for MemoryRepository<E> {
    fn default() -> Self {
        Self {
            entities: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<E: Clone> MemoryRepository<E> {
    /// Every stored entity, ordered by id.
    pub fn entities(&self) -> Result<Vec<E>, RepositoryError> {
        Ok(self
            .entities
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect())
    }

    /// Number of stored entities.
    pub fn len(&self) -> Result<usize, RepositoryError> {
        Ok(self.entities.read().map_err(poisoned)?.len())
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> Result<bool, RepositoryError> {
        Ok(self.len()? == 0)
    }
}

impl<E: Clone + Identified> Repository<E> for MemoryRepository<E> {
    fn get(&self, id: i64) -> Result<Option<E>, RepositoryError> {
        Ok(self.entities.read().map_err(poisoned)?.get(&id).cloned())
    }

    fn put(&self, entity: &E) -> Result<(), RepositoryError> {
        self.entities
            .write()
            .map_err(poisoned)?
            .insert(entity.id(), entity.clone());
        Ok(())
    }

    fn put_many(&self, entities: &[E]) -> Result<(), RepositoryError> {
        let mut map = self.entities.write().map_err(poisoned)?;
        for entity in entities {
            map.insert(entity.id(), entity.clone());
        }
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.entities.write().map_err(poisoned)?.remove(&id);
        Ok(())
    }
}

/// Checkpoints held in memory.
#[derive(Debug, Default)]
pub struct MemoryHeaders {
    headers: RwLock<BTreeMap<i64, Header>>,
}

impl HeaderRepository for MemoryHeaders {
    fn latest(&self) -> Result<Option<Header>, RepositoryError> {
        Ok(self
            .headers
            .read()
            .map_err(poisoned)?
            .values()
            .next_back()
            .cloned())
    }

    fn put(&self, header: &Header) -> Result<(), RepositoryError> {
        self.headers
            .write()
            .map_err(poisoned)?
            .insert(header.replication_sequence, header.clone());
        Ok(())
    }
}

/// A full set of in-memory repositories.
///
/// # Examples
/// ```
/// use mapsync_core::Node;
/// use mapsync_data::repository::{MemoryDatabase, Repository};
///
/// let database = MemoryDatabase::default();
/// database.nodes.put(&Node::new(1, 0.0, 0.0))?;
/// assert!(database.repositories().nodes.get(1)?.is_some());
/// # Ok::<(), mapsync_data::repository::RepositoryError>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    /// Nodes.
    pub nodes: MemoryRepository<Node>,
    /// Ways.
    pub ways: MemoryRepository<Way>,
    /// Relations.
    pub relations: MemoryRepository<Relation>,
    /// Checkpoints.
    pub headers: MemoryHeaders,
}

impl MemoryDatabase {
    /// Borrow the repositories as trait objects.
    #[must_use]
    pub fn repositories(&self) -> Repositories<'_> {
        Repositories {
            nodes: &self.nodes,
            ways: &self.ways,
            relations: &self.relations,
            headers: &self.headers,
        }
    }
}
