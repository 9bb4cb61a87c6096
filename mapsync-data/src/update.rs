//! Changeset replication: apply the changeset that follows the stored
//! checkpoint, then advance the checkpoint.
//!
//! Changesets are applied strictly in sequence. A changeset whose number is
//! not `checkpoint + 1` is rejected before anything is written, and the
//! checkpoint is written only after every element has been applied, so a
//! failure part way leaves the previous checkpoint in place. Re-running the
//! same changeset after such a failure is safe: upserts are idempotent and
//! deleting an absent row is a no-op.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use mapsync_core::{Change, ChangeKind, Entity, EntityKind, Srid};
use thiserror::Error;

use crate::geometry::{
    GeometryMaterializer, LookupError, NodeCoordinates, RelationGeometries, WayReferences,
};
use crate::replication::{ReplicationError, ReplicationSource};
use crate::repository::{Repositories, RepositoryError};

/// Outcome of one applied changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Sequence number now stored as the checkpoint.
    pub sequence: i64,
    /// Elements written or deleted.
    pub applied: u64,
    /// Elements skipped because a newer version was already stored.
    pub skipped: u64,
}

/// Errors returned while applying changesets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpdateError {
    /// No checkpoint has been stored; import a snapshot first.
    #[error("no replication checkpoint is stored")]
    MissingCheckpoint,
    /// The changeset does not immediately follow the checkpoint.
    #[error("changeset {found} does not follow the stored checkpoint (expected {expected})")]
    CheckpointMismatch {
        /// Sequence the checkpoint calls for.
        expected: i64,
        /// Sequence offered.
        found: i64,
    },
    /// Fetching or parsing the changeset failed.
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    /// A geometry lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// Writing to a repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Apply the changes published as `sequence`.
///
/// Geometry is materialized in `target` against the repositories as they
/// stand when each element is applied.
pub fn apply_changeset(
    repositories: Repositories<'_>,
    sequence: i64,
    timestamp: Option<DateTime<Utc>>,
    changes: &[Change],
    target: Srid,
) -> Result<UpdateSummary, UpdateError> {
    let checkpoint = repositories
        .headers
        .latest()?
        .ok_or(UpdateError::MissingCheckpoint)?;
    let expected = checkpoint.replication_sequence + 1;
    if sequence != expected {
        return Err(UpdateError::CheckpointMismatch {
            expected,
            found: sequence,
        });
    }

    let coordinates = NodeCoordinates(repositories.nodes);
    let references = WayReferences(repositories.ways);
    let relations = RelationGeometries::new(repositories.relations, target);
    let materializer = GeometryMaterializer::new(&coordinates, &references, &relations, target);

    let mut summary = UpdateSummary {
        sequence,
        applied: 0,
        skipped: 0,
    };
    for change in changes {
        debug!(
            "applying {} of {} elements",
            change.kind,
            change.elements.len()
        );
        for element in &change.elements {
            let applied = match change.kind {
                ChangeKind::Create | ChangeKind::Modify => {
                    upsert(repositories, &materializer, element.clone())?
                }
                ChangeKind::Delete => {
                    delete(repositories, element)?;
                    true
                }
            };
            if applied {
                summary.applied += 1;
            } else {
                summary.skipped += 1;
            }
        }
    }

    repositories
        .headers
        .put(&checkpoint.advance(sequence, timestamp))?;
    info!(
        "checkpoint advanced to {sequence} ({} applied, {} skipped)",
        summary.applied, summary.skipped
    );
    Ok(summary)
}

/// Fetch and apply the changeset that follows the stored checkpoint.
pub async fn update<S>(
    repositories: Repositories<'_>,
    source: &S,
    target: Srid,
) -> Result<UpdateSummary, UpdateError>
where
    S: ReplicationSource + ?Sized,
{
    let checkpoint = repositories
        .headers
        .latest()?
        .ok_or(UpdateError::MissingCheckpoint)?;
    let sequence = checkpoint.replication_sequence + 1;
    let state = source.state(Some(sequence)).await?;
    let changes = source.changes(sequence).await?;
    apply_changeset(
        repositories,
        sequence,
        Some(state.timestamp),
        &changes,
        target,
    )
}

/// Apply changesets until the checkpoint reaches the newest published
/// sequence.
pub async fn catch_up<S>(
    repositories: Repositories<'_>,
    source: &S,
    target: Srid,
) -> Result<Vec<UpdateSummary>, UpdateError>
where
    S: ReplicationSource + ?Sized,
{
    let latest = source.state(None).await?;
    let mut summaries = Vec::new();
    loop {
        let checkpoint = repositories
            .headers
            .latest()?
            .ok_or(UpdateError::MissingCheckpoint)?;
        if checkpoint.replication_sequence >= latest.sequence {
            break;
        }
        summaries.push(update(repositories, source, target).await?);
    }
    Ok(summaries)
}

fn upsert(
    repositories: Repositories<'_>,
    materializer: &GeometryMaterializer<'_>,
    mut entity: Entity,
) -> Result<bool, UpdateError> {
    let stored = stored_version(repositories, entity.kind(), entity.id())?;
    if let Some(stored) = stored.filter(|stored| *stored > entity.info().version) {
        warn!(
            "skipping {} {} version {}: version {stored} is already stored",
            entity.kind(),
            entity.id(),
            entity.info().version
        );
        return Ok(false);
    }
    materializer.materialize(&mut entity)?;
    match entity {
        Entity::Node(node) => repositories.nodes.put(&node)?,
        Entity::Way(way) => repositories.ways.put(&way)?,
        Entity::Relation(relation) => repositories.relations.put(&relation)?,
    }
    Ok(true)
}

fn delete(repositories: Repositories<'_>, entity: &Entity) -> Result<(), RepositoryError> {
    match entity.kind() {
        EntityKind::Node => repositories.nodes.delete(entity.id()),
        EntityKind::Way => repositories.ways.delete(entity.id()),
        EntityKind::Relation => repositories.relations.delete(entity.id()),
    }
}

fn stored_version(
    repositories: Repositories<'_>,
    kind: EntityKind,
    id: i64,
) -> Result<Option<i32>, RepositoryError> {
    Ok(match kind {
        EntityKind::Node => repositories.nodes.get(id)?.map(|node| node.info.version),
        EntityKind::Way => repositories.ways.get(id)?.map(|way| way.info.version),
        EntityKind::Relation => repositories
            .relations
            .get(id)?
            .map(|relation| relation.info.version),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::StubSource;
    use crate::repository::{HeaderRepository, MemoryDatabase, Repository};
    use geo::{Geometry, line_string};
    use mapsync_core::{Header, Info, Node, Way};
    use rstest::{fixture, rstest};

    #[fixture]
    fn database() -> MemoryDatabase {
        let database = MemoryDatabase::default();
        database
            .headers
            .put(&Header {
                replication_sequence: 10,
                source: Some("test".to_owned()),
                ..Header::default()
            })
            .expect("header");
        database
            .nodes
            .put_many(&[Node::new(1, 0.0, 0.0), Node::new(2, 1.0, 1.0)])
            .expect("nodes");
        database
    }

    fn versioned(mut node: Node, version: i32) -> Entity {
        node.info = Info {
            version,
            ..Info::default()
        };
        Entity::Node(node)
    }

    #[rstest]
    fn out_of_order_changesets_are_rejected_untouched(database: MemoryDatabase) {
        let changes = vec![Change::new(
            ChangeKind::Delete,
            vec![Entity::Node(Node::new(1, 0.0, 0.0))],
        )];
        let result = apply_changeset(database.repositories(), 12, None, &changes, Srid::Wgs84);
        assert!(matches!(
            result,
            Err(UpdateError::CheckpointMismatch {
                expected: 11,
                found: 12
            })
        ));
        assert_eq!(database.nodes.len().expect("len"), 2);
        let latest = database.headers.latest().expect("latest").expect("header");
        assert_eq!(latest.replication_sequence, 10);
    }

    #[rstest]
    fn changes_apply_in_order_and_advance_the_checkpoint(database: MemoryDatabase) {
        let changes = vec![
            Change::new(
                ChangeKind::Create,
                vec![Entity::Way(Way::new(5, vec![1, 2]))],
            ),
            Change::new(ChangeKind::Delete, vec![Entity::Node(Node::new(1, 0.0, 0.0))]),
        ];
        let summary = apply_changeset(database.repositories(), 11, None, &changes, Srid::Wgs84)
            .expect("apply");
        assert_eq!(summary.applied, 2);

        let way = database.ways.get(5).expect("get").expect("way");
        assert_eq!(
            way.geometry,
            Some(Geometry::LineString(line_string![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0)]))
        );
        assert!(database.nodes.get(1).expect("get").is_none());
        let latest = database.headers.latest().expect("latest").expect("header");
        assert_eq!(latest.replication_sequence, 11);
        assert_eq!(latest.source.as_deref(), Some("test"));
    }

    #[rstest]
    fn older_versions_do_not_replace_newer_ones(database: MemoryDatabase) {
        database
            .nodes
            .put(&Node {
                info: Info {
                    version: 4,
                    ..Info::default()
                },
                ..Node::new(3, 5.0, 5.0)
            })
            .expect("node");
        let changes = vec![Change::new(
            ChangeKind::Modify,
            vec![versioned(Node::new(3, 9.0, 9.0), 3)],
        )];
        let summary = apply_changeset(database.repositories(), 11, None, &changes, Srid::Wgs84)
            .expect("apply");
        assert_eq!((summary.applied, summary.skipped), (0, 1));
        let node = database.nodes.get(3).expect("get").expect("node");
        assert_eq!(node.lon, 5.0);
    }

    #[rstest]
    fn a_missing_checkpoint_is_reported() {
        let database = MemoryDatabase::default();
        assert!(matches!(
            apply_changeset(database.repositories(), 1, None, &[], Srid::Wgs84),
            Err(UpdateError::MissingCheckpoint)
        ));
    }

    #[rstest]
    fn catching_up_applies_every_published_changeset(database: MemoryDatabase) {
        let source = StubSource::new()
            .with_changeset(
                11,
                "2024-05-01T10:00:00Z",
                r#"<osmChange><create><node id="7" version="1" lat="1" lon="1"/></create></osmChange>"#,
            )
            .with_changeset(
                12,
                "2024-05-01T11:00:00Z",
                r#"<osmChange><delete><node id="7" version="2"/></delete></osmChange>"#,
            )
            .with_latest(12, "2024-05-01T11:00:00Z");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let summaries = runtime
            .block_on(catch_up(database.repositories(), &source, Srid::Wgs84))
            .expect("catch up");
        let sequences: Vec<i64> = summaries.iter().map(|summary| summary.sequence).collect();
        assert_eq!(sequences, vec![11, 12]);
        assert!(database.nodes.get(7).expect("get").is_none());
        let latest = database.headers.latest().expect("latest").expect("header");
        assert_eq!(
            latest.replication_timestamp.map(|timestamp| timestamp.timestamp()),
            Some(1_714_561_200)
        );
    }
}
