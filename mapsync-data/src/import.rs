//! Snapshot import: decode, materialize and bulk-load a full extract.
//!
//! Blocks are decoded in parallel and consumed in file order. Node
//! coordinates, way node lists and relation geometry are cached for the
//! whole run so a way can resolve nodes from any earlier block. Mapped
//! caches address coordinates directly by node id over sparse segment
//! files; heap caches keep a sorted id column so memory follows the node
//! count rather than the largest id. Entities
//! are written per kind in batches through [`Repository::copy`]; the
//! header checkpoint is staged when read and persisted only after the last
//! batch has landed.

use std::fs::File;
use std::io::{self, BufReader, Read};

use camino::{Utf8Path, Utf8PathBuf};
use geo::{Coord, Rect};
use log::{debug, info, warn};
use mapsync_core::{EntityKind, Header, Node, Relation, Srid, Way};
use tempfile::TempDir;
use thiserror::Error;

use crate::geometry::{GeometryMaterializer, KeyValueLookup, LookupError};
use crate::pbf::{Block, DataBlock, FormatError};
use crate::pipeline::{PipelineOptions, decode_blocks};
use crate::repository::{Repositories, Repository, RepositoryError};
use crate::store::{
    CoordinateCodec, DEFAULT_SEGMENT_SIZE, DenseDataMap, GeometryCodec, HeapMemory,
    LongListCodec, MAPPED_SEGMENT_SIZE, MappedMemory, Memory, MonotonicDataMap, PairedDataMap,
    StoreError,
};

/// Snapshots above this size spill their caches to disk under
/// [`CacheStrategy::Auto`].
pub const AUTO_MAPPED_THRESHOLD: u64 = 1 << 30;

/// Entities written per repository call.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Where the import caches live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Heap segments.
    Heap,
    /// Memory-mapped segment files in the cache directory.
    Mapped,
    /// Mapped for snapshots larger than [`AUTO_MAPPED_THRESHOLD`], heap
    /// otherwise.
    #[default]
    Auto,
}

/// Tuning for [`import_snapshot`] and [`import_reader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    cache_dir: Option<Utf8PathBuf>,
    target: Srid,
    batch_size: usize,
    clean_cache: bool,
    cache_strategy: CacheStrategy,
    segment_size: Option<usize>,
    pipeline: PipelineOptions,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            cache_dir: None,
            target: Srid::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            clean_cache: false,
            cache_strategy: CacheStrategy::default(),
            segment_size: None,
            pipeline: PipelineOptions::default(),
        }
    }
}

impl ImportOptions {
    /// Directory for mapped caches; a temporary directory is used otherwise.
    #[must_use]
    pub fn with_cache_dir(mut self, cache_dir: impl Into<Utf8PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// Reference system of persisted geometry.
    #[must_use]
    pub const fn with_target(mut self, target: Srid) -> Self {
        self.target = target;
        self
    }

    /// Entities per bulk write; zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Remove the cache directory once the import finishes.
    #[must_use]
    pub const fn with_clean_cache(mut self, clean_cache: bool) -> Self {
        self.clean_cache = clean_cache;
        self
    }

    /// Choose where caches live.
    #[must_use]
    pub const fn with_cache_strategy(mut self, cache_strategy: CacheStrategy) -> Self {
        self.cache_strategy = cache_strategy;
        self
    }

    /// Segment size of every cache, a power of two.
    ///
    /// Defaults to [`DEFAULT_SEGMENT_SIZE`] on the heap and
    /// [`MAPPED_SEGMENT_SIZE`] when mapped. Cached values larger than one
    /// segment are skipped.
    #[must_use]
    pub const fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = Some(segment_size);
        self
    }

    /// Tune the decode pipeline.
    #[must_use]
    pub const fn with_pipeline(mut self, pipeline: PipelineOptions) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Reference system of persisted geometry.
    #[must_use]
    pub const fn target(&self) -> Srid {
        self.target
    }

    /// Entities per bulk write.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }
}

/// Outcome of a completed import.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportSummary {
    /// Nodes written, dense nodes included.
    pub nodes: u64,
    /// Ways written.
    pub ways: u64,
    /// Relations written.
    pub relations: u64,
    /// Blocks decoded, the header block included.
    pub blocks: u64,
    /// Checkpoint persisted at the end of the import.
    pub header: Header,
    /// WGS84 box around every valid node coordinate, if any.
    pub bounds: Option<Rect<f64>>,
}

impl ImportSummary {
    fn record_node(&mut self, lon: f64, lat: f64) {
        self.nodes += 1;
        let valid = lon.is_finite()
            && lat.is_finite()
            && (-180.0..=180.0).contains(&lon)
            && (-90.0..=90.0).contains(&lat);
        if !valid {
            return;
        }
        let coordinate = Coord { x: lon, y: lat };
        self.bounds = Some(match self.bounds {
            Some(existing) => Rect::new(
                Coord {
                    x: existing.min().x.min(lon),
                    y: existing.min().y.min(lat),
                },
                Coord {
                    x: existing.max().x.max(lon),
                    y: existing.max().y.max(lat),
                },
            ),
            None => Rect::new(coordinate, coordinate),
        });
    }
}

/// Errors returned when importing a snapshot.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ImportError {
    /// The snapshot could not be opened.
    #[error("failed to open snapshot at {path}")]
    Open {
        /// Snapshot path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The snapshot is malformed.
    #[error(transparent)]
    Format(#[from] FormatError),
    /// A cache could not be created or written.
    #[error("import cache failed")]
    Cache(#[from] StoreError),
    /// A temporary cache directory could not be created.
    #[error("failed to create a temporary cache directory")]
    TempDir(#[source] io::Error),
    /// Removing the cache directory failed.
    #[error("failed to remove cache directory {path}")]
    CleanCache {
        /// Cache directory.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A geometry lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),
    /// Writing to a repository failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Import the snapshot at `path` into `repositories`.
///
/// # Examples
/// ```no_run
/// use camino::Utf8Path;
/// use mapsync_data::import::{ImportOptions, import_snapshot};
/// use mapsync_data::repository::SqliteDatabase;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let database = SqliteDatabase::open(Utf8Path::new("berlin.sqlite"))?;
/// let summary = import_snapshot(
///     Utf8Path::new("berlin.osm.pbf"),
///     database.repositories(),
///     &ImportOptions::default(),
/// )?;
/// println!("imported {} nodes", summary.nodes);
/// # Ok(())
/// # }
/// ```
pub fn import_snapshot(
    path: &Utf8Path,
    repositories: Repositories<'_>,
    options: &ImportOptions,
) -> Result<ImportSummary, ImportError> {
    let open_error = |source| ImportError::Open {
        path: path.to_path_buf(),
        source,
    };
    let size = mapsync_fs::file_len(path).map_err(open_error)?;
    let file = File::open(path.as_std_path()).map_err(open_error)?;
    let mapped = match options.cache_strategy {
        CacheStrategy::Heap => false,
        CacheStrategy::Mapped => true,
        CacheStrategy::Auto => size > AUTO_MAPPED_THRESHOLD,
    };
    import_with(BufReader::new(file), mapped, repositories, options)
}

/// Import a snapshot read from `reader`.
///
/// [`CacheStrategy::Auto`] keeps caches on the heap because the size of
/// the stream is unknown.
pub fn import_reader<R: Read>(
    reader: R,
    repositories: Repositories<'_>,
    options: &ImportOptions,
) -> Result<ImportSummary, ImportError> {
    let mapped = options.cache_strategy == CacheStrategy::Mapped;
    import_with(reader, mapped, repositories, options)
}

fn import_with<R: Read>(
    reader: R,
    mapped: bool,
    repositories: Repositories<'_>,
    options: &ImportOptions,
) -> Result<ImportSummary, ImportError> {
    let summary = {
        let mut caches = Caches::create(mapped, options)?;
        let mut import = Import::new(repositories, options);
        let mut blocks = decode_blocks(reader, options.pipeline);
        let first = blocks
            .next()
            .transpose()?
            .ok_or_else(|| FormatError::MissingHeader {
                offset: 0,
                found: "end of stream".to_owned(),
            })?;
        match first.block {
            Block::Header(header) => import.stage(header.header),
            Block::Data(_) => {
                return Err(FormatError::MissingHeader {
                    offset: first.info.offset,
                    found: first.info.kind,
                }
                .into());
            }
        }
        for decoded in blocks {
            let decoded = decoded?;
            debug!(
                "decoded {} block at byte offset {}",
                decoded.info.kind, decoded.info.offset
            );
            match decoded.block {
                Block::Header(_) => {
                    warn!(
                        "ignoring additional header block at byte offset {}",
                        decoded.info.offset
                    );
                    import.summary.blocks += 1;
                }
                Block::Data(block) => import.process(block, &mut caches)?,
            }
        }
        import.finish()?
    };
    if options.clean_cache {
        if let Some(path) = options.cache_dir.as_deref() {
            mapsync_fs::remove_dir_if_exists(path).map_err(|source| ImportError::CleanCache {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    info!(
        "imported {} nodes, {} ways and {} relations at sequence {}",
        summary.nodes, summary.ways, summary.relations, summary.header.replication_sequence
    );
    Ok(summary)
}

type Segments = Box<dyn Memory>;

/// Node coordinates, direct-addressed when mapped and sorted on the heap.
enum CoordinateCache {
    Dense(DenseDataMap<CoordinateCodec, Segments>),
    Sorted(MonotonicDataMap<CoordinateCodec, Segments, Segments>),
}

impl CoordinateCache {
    fn put(&mut self, key: i64, value: &Coord<f64>) -> Result<(), StoreError> {
        match self {
            Self::Dense(map) => map.put(key, value),
            Self::Sorted(map) => map.put(key, value),
        }
    }
}

impl KeyValueLookup<Coord<f64>> for CoordinateCache {
    fn get(&self, key: i64) -> Result<Option<Coord<f64>>, LookupError> {
        Ok(match self {
            Self::Dense(map) => map.get(key),
            Self::Sorted(map) => map.get(key),
        })
    }
}

/// Caches that live for the whole import.
struct Caches {
    coordinates: CoordinateCache,
    references: PairedDataMap<LongListCodec, Segments, Segments>,
    relations: PairedDataMap<GeometryCodec, Segments, Segments>,
    // Holds the scratch directory open until the caches are dropped.
    _scratch: Option<TempDir>,
}

impl Caches {
    fn create(mapped: bool, options: &ImportOptions) -> Result<Self, ImportError> {
        let mut scratch = None;
        let root = match (mapped, options.cache_dir.as_deref()) {
            (false, _) => None,
            (true, Some(dir)) => Some(dir.to_path_buf()),
            (true, None) => {
                let dir = TempDir::new().map_err(ImportError::TempDir)?;
                let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|_| {
                    ImportError::TempDir(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "temporary directory path is not UTF-8",
                    ))
                })?;
                scratch = Some(dir);
                Some(path)
            }
        };
        let segment_size = options.segment_size.unwrap_or(if mapped {
            MAPPED_SEGMENT_SIZE
        } else {
            DEFAULT_SEGMENT_SIZE
        });
        let memory = |name: &str| -> Result<Segments, StoreError> {
            match &root {
                Some(root) => Ok(Box::new(MappedMemory::create(&root.join(name), segment_size)?)),
                None => Ok(Box::new(HeapMemory::new(segment_size)?)),
            }
        };
        let coordinates = if root.is_some() {
            CoordinateCache::Dense(DenseDataMap::new(CoordinateCodec, memory("coordinates")?)?)
        } else {
            CoordinateCache::Sorted(MonotonicDataMap::new(
                CoordinateCodec,
                memory("coordinate_keys")?,
                memory("coordinate_values")?,
            )?)
        };
        Ok(Self {
            coordinates,
            references: PairedDataMap::new(
                LongListCodec,
                memory("references_index")?,
                memory("references_log")?,
            )?,
            relations: PairedDataMap::new(
                GeometryCodec,
                memory("relations_index")?,
                memory("relations_log")?,
            )?,
            _scratch: scratch,
        })
    }

    fn materializer(&self, target: Srid) -> GeometryMaterializer<'_> {
        GeometryMaterializer::new(&self.coordinates, &self.references, &self.relations, target)
    }
}

/// Per-run accumulator: pending batches, counters and the staged header.
struct Import<'a> {
    repositories: Repositories<'a>,
    target: Srid,
    batch_size: usize,
    nodes: Vec<Node>,
    ways: Vec<Way>,
    relations: Vec<Relation>,
    staged: Option<Header>,
    summary: ImportSummary,
}

impl<'a> Import<'a> {
    fn new(repositories: Repositories<'a>, options: &ImportOptions) -> Self {
        Self {
            repositories,
            target: options.target,
            batch_size: options.batch_size,
            nodes: Vec::with_capacity(options.batch_size),
            ways: Vec::with_capacity(options.batch_size),
            relations: Vec::with_capacity(options.batch_size),
            staged: None,
            summary: ImportSummary::default(),
        }
    }

    fn stage(&mut self, header: Header) {
        debug!(
            "staged checkpoint at sequence {}",
            header.replication_sequence
        );
        self.staged = Some(header);
        self.summary.blocks += 1;
    }

    fn process(&mut self, block: DataBlock, caches: &mut Caches) -> Result<(), ImportError> {
        self.summary.blocks += 1;
        let DataBlock {
            dense_nodes,
            nodes,
            ways,
            relations,
        } = block;

        let nodes: Vec<Node> = dense_nodes.into_iter().chain(nodes).collect();
        for node in &nodes {
            cached(
                EntityKind::Node,
                node.id,
                caches.coordinates.put(
                    node.id,
                    &Coord {
                        x: node.lon,
                        y: node.lat,
                    },
                ),
            )?;
        }
        {
            let materializer = caches.materializer(self.target);
            for mut node in nodes {
                materializer.materialize_node(&mut node);
                self.summary.record_node(node.lon, node.lat);
                self.nodes.push(node);
                if self.nodes.len() >= self.batch_size {
                    flush(self.repositories.nodes, &mut self.nodes)?;
                }
            }
        }

        for way in &ways {
            cached(
                EntityKind::Way,
                way.id,
                caches.references.put(way.id, &way.nodes),
            )?;
        }
        {
            let materializer = caches.materializer(self.target);
            for mut way in ways {
                materializer.materialize_way(&mut way)?;
                self.summary.ways += 1;
                self.ways.push(way);
                if self.ways.len() >= self.batch_size {
                    flush(self.repositories.ways, &mut self.ways)?;
                }
            }
        }

        for mut relation in relations {
            let geometry = caches
                .materializer(self.target)
                .relation_geometry(&relation)?;
            if let Some(geometry) = &geometry {
                cached(
                    EntityKind::Relation,
                    relation.id,
                    caches.relations.put(relation.id, geometry),
                )?;
            }
            relation.geometry = geometry.and_then(|geometry| {
                caches
                    .materializer(self.target)
                    .reproject(EntityKind::Relation, relation.id, &geometry)
            });
            self.summary.relations += 1;
            self.relations.push(relation);
            if self.relations.len() >= self.batch_size {
                flush(self.repositories.relations, &mut self.relations)?;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<ImportSummary, ImportError> {
        flush(self.repositories.nodes, &mut self.nodes)?;
        flush(self.repositories.ways, &mut self.ways)?;
        flush(self.repositories.relations, &mut self.relations)?;
        let header = self.staged.take().unwrap_or_default();
        self.repositories.headers.put(&header)?;
        self.summary.header = header;
        Ok(self.summary)
    }
}

fn flush<E>(repository: &dyn Repository<E>, batch: &mut Vec<E>) -> Result<(), RepositoryError> {
    if batch.is_empty() {
        return Ok(());
    }
    debug!("writing batch of {} entities", batch.len());
    repository.copy(batch)?;
    batch.clear();
    Ok(())
}

/// Keys and values the caches cannot hold are skipped; they surface later
/// as lookup gaps.
fn cached(kind: EntityKind, id: i64, result: Result<(), StoreError>) -> Result<(), StoreError> {
    match result {
        Err(
            err @ (StoreError::NegativeKey { .. }
            | StoreError::UnorderedKey { .. }
            | StoreError::ValueTooLarge { .. }),
        ) => {
            warn!("not caching {kind} {id}: {err}");
            Ok(())
        }
        other => other,
    }
}
