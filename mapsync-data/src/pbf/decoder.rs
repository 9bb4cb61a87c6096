//! Turns framed blobs into typed blocks.
//!
//! Responsibilities:
//! - inflate the blob payload and check it against the declared size;
//! - decode header blocks into a [`Header`] and optional [`Bound`];
//! - decode data blocks, resolving delta encoding, fixed-point coordinates
//!   and string table references.
//!
//! Boundaries: the decoder is pure; it never touches caches or repositories.
//!
//! Invariants: groups are visited dense nodes first, then plain nodes, ways
//! and relations, and each list keeps file order.

use std::io::Read;

use chrono::{DateTime, Utc};
use flate2::read::ZlibDecoder;
use mapsync_core::{Bound, Element, EntityKind, Header, Info, Member, Node, Relation, Tags, Way};
use prost::Message;

use super::framer::{BlobInfo, HEADER_TYPE, RawBlob};
use super::{FormatError, proto};

const SUPPORTED_FEATURES: [&str; 2] = ["OsmSchema-V0.6", "DenseNodes"];
const NANODEGREES: f64 = 1_000_000_000.0;

/// Contents of a decoded blob.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// The snapshot header.
    Header(HeaderBlock),
    /// A batch of entities.
    Data(DataBlock),
}

/// Decoded `OSMHeader` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderBlock {
    /// Replication checkpoint and provenance.
    pub header: Header,
    /// Declared bounding box, when present.
    pub bound: Option<Bound>,
}

/// Decoded `OSMData` payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataBlock {
    /// Nodes from dense groups.
    pub dense_nodes: Vec<Node>,
    /// Nodes from plain groups.
    pub nodes: Vec<Node>,
    /// Ways.
    pub ways: Vec<Way>,
    /// Relations.
    pub relations: Vec<Relation>,
}

impl DataBlock {
    /// Total number of entities in the block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dense_nodes.len() + self.nodes.len() + self.ways.len() + self.relations.len()
    }

    /// Whether the block holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A block tagged with the blob it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    /// Provenance of the block.
    pub info: BlobInfo,
    /// Decoded contents.
    pub block: Block,
}

impl DecodedBlock {
    /// Flatten the block into elements, keeping the group visiting order.
    pub fn into_elements(self) -> Box<dyn Iterator<Item = Element>> {
        match self.block {
            Block::Header(HeaderBlock { header, bound }) => Box::new(
                std::iter::once(Element::Header(header)).chain(bound.map(Element::Bound)),
            ),
            Block::Data(data) => Box::new(
                data.dense_nodes
                    .into_iter()
                    .chain(data.nodes)
                    .map(Element::Node)
                    .chain(data.ways.into_iter().map(Element::Way))
                    .chain(data.relations.into_iter().map(Element::Relation)),
            ),
        }
    }
}

/// Decode a framed blob.
pub fn decode_blob(blob: RawBlob) -> Result<DecodedBlock, FormatError> {
    let offset = blob.info.offset;
    let payload = inflate(&blob.data, offset)?;
    let block = if blob.info.kind == HEADER_TYPE {
        Block::Header(decode_header(&payload, offset)?)
    } else {
        Block::Data(decode_data(&payload, offset)?)
    };
    Ok(DecodedBlock {
        info: blob.info,
        block,
    })
}

fn inflate(data: &[u8], offset: u64) -> Result<Vec<u8>, FormatError> {
    let blob = proto::Blob::decode(data).map_err(|source| FormatError::Message {
        what: "blob",
        offset,
        source,
    })?;
    let declared = blob
        .raw_size
        .map(|size| {
            u64::try_from(size).map_err(|_| FormatError::InvalidSize {
                what: "raw payload",
                offset,
                size: i64::from(size),
                limit: u64::from(u32::MAX),
            })
        })
        .transpose()?;

    let payload = if let Some(raw) = blob.raw {
        raw
    } else if let Some(compressed) = blob.zlib_data {
        let capacity = declared
            .and_then(|size| usize::try_from(size).ok())
            .unwrap_or_default();
        let mut inflated = Vec::with_capacity(capacity);
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|source| FormatError::Inflate { offset, source })?;
        inflated
    } else if blob.lzma_data.is_some() {
        return Err(unsupported(offset, "lzma"));
    } else if blob.lz4_data.is_some() {
        return Err(unsupported(offset, "lz4"));
    } else if blob.zstd_data.is_some() {
        return Err(unsupported(offset, "zstd"));
    } else {
        return Err(unsupported(offset, "unknown"));
    };

    let actual = u64::try_from(payload.len()).unwrap_or(u64::MAX);
    match declared {
        Some(declared) if declared != actual => Err(FormatError::SizeMismatch {
            offset,
            declared,
            actual,
        }),
        _ => Ok(payload),
    }
}

fn unsupported(offset: u64, compression: &'static str) -> FormatError {
    FormatError::UnsupportedCompression {
        offset,
        compression,
    }
}

fn decode_header(payload: &[u8], offset: u64) -> Result<HeaderBlock, FormatError> {
    let block = proto::HeaderBlock::decode(payload).map_err(|source| FormatError::Message {
        what: "header block",
        offset,
        source,
    })?;
    if let Some(feature) = block
        .required_features
        .iter()
        .find(|feature| !SUPPORTED_FEATURES.contains(&feature.as_str()))
    {
        return Err(FormatError::UnsupportedFeature {
            offset,
            feature: feature.clone(),
        });
    }
    let bound = block.bbox.map(|bbox| Bound {
        min_lon: nanodegrees(bbox.left),
        max_lon: nanodegrees(bbox.right),
        max_lat: nanodegrees(bbox.top),
        min_lat: nanodegrees(bbox.bottom),
    });
    let header = Header {
        replication_sequence: block.osmosis_replication_sequence_number.unwrap_or_default(),
        replication_timestamp: block
            .osmosis_replication_timestamp
            .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0)),
        replication_url: block.osmosis_replication_base_url,
        source: block.source,
        writing_program: block.writingprogram,
    };
    Ok(HeaderBlock { header, bound })
}

fn decode_data(payload: &[u8], offset: u64) -> Result<DataBlock, FormatError> {
    let block = proto::PrimitiveBlock::decode(payload).map_err(|source| FormatError::Message {
        what: "primitive block",
        offset,
        source,
    })?;
    let context = BlockContext::new(&block, offset)?;
    let mut data = DataBlock::default();
    for group in &block.primitivegroup {
        if let Some(dense) = &group.dense {
            context.dense_nodes(dense, &mut data.dense_nodes)?;
        }
        for node in &group.nodes {
            data.nodes.push(context.node(node)?);
        }
        for way in &group.ways {
            data.ways.push(context.way(way)?);
        }
        for relation in &group.relations {
            data.relations.push(context.relation(relation)?);
        }
    }
    Ok(data)
}

/// Running sums over a delta-encoded column.
///
/// Consecutive zero deltas repeat the previous value rather than being
/// collapsed.
pub fn delta_decode(deltas: &[i64]) -> impl Iterator<Item = i64> + '_ {
    deltas.iter().scan(0_i64, |total, delta| {
        *total = total.wrapping_add(*delta);
        Some(*total)
    })
}

/// Block-level decoding parameters and the string table.
struct BlockContext {
    offset: u64,
    strings: Vec<String>,
    granularity: i64,
    lat_offset: i64,
    lon_offset: i64,
    date_granularity: i64,
}

impl BlockContext {
    fn new(block: &proto::PrimitiveBlock, offset: u64) -> Result<Self, FormatError> {
        let strings = block
            .stringtable
            .s
            .iter()
            .enumerate()
            .map(|(index, bytes)| {
                String::from_utf8(bytes.clone()).map_err(|source| FormatError::Utf8 {
                    offset,
                    index,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            offset,
            strings,
            granularity: i64::from(block.granularity.unwrap_or(100)),
            lat_offset: block.lat_offset.unwrap_or_default(),
            lon_offset: block.lon_offset.unwrap_or_default(),
            date_granularity: i64::from(block.date_granularity.unwrap_or(1000)),
        })
    }

    fn string(&self, index: i64) -> Result<&str, FormatError> {
        usize::try_from(index)
            .ok()
            .and_then(|position| self.strings.get(position))
            .map(String::as_str)
            .ok_or(FormatError::StringIndex {
                offset: self.offset,
                index,
                len: self.strings.len(),
            })
    }

    fn lat(&self, raw: i64) -> Result<f64, FormatError> {
        self.scale(self.lat_offset, raw)
    }

    fn lon(&self, raw: i64) -> Result<f64, FormatError> {
        self.scale(self.lon_offset, raw)
    }

    /// `offset + granularity * raw` in degrees.
    fn scale(&self, offset: i64, raw: i64) -> Result<f64, FormatError> {
        self.granularity
            .checked_mul(raw)
            .and_then(|scaled| scaled.checked_add(offset))
            .map(nanodegrees)
            .ok_or(FormatError::CoordinateOverflow {
                offset: self.offset,
            })
    }

    fn timestamp(&self, raw: i64) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.date_granularity.saturating_mul(raw))
    }

    fn misaligned(&self, what: &'static str) -> FormatError {
        FormatError::Misaligned {
            offset: self.offset,
            what,
        }
    }

    fn tags(&self, keys: &[u32], vals: &[u32]) -> Result<Tags, FormatError> {
        if keys.len() != vals.len() {
            return Err(self.misaligned("tag key/value"));
        }
        keys.iter()
            .zip(vals)
            .map(|(key, value)| {
                Ok((
                    self.string(i64::from(*key))?.to_owned(),
                    self.string(i64::from(*value))?.to_owned(),
                ))
            })
            .collect()
    }

    fn info(&self, info: Option<&proto::Info>) -> Info {
        info.map_or_else(Info::default, |info| Info {
            version: info.version.unwrap_or(-1),
            timestamp: info.timestamp.and_then(|raw| self.timestamp(raw)),
            changeset: info.changeset.unwrap_or_default(),
            uid: info.uid.unwrap_or_default(),
        })
    }

    fn dense_nodes(
        &self,
        dense: &proto::DenseNodes,
        out: &mut Vec<Node>,
    ) -> Result<(), FormatError> {
        let count = dense.id.len();
        if dense.lat.len() != count || dense.lon.len() != count {
            return Err(self.misaligned("dense id/lat/lon"));
        }
        let info = match dense.denseinfo.as_ref() {
            Some(info) => Some(
                DenseInfoColumns::new(info, count).ok_or_else(|| self.misaligned("dense info"))?,
            ),
            None => None,
        };

        let mut cursor = dense.keys_vals.iter().copied();
        let ids = delta_decode(&dense.id);
        let lats = delta_decode(&dense.lat);
        let lons = delta_decode(&dense.lon);
        for (position, ((id, lat), lon)) in ids.zip(lats).zip(lons).enumerate() {
            let tags = if dense.keys_vals.is_empty() {
                Tags::new()
            } else {
                self.dense_tags(&mut cursor)?
            };
            let info = info
                .as_ref()
                .map(|columns| columns.row(position))
                .map(|row| Info {
                    version: row.version,
                    timestamp: row.timestamp.and_then(|raw| self.timestamp(raw)),
                    changeset: row.changeset,
                    uid: row.uid,
                })
                .unwrap_or_default();
            out.push(Node {
                id,
                info,
                tags,
                lon: self.lon(lon)?,
                lat: self.lat(lat)?,
                geometry: None,
            });
        }
        Ok(())
    }

    /// Consume one node's `key, value, ..., 0` run from the shared cursor.
    fn dense_tags(&self, cursor: &mut impl Iterator<Item = i32>) -> Result<Tags, FormatError> {
        let mut tags = Tags::new();
        while let Some(key) = cursor.next() {
            if key == 0 {
                break;
            }
            let value = cursor
                .next()
                .ok_or_else(|| self.misaligned("dense keys_vals"))?;
            tags.insert(
                self.string(i64::from(key))?.to_owned(),
                self.string(i64::from(value))?.to_owned(),
            );
        }
        Ok(tags)
    }

    fn node(&self, node: &proto::Node) -> Result<Node, FormatError> {
        Ok(Node {
            id: node.id,
            info: self.info(node.info.as_ref()),
            tags: self.tags(&node.keys, &node.vals)?,
            lon: self.lon(node.lon)?,
            lat: self.lat(node.lat)?,
            geometry: None,
        })
    }

    fn way(&self, way: &proto::Way) -> Result<Way, FormatError> {
        Ok(Way {
            id: way.id,
            info: self.info(way.info.as_ref()),
            tags: self.tags(&way.keys, &way.vals)?,
            nodes: delta_decode(&way.refs).collect(),
            geometry: None,
        })
    }

    fn relation(&self, relation: &proto::Relation) -> Result<Relation, FormatError> {
        let count = relation.memids.len();
        if relation.roles_sid.len() != count || relation.types.len() != count {
            return Err(self.misaligned("relation member"));
        }
        let members = delta_decode(&relation.memids)
            .zip(&relation.types)
            .zip(&relation.roles_sid)
            .map(|((reference, kind), role)| {
                Ok(Member {
                    reference,
                    kind: self.member_kind(*kind)?,
                    role: self.string(i64::from(*role))?.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, FormatError>>()?;
        Ok(Relation {
            id: relation.id,
            info: self.info(relation.info.as_ref()),
            tags: self.tags(&relation.keys, &relation.vals)?,
            members,
            geometry: None,
        })
    }

    fn member_kind(&self, value: i32) -> Result<EntityKind, FormatError> {
        match value {
            0 => Ok(EntityKind::Node),
            1 => Ok(EntityKind::Way),
            2 => Ok(EntityKind::Relation),
            _ => Err(FormatError::MemberType {
                offset: self.offset,
                value,
            }),
        }
    }
}

/// Decoded dense info columns, validated against the node count.
struct DenseInfoColumns {
    version: Vec<i32>,
    timestamp: Vec<i64>,
    changeset: Vec<i64>,
    uid: Vec<i64>,
}

struct DenseInfoRow {
    version: i32,
    timestamp: Option<i64>,
    changeset: i64,
    uid: i32,
}

impl DenseInfoColumns {
    fn new(info: &proto::DenseInfo, count: usize) -> Option<Self> {
        let aligned = |len: usize| len == 0 || len == count;
        if !(aligned(info.version.len())
            && aligned(info.timestamp.len())
            && aligned(info.changeset.len())
            && aligned(info.uid.len())
            && aligned(info.user_sid.len()))
        {
            return None;
        }
        let uids: Vec<i64> = info.uid.iter().map(|uid| i64::from(*uid)).collect();
        Some(Self {
            version: info.version.clone(),
            timestamp: delta_decode(&info.timestamp).collect(),
            changeset: delta_decode(&info.changeset).collect(),
            uid: delta_decode(&uids).collect(),
        })
    }

    fn row(&self, position: usize) -> DenseInfoRow {
        DenseInfoRow {
            version: self.version.get(position).copied().unwrap_or(-1),
            timestamp: self.timestamp.get(position).copied(),
            changeset: self.changeset.get(position).copied().unwrap_or_default(),
            uid: self
                .uid
                .get(position)
                .and_then(|uid| i32::try_from(*uid).ok())
                .unwrap_or_default(),
        }
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "coordinates in nanodegrees stay far below 2^53"
)]
fn nanodegrees(value: i64) -> f64 {
    value as f64 / NANODEGREES
}
