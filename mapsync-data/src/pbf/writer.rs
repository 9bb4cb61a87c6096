//! Encodes entities into the snapshot format.
//!
//! Produces the same framing the [`BlobReader`](super::BlobReader) consumes:
//! zlib-compressed payloads with a declared `raw_size`, nodes written as
//! dense groups unless plain groups are requested.

use std::collections::HashMap;
use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::ZlibEncoder;
use mapsync_core::{Bound, EntityKind, Header, Info, Node, Relation, Tags, Way};
use prost::Message;

use super::framer::{DATA_TYPE, HEADER_TYPE};
use super::proto;

const GRANULARITY: i64 = 100;
const DATE_GRANULARITY: i64 = 1000;

/// Writes a snapshot frame by frame.
///
/// # Examples
/// ```
/// use mapsync_core::{Header, Node};
/// use mapsync_data::pbf::{BlobReader, SnapshotWriter};
///
/// let mut writer = SnapshotWriter::new(Vec::new());
/// writer.write_header(&Header::default(), None)?;
/// writer.write_data(&[Node::new(1, 13.4, 52.5)], &[], &[])?;
/// let bytes = writer.into_inner();
/// assert_eq!(BlobReader::new(bytes.as_slice()).count(), 2);
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct SnapshotWriter<W> {
    writer: W,
}

impl<W: Write> SnapshotWriter<W> {
    /// Wrap a byte sink.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the byte sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write the header blob.
    pub fn write_header(&mut self, header: &Header, bound: Option<&Bound>) -> io::Result<()> {
        let block = proto::HeaderBlock {
            bbox: bound.map(|bound| proto::HeaderBBox {
                left: to_nanodegrees(bound.min_lon),
                right: to_nanodegrees(bound.max_lon),
                top: to_nanodegrees(bound.max_lat),
                bottom: to_nanodegrees(bound.min_lat),
            }),
            required_features: vec!["OsmSchema-V0.6".to_owned(), "DenseNodes".to_owned()],
            optional_features: Vec::new(),
            writingprogram: header.writing_program.clone(),
            source: header.source.clone(),
            osmosis_replication_timestamp: header
                .replication_timestamp
                .map(|timestamp| timestamp.timestamp()),
            osmosis_replication_sequence_number: Some(header.replication_sequence),
            osmosis_replication_base_url: header.replication_url.clone(),
        };
        self.write_blob(HEADER_TYPE, &block.encode_to_vec())
    }

    /// Write one data blob with nodes in a dense group.
    pub fn write_data(
        &mut self,
        nodes: &[Node],
        ways: &[Way],
        relations: &[Relation],
    ) -> io::Result<()> {
        let mut strings = StringTableBuilder::default();
        let mut groups = Vec::new();
        if !nodes.is_empty() {
            groups.push(proto::PrimitiveGroup {
                dense: Some(dense_nodes(nodes, &mut strings)),
                ..proto::PrimitiveGroup::default()
            });
        }
        self.finish_data(strings, groups, ways, relations)
    }

    /// Write one data blob with nodes in a plain group.
    pub fn write_plain_data(
        &mut self,
        nodes: &[Node],
        ways: &[Way],
        relations: &[Relation],
    ) -> io::Result<()> {
        let mut strings = StringTableBuilder::default();
        let mut groups = Vec::new();
        if !nodes.is_empty() {
            groups.push(proto::PrimitiveGroup {
                nodes: nodes
                    .iter()
                    .map(|node| plain_node(node, &mut strings))
                    .collect(),
                ..proto::PrimitiveGroup::default()
            });
        }
        self.finish_data(strings, groups, ways, relations)
    }

    fn finish_data(
        &mut self,
        mut strings: StringTableBuilder,
        mut groups: Vec<proto::PrimitiveGroup>,
        ways: &[Way],
        relations: &[Relation],
    ) -> io::Result<()> {
        if !ways.is_empty() {
            groups.push(proto::PrimitiveGroup {
                ways: ways.iter().map(|way| encode_way(way, &mut strings)).collect(),
                ..proto::PrimitiveGroup::default()
            });
        }
        if !relations.is_empty() {
            groups.push(proto::PrimitiveGroup {
                relations: relations
                    .iter()
                    .map(|relation| encode_relation(relation, &mut strings))
                    .collect(),
                ..proto::PrimitiveGroup::default()
            });
        }
        let block = proto::PrimitiveBlock {
            stringtable: strings.finish(),
            primitivegroup: groups,
            granularity: i32::try_from(GRANULARITY).ok(),
            date_granularity: i32::try_from(DATE_GRANULARITY).ok(),
            lat_offset: None,
            lon_offset: None,
        };
        self.write_blob(DATA_TYPE, &block.encode_to_vec())
    }

    fn write_blob(&mut self, kind: &str, payload: &[u8]) -> io::Result<()> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload)?;
        let blob = proto::Blob {
            raw_size: Some(i32::try_from(payload.len()).map_err(io::Error::other)?),
            zlib_data: Some(encoder.finish()?),
            ..proto::Blob::default()
        }
        .encode_to_vec();
        let header = proto::BlobHeader {
            r#type: kind.to_owned(),
            indexdata: None,
            datasize: i32::try_from(blob.len()).map_err(io::Error::other)?,
        }
        .encode_to_vec();
        self.writer
            .write_u32::<BigEndian>(u32::try_from(header.len()).map_err(io::Error::other)?)?;
        self.writer.write_all(&header)?;
        self.writer.write_all(&blob)
    }
}

/// Interns strings; index 0 stays reserved for the dense tag delimiter.
struct StringTableBuilder {
    indices: HashMap<String, u32>,
    strings: Vec<Vec<u8>>,
}

impl Default for StringTableBuilder {
    fn default() -> Self {
        Self {
            indices: HashMap::new(),
            strings: vec![Vec::new()],
        }
    }
}

impl StringTableBuilder {
    fn intern(&mut self, value: &str) -> u32 {
        if let Some(index) = self.indices.get(value) {
            return *index;
        }
        let index = u32::try_from(self.strings.len()).unwrap_or(u32::MAX);
        self.strings.push(value.as_bytes().to_vec());
        self.indices.insert(value.to_owned(), index);
        index
    }

    fn finish(self) -> proto::StringTable {
        proto::StringTable { s: self.strings }
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "coordinates are bounded to +/-180 degrees, far inside the i64 range"
)]
fn to_nanodegrees(degrees: f64) -> i64 {
    (degrees * 1_000_000_000.0).round() as i64
}

fn to_raw_coordinate(degrees: f64) -> i64 {
    to_nanodegrees(degrees) / GRANULARITY
}

fn to_raw_timestamp(info: &Info) -> Option<i64> {
    info.timestamp
        .map(|timestamp| timestamp.timestamp_millis() / DATE_GRANULARITY)
}

/// Differences between consecutive values.
fn delta_encode(values: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut previous = 0_i64;
    values
        .into_iter()
        .map(|value| {
            let delta = value.wrapping_sub(previous);
            previous = value;
            delta
        })
        .collect()
}

fn encode_tags(tags: &Tags, strings: &mut StringTableBuilder) -> (Vec<u32>, Vec<u32>) {
    let mut entries: Vec<_> = tags.iter().collect();
    entries.sort();
    entries
        .into_iter()
        .map(|(key, value)| (strings.intern(key), strings.intern(value)))
        .unzip()
}

fn encode_info(info: &Info) -> proto::Info {
    proto::Info {
        version: Some(info.version),
        timestamp: to_raw_timestamp(info),
        changeset: Some(info.changeset),
        uid: Some(info.uid),
        user_sid: None,
    }
}

fn dense_nodes(nodes: &[Node], strings: &mut StringTableBuilder) -> proto::DenseNodes {
    let mut keys_vals = Vec::new();
    for node in nodes {
        let (keys, vals) = encode_tags(&node.tags, strings);
        for (key, value) in keys.into_iter().zip(vals) {
            keys_vals.push(i32::try_from(key).unwrap_or(i32::MAX));
            keys_vals.push(i32::try_from(value).unwrap_or(i32::MAX));
        }
        keys_vals.push(0);
    }
    proto::DenseNodes {
        id: delta_encode(nodes.iter().map(|node| node.id)),
        denseinfo: dense_info(nodes),
        lat: delta_encode(nodes.iter().map(|node| to_raw_coordinate(node.lat))),
        lon: delta_encode(nodes.iter().map(|node| to_raw_coordinate(node.lon))),
        keys_vals,
    }
}

/// Columnar metadata, omitted when every node carries default metadata.
fn dense_info(nodes: &[Node]) -> Option<proto::DenseInfo> {
    if nodes.iter().all(|node| node.info == Info::default()) {
        return None;
    }
    let uids = delta_encode(nodes.iter().map(|node| i64::from(node.info.uid)));
    Some(proto::DenseInfo {
        version: nodes.iter().map(|node| node.info.version).collect(),
        timestamp: delta_encode(
            nodes
                .iter()
                .map(|node| to_raw_timestamp(&node.info).unwrap_or_default()),
        ),
        changeset: delta_encode(nodes.iter().map(|node| node.info.changeset)),
        uid: uids
            .into_iter()
            .map(|uid| i32::try_from(uid).unwrap_or_default())
            .collect(),
        user_sid: vec![0; nodes.len()],
    })
}

fn plain_node(node: &Node, strings: &mut StringTableBuilder) -> proto::Node {
    let (keys, vals) = encode_tags(&node.tags, strings);
    proto::Node {
        id: node.id,
        keys,
        vals,
        info: Some(encode_info(&node.info)),
        lat: to_raw_coordinate(node.lat),
        lon: to_raw_coordinate(node.lon),
    }
}

fn encode_way(way: &Way, strings: &mut StringTableBuilder) -> proto::Way {
    let (keys, vals) = encode_tags(&way.tags, strings);
    proto::Way {
        id: way.id,
        keys,
        vals,
        info: Some(encode_info(&way.info)),
        refs: delta_encode(way.nodes.iter().copied()),
    }
}

fn encode_relation(relation: &Relation, strings: &mut StringTableBuilder) -> proto::Relation {
    let (keys, vals) = encode_tags(&relation.tags, strings);
    proto::Relation {
        id: relation.id,
        keys,
        vals,
        info: Some(encode_info(&relation.info)),
        roles_sid: relation
            .members
            .iter()
            .map(|member| i32::try_from(strings.intern(&member.role)).unwrap_or(i32::MAX))
            .collect(),
        memids: delta_encode(relation.members.iter().map(|member| member.reference)),
        types: relation
            .members
            .iter()
            .map(|member| match member.kind {
                EntityKind::Node => 0,
                EntityKind::Way => 1,
                EntityKind::Relation => 2,
            })
            .collect(),
    }
}
