//! Protocol Buffers messages of the snapshot container and block formats.
//!
//! Declared with `prost` derives so no code generation step is needed. Field
//! tags follow the published `fileformat.proto` and `osmformat.proto`
//! schemas; messages and fields the decoder never reads are left out, which
//! `prost` tolerates by skipping unknown tags.

/// Header preceding every blob in the container.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BlobHeader {
    /// Declared blob type, `OSMHeader` or `OSMData`.
    #[prost(string, required, tag = "1")]
    pub r#type: String,
    /// Optional index data; unused.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub indexdata: Option<Vec<u8>>,
    /// Size in bytes of the following blob.
    #[prost(int32, required, tag = "3")]
    pub datasize: i32,
}

/// Possibly compressed block payload.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Blob {
    /// Uncompressed payload.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub raw: Option<Vec<u8>>,
    /// Declared size of the uncompressed payload.
    #[prost(int32, optional, tag = "2")]
    pub raw_size: Option<i32>,
    /// Zlib-compressed payload.
    #[prost(bytes = "vec", optional, tag = "3")]
    pub zlib_data: Option<Vec<u8>>,
    /// LZMA-compressed payload; unsupported.
    #[prost(bytes = "vec", optional, tag = "4")]
    pub lzma_data: Option<Vec<u8>>,
    /// LZ4-compressed payload; unsupported.
    #[prost(bytes = "vec", optional, tag = "6")]
    pub lz4_data: Option<Vec<u8>>,
    /// Zstandard-compressed payload; unsupported.
    #[prost(bytes = "vec", optional, tag = "7")]
    pub zstd_data: Option<Vec<u8>>,
}

/// Payload of an `OSMHeader` blob.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HeaderBlock {
    /// Declared bounding box.
    #[prost(message, optional, tag = "1")]
    pub bbox: Option<HeaderBBox>,
    /// Features a reader must support.
    #[prost(string, repeated, tag = "4")]
    pub required_features: Vec<String>,
    /// Features a reader may exploit.
    #[prost(string, repeated, tag = "5")]
    pub optional_features: Vec<String>,
    /// Program that wrote the file.
    #[prost(string, optional, tag = "16")]
    pub writingprogram: Option<String>,
    /// Free-form data source.
    #[prost(string, optional, tag = "17")]
    pub source: Option<String>,
    /// Replication timestamp in seconds since the epoch.
    #[prost(int64, optional, tag = "32")]
    pub osmosis_replication_timestamp: Option<i64>,
    /// Replication sequence number.
    #[prost(int64, optional, tag = "33")]
    pub osmosis_replication_sequence_number: Option<i64>,
    /// Replication base URL.
    #[prost(string, optional, tag = "34")]
    pub osmosis_replication_base_url: Option<String>,
}

/// Bounding box in nanodegrees.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HeaderBBox {
    /// Western edge.
    #[prost(sint64, required, tag = "1")]
    pub left: i64,
    /// Eastern edge.
    #[prost(sint64, required, tag = "2")]
    pub right: i64,
    /// Northern edge.
    #[prost(sint64, required, tag = "3")]
    pub top: i64,
    /// Southern edge.
    #[prost(sint64, required, tag = "4")]
    pub bottom: i64,
}

/// Payload of an `OSMData` blob.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PrimitiveBlock {
    /// Strings referenced by index from every group.
    #[prost(message, required, tag = "1")]
    pub stringtable: StringTable,
    /// Entity groups.
    #[prost(message, repeated, tag = "2")]
    pub primitivegroup: Vec<PrimitiveGroup>,
    /// Coordinate resolution in nanodegrees; defaults to 100.
    #[prost(int32, optional, tag = "17")]
    pub granularity: Option<i32>,
    /// Timestamp resolution in milliseconds; defaults to 1000.
    #[prost(int32, optional, tag = "18")]
    pub date_granularity: Option<i32>,
    /// Latitude offset in nanodegrees.
    #[prost(int64, optional, tag = "19")]
    pub lat_offset: Option<i64>,
    /// Longitude offset in nanodegrees.
    #[prost(int64, optional, tag = "20")]
    pub lon_offset: Option<i64>,
}

/// Block-local string pool.
#[derive(Clone, PartialEq, prost::Message)]
pub struct StringTable {
    /// Raw UTF-8 strings; index 0 is reserved as a delimiter.
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub s: Vec<Vec<u8>>,
}

/// A homogeneous group of entities.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PrimitiveGroup {
    /// Plain nodes.
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<Node>,
    /// Columnar nodes.
    #[prost(message, optional, tag = "2")]
    pub dense: Option<DenseNodes>,
    /// Ways.
    #[prost(message, repeated, tag = "3")]
    pub ways: Vec<Way>,
    /// Relations.
    #[prost(message, repeated, tag = "4")]
    pub relations: Vec<Relation>,
}

/// Per-entity edit metadata.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Info {
    /// Version; `-1` when absent.
    #[prost(int32, optional, tag = "1")]
    pub version: Option<i32>,
    /// Timestamp in `date_granularity` units.
    #[prost(int64, optional, tag = "2")]
    pub timestamp: Option<i64>,
    /// Changeset identifier.
    #[prost(int64, optional, tag = "3")]
    pub changeset: Option<i64>,
    /// Author identifier.
    #[prost(int32, optional, tag = "4")]
    pub uid: Option<i32>,
    /// Author name as a string table index.
    #[prost(uint32, optional, tag = "5")]
    pub user_sid: Option<u32>,
}

/// Columnar edit metadata of dense nodes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DenseInfo {
    /// Versions, stored verbatim.
    #[prost(int32, repeated, tag = "1")]
    pub version: Vec<i32>,
    /// Delta-encoded timestamps.
    #[prost(sint64, repeated, tag = "2")]
    pub timestamp: Vec<i64>,
    /// Delta-encoded changesets.
    #[prost(sint64, repeated, tag = "3")]
    pub changeset: Vec<i64>,
    /// Delta-encoded author identifiers.
    #[prost(sint32, repeated, tag = "4")]
    pub uid: Vec<i32>,
    /// Delta-encoded author name indices.
    #[prost(sint32, repeated, tag = "5")]
    pub user_sid: Vec<i32>,
}

/// A plain node.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Node {
    /// Identifier.
    #[prost(sint64, required, tag = "1")]
    pub id: i64,
    /// Tag keys as string table indices.
    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,
    /// Tag values as string table indices.
    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,
    /// Edit metadata.
    #[prost(message, optional, tag = "4")]
    pub info: Option<Info>,
    /// Latitude in granularity units.
    #[prost(sint64, required, tag = "8")]
    pub lat: i64,
    /// Longitude in granularity units.
    #[prost(sint64, required, tag = "9")]
    pub lon: i64,
}

/// Delta-encoded columnar nodes.
#[derive(Clone, PartialEq, prost::Message)]
pub struct DenseNodes {
    /// Delta-encoded identifiers.
    #[prost(sint64, repeated, tag = "1")]
    pub id: Vec<i64>,
    /// Columnar edit metadata.
    #[prost(message, optional, tag = "5")]
    pub denseinfo: Option<DenseInfo>,
    /// Delta-encoded latitudes.
    #[prost(sint64, repeated, tag = "8")]
    pub lat: Vec<i64>,
    /// Delta-encoded longitudes.
    #[prost(sint64, repeated, tag = "9")]
    pub lon: Vec<i64>,
    /// Alternating key/value indices, each node terminated by `0`.
    #[prost(int32, repeated, tag = "10")]
    pub keys_vals: Vec<i32>,
}

/// A way.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Way {
    /// Identifier.
    #[prost(int64, required, tag = "1")]
    pub id: i64,
    /// Tag keys as string table indices.
    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,
    /// Tag values as string table indices.
    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,
    /// Edit metadata.
    #[prost(message, optional, tag = "4")]
    pub info: Option<Info>,
    /// Delta-encoded node references.
    #[prost(sint64, repeated, tag = "8")]
    pub refs: Vec<i64>,
}

/// A relation.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Relation {
    /// Identifier.
    #[prost(int64, required, tag = "1")]
    pub id: i64,
    /// Tag keys as string table indices.
    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,
    /// Tag values as string table indices.
    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,
    /// Edit metadata.
    #[prost(message, optional, tag = "4")]
    pub info: Option<Info>,
    /// Member roles as string table indices.
    #[prost(int32, repeated, tag = "8")]
    pub roles_sid: Vec<i32>,
    /// Delta-encoded member references.
    #[prost(sint64, repeated, tag = "9")]
    pub memids: Vec<i64>,
    /// Member types: 0 node, 1 way, 2 relation.
    #[prost(int32, repeated, tag = "10")]
    pub types: Vec<i32>,
}
