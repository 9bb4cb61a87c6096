//! Snapshot (`.osm.pbf`) framing, decoding and encoding.
//!
//! Responsibilities:
//! - split a byte stream into blobs ([`BlobReader`]);
//! - decode blobs into header and data blocks ([`decode_blob`]);
//! - write snapshots for fixtures and exports ([`SnapshotWriter`]).
//!
//! Boundaries: nothing here caches or persists entities.

mod decoder;
mod error;
mod framer;
pub mod proto;
mod writer;

pub use decoder::{Block, DataBlock, DecodedBlock, HeaderBlock, decode_blob, delta_decode};
pub use error::FormatError;
pub use framer::{BlobInfo, BlobReader, DATA_TYPE, HEADER_TYPE, RawBlob};
pub use writer::SnapshotWriter;
