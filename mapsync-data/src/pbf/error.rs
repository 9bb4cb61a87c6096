//! Errors raised while framing and decoding snapshot blobs.

use std::io;

use thiserror::Error;

use crate::pipeline::WorkerPanic;

/// A malformed or unreadable snapshot.
///
/// Every variant carries the byte offset of the blob being processed so an
/// operator can locate the damage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FormatError {
    /// Reading from the underlying stream failed.
    #[error("failed to read snapshot at byte offset {offset}")]
    Io {
        /// Offset of the frame being read.
        offset: u64,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The stream ended inside a frame.
    #[error("truncated {what} at byte offset {offset}: expected {expected} bytes, found {found}")]
    Truncated {
        /// Part of the frame that was cut short.
        what: &'static str,
        /// Offset of the frame.
        offset: u64,
        /// Bytes required.
        expected: u64,
        /// Bytes available.
        found: u64,
    },
    /// A declared size is negative or above the format limits.
    #[error("{what} at byte offset {offset} declares {size} bytes (limit {limit})")]
    InvalidSize {
        /// Part of the frame carrying the size.
        what: &'static str,
        /// Offset of the frame.
        offset: u64,
        /// Declared size.
        size: i64,
        /// Maximum accepted size.
        limit: u64,
    },
    /// A protobuf message failed to decode.
    #[error("malformed {what} at byte offset {offset}")]
    Message {
        /// Message being decoded.
        what: &'static str,
        /// Offset of the frame.
        offset: u64,
        /// Decoder error.
        #[source]
        source: prost::DecodeError,
    },
    /// The blob uses a compression scheme the decoder does not support.
    #[error("blob at byte offset {offset} uses unsupported {compression} compression")]
    UnsupportedCompression {
        /// Offset of the frame.
        offset: u64,
        /// Name of the compression scheme.
        compression: &'static str,
    },
    /// Inflating the payload failed.
    #[error("failed to inflate blob at byte offset {offset}")]
    Inflate {
        /// Offset of the frame.
        offset: u64,
        /// Decompressor error.
        #[source]
        source: io::Error,
    },
    /// The inflated payload length differs from the declared `raw_size`.
    #[error("blob at byte offset {offset} inflated to {actual} bytes, declared {declared}")]
    SizeMismatch {
        /// Offset of the frame.
        offset: u64,
        /// Declared uncompressed size.
        declared: u64,
        /// Actual uncompressed size.
        actual: u64,
    },
    /// The header block requires a feature the decoder lacks.
    #[error("blob at byte offset {offset} requires unsupported feature {feature:?}")]
    UnsupportedFeature {
        /// Offset of the frame.
        offset: u64,
        /// Feature name.
        feature: String,
    },
    /// A string table reference points past the end of the table.
    #[error("string index {index} out of range ({len} strings) in blob at byte offset {offset}")]
    StringIndex {
        /// Offset of the frame.
        offset: u64,
        /// Offending index.
        index: i64,
        /// Size of the string table.
        len: usize,
    },
    /// A string table entry is not valid UTF-8.
    #[error("string table entry {index} in blob at byte offset {offset} is not UTF-8")]
    Utf8 {
        /// Offset of the frame.
        offset: u64,
        /// Entry index.
        index: usize,
        /// Conversion error.
        #[source]
        source: std::string::FromUtf8Error,
    },
    /// Parallel arrays of a group disagree in length.
    #[error("{what} arrays disagree in length in blob at byte offset {offset}")]
    Misaligned {
        /// Offset of the frame.
        offset: u64,
        /// Arrays involved.
        what: &'static str,
    },
    /// A relation member carries an unknown type code.
    #[error("unknown member type {value} in blob at byte offset {offset}")]
    MemberType {
        /// Offset of the frame.
        offset: u64,
        /// Type code found.
        value: i32,
    },
    /// Scaling a raw coordinate by the block granularity and offset
    /// overflows.
    #[error("coordinate overflows in blob at byte offset {offset}")]
    CoordinateOverflow {
        /// Offset of the frame.
        offset: u64,
    },
    /// The first block of the stream is not a header block.
    #[error("first blob at byte offset {offset} has type {found:?}, expected OSMHeader")]
    MissingHeader {
        /// Offset of the frame.
        offset: u64,
        /// Type found instead.
        found: String,
    },
    /// A decode worker died before reporting a result.
    #[error(transparent)]
    Worker(#[from] WorkerPanic),
}
