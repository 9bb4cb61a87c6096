//! Errors raised by the off-heap store.

use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

use super::codec::CodecError;

/// Failures of the cache maps and their backing memory.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Segment sizes must be powers of two and hold whole slots.
    #[error("segment size {size} is not a power of two holding {slot}-byte slots")]
    SegmentSize {
        /// Requested segment size in bytes.
        size: usize,
        /// Width of the slots stored in the segments.
        slot: usize,
    },
    /// Dense maps are addressed by non-negative keys only.
    #[error("key {key} cannot address a dense map")]
    NegativeKey {
        /// Offending key.
        key: i64,
    },
    /// Sorted maps accept new keys in increasing order only.
    #[error("key {key} arrived after {last}; sorted maps need increasing keys")]
    UnorderedKey {
        /// Offending key.
        key: i64,
        /// Largest key already stored.
        last: i64,
    },
    /// An encoded value does not fit in one segment.
    #[error("value of {size} bytes exceeds the {segment_size}-byte segment")]
    ValueTooLarge {
        /// Framed value size.
        size: usize,
        /// Segment size of the log.
        segment_size: usize,
    },
    /// A stored position points outside the written region.
    #[error("position {position} lies outside the store")]
    OutOfBounds {
        /// Offending position.
        position: u64,
    },
    /// A stored value failed to decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// Creating or mapping a segment file failed.
    #[error("failed to map segment {path}")]
    Io {
        /// Segment file.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}
