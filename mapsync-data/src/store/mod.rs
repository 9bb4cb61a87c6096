//! Growable key/value caches over heap or memory-mapped segments.
//!
//! Two layouts back the geometry caches of an import:
//! - [`DenseDataMap`]: fixed-size values addressed directly by key, for node
//!   coordinates whose ids are near-contiguous;
//! - [`MonotonicDataMap`]: a sorted key column beside fixed-size values, for
//!   node coordinates when sparse ids would make a dense map too large;
//! - [`PairedDataMap`]: a sorted `(key, position)` index over an
//!   [`AppendOnlyLog`], for variable-size values such as way node lists.
//!
//! Invariants: keys are never deleted; a write publishes with a single slot
//! update; memory grows by doubling its segment count and never moves
//! existing segments.

mod append_log;
mod codec;
mod dense;
mod error;
mod list;
mod memory;
mod monotonic;
mod paired;

pub use append_log::AppendOnlyLog;
pub use codec::{
    CodecError, CoordinateCodec, FixedSizeCodec, GeometryCodec, IndexEntry, IndexEntryCodec,
    LongCodec, LongListCodec, VariableSizeCodec,
};
pub use dense::DenseDataMap;
pub use error::StoreError;
pub use list::AlignedDataList;
pub use memory::{DEFAULT_SEGMENT_SIZE, HeapMemory, MAPPED_SEGMENT_SIZE, MappedMemory, Memory};
pub use monotonic::MonotonicDataMap;
pub use paired::PairedDataMap;
