//! Replication streams: state files, change documents and their transport.
//!
//! A stream publishes one gzip-compressed `osmChange` document per sequence
//! number next to a `state.txt` describing it, both under a path derived
//! from the sequence (see [`sequence_path`]). The newest state lives at the
//! stream root.

mod changes;
mod error;
mod source;
mod state;

#[cfg(any(test, feature = "test-support"))]
mod test_support;

pub use changes::{parse_changes, parse_compressed_changes};
pub use error::{ReplicationError, TransportError};
pub use source::{DEFAULT_USER_AGENT, HttpReplicationSource, ReplicationSource};
pub use state::State;
#[cfg(any(test, feature = "test-support"))]
pub use test_support::StubSource;

/// Replication stream used when none is configured.
pub const DEFAULT_REPLICATION_URL: &str = "https://planet.osm.org/replication/hour";

/// Relative path of the file for `sequence` with the given `suffix`.
///
/// The sequence is zero-padded to nine digits and split into three
/// directory levels.
///
/// # Examples
/// ```
/// use mapsync_data::replication::sequence_path;
///
/// assert_eq!(sequence_path(42, "osc.gz"), "000/000/042.osc.gz");
/// assert_eq!(sequence_path(5_123_456, "state.txt"), "005/123/456.state.txt");
/// ```
#[must_use]
pub fn sequence_path(sequence: i64, suffix: &str) -> String {
    let padded = format!("{sequence:09}");
    let (directory, file) = padded.split_at(padded.len().saturating_sub(3));
    let (top, middle) = directory.split_at(directory.len().saturating_sub(3));
    format!("{top}/{middle}/{file}.{suffix}")
}
