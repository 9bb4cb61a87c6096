//! Snapshot header and replication checkpoint.

use chrono::{DateTime, Utc};
use geo::{Coord, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Durable replication checkpoint carried by a snapshot header and advanced
/// after every applied changeset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Header {
    /// Sequence number of the last applied changeset.
    pub replication_sequence: i64,
    /// Timestamp of the last applied changeset.
    pub replication_timestamp: Option<DateTime<Utc>>,
    /// Base URL of the replication stream.
    pub replication_url: Option<String>,
    /// Free-form description of the data source.
    pub source: Option<String>,
    /// Program that wrote the snapshot.
    pub writing_program: Option<String>,
}

impl Header {
    /// Derive the header that follows this one once `sequence` has been
    /// applied, keeping the stream metadata.
    ///
    /// # Examples
    /// ```
    /// use mapsync_core::Header;
    ///
    /// let header = Header {
    ///     replication_sequence: 41,
    ///     source: Some("planet".into()),
    ///     ..Header::default()
    /// };
    /// let next = header.advance(42, None);
    /// assert_eq!(next.replication_sequence, 42);
    /// assert_eq!(next.source.as_deref(), Some("planet"));
    /// ```
    #[must_use]
    pub fn advance(&self, sequence: i64, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            replication_sequence: sequence,
            replication_timestamp: timestamp,
            ..self.clone()
        }
    }
}

/// WGS84 bounding box declared by a snapshot header.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bound {
    /// Western edge in degrees.
    pub min_lon: f64,
    /// Southern edge in degrees.
    pub min_lat: f64,
    /// Eastern edge in degrees.
    pub max_lon: f64,
    /// Northern edge in degrees.
    pub max_lat: f64,
}

impl Bound {
    /// Rectangle with `x = longitude` and `y = latitude`.
    #[must_use]
    pub fn to_rect(self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lon,
                y: self.max_lat,
            },
        )
    }
}
