//! Replication state files (`state.txt`).

use chrono::{DateTime, Utc};

use super::ReplicationError;

/// Position of a replication stream: the latest sequence and its time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    /// Sequence number of the changeset described.
    pub sequence: i64,
    /// Time up to which the changeset carries edits.
    pub timestamp: DateTime<Utc>,
}

impl State {
    /// Parse the `key=value` property format of a state file.
    ///
    /// Comment lines start with `#`; colons in values may be escaped as
    /// `\:`.
    ///
    /// # Examples
    /// ```
    /// use mapsync_data::replication::State;
    ///
    /// let state = State::parse("#comment\nsequenceNumber=42\ntimestamp=2024-01-02T03\\:04\\:05Z\n")?;
    /// assert_eq!(state.sequence, 42);
    /// assert_eq!(state.timestamp.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    /// # Ok::<(), mapsync_data::replication::ReplicationError>(())
    /// ```
    pub fn parse(text: &str) -> Result<Self, ReplicationError> {
        let mut sequence = None;
        let mut timestamp = None;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().replace("\\:", ":");
            match key.trim() {
                "sequenceNumber" => sequence = Some(parse_sequence(value)?),
                "timestamp" => timestamp = Some(parse_timestamp(value)?),
                _ => {}
            }
        }
        Ok(Self {
            sequence: sequence.ok_or(ReplicationError::MissingStateKey {
                key: "sequenceNumber",
            })?,
            timestamp: timestamp.ok_or(ReplicationError::MissingStateKey { key: "timestamp" })?,
        })
    }
}

fn parse_sequence(value: String) -> Result<i64, ReplicationError> {
    match value.parse() {
        Ok(sequence) if sequence >= 0 => Ok(sequence),
        _ => Err(ReplicationError::InvalidStateValue {
            key: "sequenceNumber",
            value,
        }),
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>, ReplicationError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|_| ReplicationError::InvalidStateValue {
            key: "timestamp",
            value,
        })
}
