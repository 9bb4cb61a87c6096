//! In-memory replication stream for tests.

use std::collections::HashMap;
use std::io::Write;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use url::Url;

use super::{ReplicationSource, TransportError, sequence_path};

/// Stub [`ReplicationSource`] serving files from memory.
#[derive(Debug, Clone)]
pub struct StubSource {
    base_url: Url,
    files: HashMap<String, Vec<u8>>,
}

impl Default for StubSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StubSource {
    /// Construct an empty stub rooted at `https://example.org/replication/`.
    ///
    /// # Panics
    /// Never; the base URL is a valid literal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: Url::parse("https://example.org/replication/")
                .expect("literal base URL should parse"),
            files: HashMap::new(),
        }
    }

    /// Serve `bytes` under `path`.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.files.insert(path.into(), bytes);
        self
    }

    /// Publish `sequence` with its state timestamp and uncompressed change
    /// document; the document is gzip-compressed as served upstream.
    ///
    /// # Panics
    /// Panics if in-memory compression fails.
    #[must_use]
    pub fn with_changeset(self, sequence: i64, timestamp: &str, document: &str) -> Self {
        let state = state_file(sequence, timestamp);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(document.as_bytes())
            .expect("in-memory compression should succeed");
        let compressed = encoder
            .finish()
            .expect("in-memory compression should succeed");
        self.with_file(sequence_path(sequence, "state.txt"), state.into_bytes())
            .with_file(sequence_path(sequence, "osc.gz"), compressed)
    }

    /// Declare `sequence` as the newest changeset.
    #[must_use]
    pub fn with_latest(self, sequence: i64, timestamp: &str) -> Self {
        self.with_file("state.txt", state_file(sequence, timestamp).into_bytes())
    }
}

fn state_file(sequence: i64, timestamp: &str) -> String {
    format!(
        "#generated\nsequenceNumber={sequence}\ntimestamp={}\n",
        timestamp.replace(':', "\\:")
    )
}

#[async_trait(?Send)]
impl ReplicationSource for StubSource {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| TransportError::NotFound {
                path: path.to_owned(),
            })
    }
}
