use std::io;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use mapsync_core::Change;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use url::Url;

use super::{
    ReplicationError, State, TransportError, parse_compressed_changes, sequence_path,
};

/// User agent sent with every replication request.
pub const DEFAULT_USER_AGENT: &str = "mapsync/0.1";

/// A replication stream: state files and compressed changesets addressed
/// by sequence number.
#[async_trait(?Send)]
pub trait ReplicationSource {
    /// Base URL of the stream.
    fn base_url(&self) -> &Url;

    /// Raw bytes of the file at `path`, relative to the base URL.
    async fn fetch(&self, path: &str) -> Result<Vec<u8>, TransportError>;

    /// State of `sequence`, or of the newest changeset when `None`.
    async fn state(&self, sequence: Option<i64>) -> Result<State, ReplicationError> {
        let path = sequence.map_or_else(
            || "state.txt".to_owned(),
            |sequence| sequence_path(sequence, "state.txt"),
        );
        let bytes = self.fetch(&path).await?;
        State::parse(&String::from_utf8_lossy(&bytes))
    }

    /// Changes published under `sequence`.
    async fn changes(&self, sequence: i64) -> Result<Vec<Change>, ReplicationError> {
        let bytes = self.fetch(&sequence_path(sequence, "osc.gz")).await?;
        parse_compressed_changes(bytes.as_slice())
    }
}

/// HTTP implementation of [`ReplicationSource`].
#[derive(Debug)]
pub struct HttpReplicationSource {
    client: Client,
    base_url: Url,
    user_agent: String,
}

impl HttpReplicationSource {
    /// Construct a source reading from `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ReplicationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|source| ReplicationError::Client { source })?;
        Ok(Self {
            client,
            base_url: directory_url(base_url)?,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        })
    }

    /// Override the default user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

#[async_trait(?Send)]
impl ReplicationSource for HttpReplicationSource {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|source| TransportError::Resolve {
                base: self.base_url.to_string(),
                path: path.to_owned(),
                source,
            })?;
        debug!("fetching {url}");
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, self.user_agent.as_str())
            .send()
            .await
            .map_err(|err| convert_reqwest_error(err, url.as_str()))?
            .error_for_status()
            .map_err(|err| convert_reqwest_error(err, url.as_str()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| convert_reqwest_error(err, url.as_str()))?;
        Ok(bytes.to_vec())
    }
}

/// Parse `base_url` so relative joins append to its last segment.
pub(crate) fn directory_url(base_url: &str) -> Result<Url, ReplicationError> {
    let trimmed = base_url.trim_end_matches('/');
    Url::parse(&format!("{trimmed}/")).map_err(|source| ReplicationError::InvalidUrl {
        url: base_url.to_owned(),
        source,
    })
}

fn convert_reqwest_error(error: reqwest::Error, url: &str) -> TransportError {
    if let Some(status) = error.status() {
        return TransportError::Http {
            url: url.to_owned(),
            status: status.as_u16(),
            message: error.to_string(),
        };
    }

    let kind = if error.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::Other
    };
    TransportError::Network {
        url: url.to_owned(),
        source: io::Error::new(kind, error),
    }
}
