//! Error types produced while reading replication streams.

use std::io;

use thiserror::Error;

/// Errors produced while fetching or parsing replication files.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReplicationError {
    /// The replication base URL is not a valid absolute URL.
    #[error("invalid replication URL {url:?}: {source}")]
    InvalidUrl {
        /// URL as configured.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// Builder error.
        #[source]
        source: reqwest::Error,
    },
    /// Fetching a replication file failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// A state file lacks a required key.
    #[error("state file has no {key} entry")]
    MissingStateKey {
        /// Key looked up.
        key: &'static str,
    },
    /// A state file value could not be parsed.
    #[error("state file entry {key} has invalid value {value:?}")]
    InvalidStateValue {
        /// Key of the entry.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// Inflating a compressed changeset failed.
    #[error("failed to inflate changeset: {source}")]
    Inflate {
        /// Decompressor error.
        #[source]
        source: io::Error,
    },
    /// The change document is not well-formed XML.
    #[error("malformed change document at byte {position}: {source}")]
    Xml {
        /// Reader position when the error was detected.
        position: u64,
        /// Parser error.
        #[source]
        source: quick_xml::Error,
    },
    /// An element lacks a required attribute.
    #[error("<{element}> at byte {position} has no {attribute} attribute")]
    MissingAttribute {
        /// Element name.
        element: &'static str,
        /// Attribute name.
        attribute: &'static str,
        /// Reader position.
        position: u64,
    },
    /// An attribute value could not be parsed.
    #[error("<{element}> at byte {position} has invalid {attribute}={value:?}")]
    InvalidAttribute {
        /// Element name.
        element: &'static str,
        /// Attribute name.
        attribute: &'static str,
        /// Raw value.
        value: String,
        /// Reader position.
        position: u64,
    },
    /// An element appears where the document structure does not allow it.
    #[error("unexpected <{element}> at byte {position}")]
    UnexpectedElement {
        /// Element name.
        element: String,
        /// Reader position.
        position: u64,
    },
}

/// Transport-level errors encountered while issuing HTTP requests.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server returned an HTTP error status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Fully qualified request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Short error description supplied by the server.
        message: String,
    },
    /// The request failed due to an I/O error.
    #[error("network error contacting {url}: {source}")]
    Network {
        /// Fully qualified request URL.
        url: String,
        /// I/O error reported by the transport.
        source: io::Error,
    },
    /// The path cannot be resolved against the base URL.
    #[error("cannot resolve {path:?} against {base}: {source}")]
    Resolve {
        /// Base URL.
        base: String,
        /// Relative path.
        path: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// No file is stored under the path.
    #[error("no replication file at {path}")]
    NotFound {
        /// Relative path requested.
        path: String,
    },
}
