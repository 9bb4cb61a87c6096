//! Splits a snapshot byte stream into length-prefixed blobs.
//!
//! Each frame is `[u32 BE header length][BlobHeader][Blob]`. The reader never
//! yields a partially read blob: a stream that ends inside a frame is a
//! [`FormatError::Truncated`]. Blobs whose declared type is neither
//! `OSMHeader` nor `OSMData` are skipped with a warning.

use std::io::{self, Read};

use byteorder::{BigEndian, ByteOrder};
use log::warn;
use prost::Message;

use super::FormatError;
use super::proto;

/// Declared type of the header blob.
pub const HEADER_TYPE: &str = "OSMHeader";
/// Declared type of data blobs.
pub const DATA_TYPE: &str = "OSMData";

const MAX_BLOB_HEADER_SIZE: u64 = 64 * 1024;
const MAX_BLOB_SIZE: u64 = 32 * 1024 * 1024;

/// Where a blob came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Byte offset of the frame within the stream.
    pub offset: u64,
    /// Total frame length, prefix and header included.
    pub size: u64,
    /// Declared blob type.
    pub kind: String,
}

/// A framed blob whose payload has not been decoded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlob {
    /// Provenance of the blob.
    pub info: BlobInfo,
    /// Encoded `Blob` message.
    pub data: Vec<u8>,
}

/// Iterates over the blobs of a snapshot stream.
///
/// The iterator is fused after the first error.
///
/// # Examples
/// ```
/// use mapsync_data::pbf::BlobReader;
///
/// let mut reader = BlobReader::new(&[][..]);
/// assert!(reader.next_blob()?.is_none());
/// # Ok::<(), mapsync_data::pbf::FormatError>(())
/// ```
#[derive(Debug)]
pub struct BlobReader<R> {
    reader: R,
    offset: u64,
    failed: bool,
}

impl<R: Read> BlobReader<R> {
    /// Wrap a byte stream positioned at the start of a frame.
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            failed: false,
        }
    }

    /// Byte offset of the next frame.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next recognised blob, or `None` at a clean end of stream.
    pub fn next_blob(&mut self) -> Result<Option<RawBlob>, FormatError> {
        loop {
            let Some(blob) = self.read_frame()? else {
                return Ok(None);
            };
            if blob.info.kind == HEADER_TYPE || blob.info.kind == DATA_TYPE {
                return Ok(Some(blob));
            }
            warn!(
                "skipping blob of unknown type {:?} at byte offset {}",
                blob.info.kind, blob.info.offset
            );
        }
    }

    fn read_frame(&mut self) -> Result<Option<RawBlob>, FormatError> {
        let offset = self.offset;
        let mut prefix = [0_u8; 4];
        let read = self.fill(&mut prefix, offset)?;
        if read == 0 {
            return Ok(None);
        }
        if read < prefix.len() {
            return Err(truncated("length prefix", offset, 4, read));
        }
        let header_len = u64::from(BigEndian::read_u32(&prefix));
        if header_len > MAX_BLOB_HEADER_SIZE {
            return Err(FormatError::InvalidSize {
                what: "blob header",
                offset,
                size: i64::from(BigEndian::read_u32(&prefix)),
                limit: MAX_BLOB_HEADER_SIZE,
            });
        }

        let header_bytes = self.read_exact_len(header_len, "blob header", offset)?;
        let header = proto::BlobHeader::decode(header_bytes.as_slice()).map_err(|source| {
            FormatError::Message {
                what: "blob header",
                offset,
                source,
            }
        })?;
        let data_len = u64::try_from(header.datasize)
            .ok()
            .filter(|size| *size <= MAX_BLOB_SIZE)
            .ok_or(FormatError::InvalidSize {
                what: "blob",
                offset,
                size: i64::from(header.datasize),
                limit: MAX_BLOB_SIZE,
            })?;
        let data = self.read_exact_len(data_len, "blob", offset)?;

        let size = 4 + header_len + data_len;
        self.offset += size;
        Ok(Some(RawBlob {
            info: BlobInfo {
                offset,
                size,
                kind: header.r#type,
            },
            data,
        }))
    }

    fn read_exact_len(
        &mut self,
        len: u64,
        what: &'static str,
        offset: u64,
    ) -> Result<Vec<u8>, FormatError> {
        let capacity = usize::try_from(len).map_err(|_| FormatError::InvalidSize {
            what,
            offset,
            size: i64::try_from(len).unwrap_or(i64::MAX),
            limit: MAX_BLOB_SIZE,
        })?;
        let mut buffer = vec![0_u8; capacity];
        let read = self.fill(&mut buffer, offset)?;
        if read < capacity {
            return Err(truncated(what, offset, len, read));
        }
        Ok(buffer)
    }

    /// Read until `buffer` is full or the stream ends; returns bytes read.
    fn fill(&mut self, buffer: &mut [u8], offset: u64) -> Result<usize, FormatError> {
        let mut filled = 0;
        while let Some(rest) = buffer.get_mut(filled..).filter(|rest| !rest.is_empty()) {
            match self.reader.read(rest) {
                Ok(0) => break,
                Ok(read) => filled += read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(FormatError::Io { offset, source }),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<RawBlob, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let result = self.next_blob();
        if result.is_err() {
            self.failed = true;
        }
        result.transpose()
    }
}

fn truncated(what: &'static str, offset: u64, expected: u64, found: usize) -> FormatError {
    FormatError::Truncated {
        what,
        offset,
        expected,
        found: u64::try_from(found).unwrap_or(u64::MAX),
    }
}
