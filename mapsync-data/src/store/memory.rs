//! Segmented backing memory for the cache maps.
//!
//! Memory is a sequence of equally sized segments. Asking for a segment past
//! the end grows the memory by doubling its segment count, so appends cost
//! amortised constant time. Segments never move once allocated.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use memmap2::MmapMut;

use super::StoreError;

/// Default segment size: 1 MiB.
pub const DEFAULT_SEGMENT_SIZE: usize = 1 << 20;

/// Default segment size of mapped caches: 1 GiB.
///
/// Segment files are sparse, so a dense map addressed by planet-scale ids
/// costs a few hundred mappings rather than hundreds of thousands.
pub const MAPPED_SEGMENT_SIZE: usize = 1 << 30;

/// Growable, segmented byte storage.
pub trait Memory {
    /// Size in bytes of every segment; always a power of two.
    fn segment_size(&self) -> usize;

    /// Number of allocated segments.
    fn segment_count(&self) -> usize;

    /// Read access to an allocated segment.
    fn segment(&self, index: usize) -> Option<&[u8]>;

    /// Write access to a segment, growing the memory when `index` lies past
    /// the end.
    fn segment_mut(&mut self, index: usize) -> Result<&mut [u8], StoreError>;
}

impl<M: Memory + ?Sized> Memory for Box<M> {
    fn segment_size(&self) -> usize {
        (**self).segment_size()
    }

    fn segment_count(&self) -> usize {
        (**self).segment_count()
    }

    fn segment(&self, index: usize) -> Option<&[u8]> {
        (**self).segment(index)
    }

    fn segment_mut(&mut self, index: usize) -> Result<&mut [u8], StoreError> {
        (**self).segment_mut(index)
    }
}

fn validate_segment_size(size: usize) -> Result<(), StoreError> {
    if size.is_power_of_two() {
        Ok(())
    } else {
        Err(StoreError::SegmentSize { size, slot: 1 })
    }
}

/// Segment count after growing to hold `index`.
fn grown_count(current: usize, index: usize) -> usize {
    (current.saturating_mul(2)).max(index + 1)
}

/// Heap-resident segments.
#[derive(Debug)]
pub struct HeapMemory {
    segment_size: usize,
    segments: Vec<Box<[u8]>>,
}

impl HeapMemory {
    /// Create empty heap memory.
    pub fn new(segment_size: usize) -> Result<Self, StoreError> {
        validate_segment_size(segment_size)?;
        Ok(Self {
            segment_size,
            segments: Vec::new(),
        })
    }
}

impl Default for HeapMemory {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            segments: Vec::new(),
        }
    }
}

impl Memory for HeapMemory {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment(&self, index: usize) -> Option<&[u8]> {
        self.segments.get(index).map(AsRef::as_ref)
    }

    fn segment_mut(&mut self, index: usize) -> Result<&mut [u8], StoreError> {
        if index >= self.segments.len() {
            let target = grown_count(self.segments.len(), index);
            let size = self.segment_size;
            self.segments
                .resize_with(target, || vec![0_u8; size].into_boxed_slice());
        }
        self.segments
            .get_mut(index)
            .map(AsMut::as_mut)
            .ok_or_else(|| StoreError::OutOfBounds {
                position: u64::try_from(index).unwrap_or(u64::MAX),
            })
    }
}

/// Segments backed by memory-mapped files in a directory.
///
/// Segment files are named `segment-00000`, `segment-00001`, ... and are
/// truncated when created, so a directory left behind by an earlier run is
/// never read back.
pub struct MappedMemory {
    path: Utf8PathBuf,
    dir: fs_utf8::Dir,
    segment_size: usize,
    segments: Vec<MmapMut>,
}

impl fmt::Debug for MappedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedMemory")
            .field("path", &self.path)
            .field("segment_size", &self.segment_size)
            .field("segments", &self.segments.len())
            .finish()
    }
}

impl MappedMemory {
    /// Create mapped memory in `path`, creating the directory when missing.
    pub fn create(path: &Utf8Path, segment_size: usize) -> Result<Self, StoreError> {
        validate_segment_size(segment_size)?;
        let io_error = |source| StoreError::Io {
            path: path.to_owned(),
            source,
        };
        mapsync_fs::ensure_dir(path).map_err(io_error)?;
        let dir = fs_utf8::Dir::open_ambient_dir(path, ambient_authority()).map_err(io_error)?;
        Ok(Self {
            path: path.to_owned(),
            dir,
            segment_size,
            segments: Vec::new(),
        })
    }

    /// Directory holding the segment files.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn map_segment(&self, index: usize) -> Result<MmapMut, StoreError> {
        let name = format!("segment-{index:05}");
        let io_error = |source| StoreError::Io {
            path: self.path.join(&name),
            source,
        };
        let mut options = fs_utf8::OpenOptions::new();
        options.read(true).write(true).create(true).truncate(true);
        let file = self.dir.open_with(&name, &options).map_err(io_error)?;
        let len = u64::try_from(self.segment_size)
            .map_err(|err| io_error(std::io::Error::other(err)))?;
        file.set_len(len).map_err(io_error)?;
        let file = file.into_std();
        map_file(&file).map_err(io_error)
    }
}

#[expect(
    unsafe_code,
    reason = "memory mapping is inherently unsafe; the file is private to this process"
)]
fn map_file(file: &std::fs::File) -> std::io::Result<MmapMut> {
    // SAFETY: segment files live in a cache directory owned by the import
    // and are neither truncated nor written by anything else while mapped.
    unsafe { MmapMut::map_mut(file) }
}

impl Memory for MappedMemory {
    fn segment_size(&self) -> usize {
        self.segment_size
    }

    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment(&self, index: usize) -> Option<&[u8]> {
        self.segments.get(index).map(AsRef::as_ref)
    }

    fn segment_mut(&mut self, index: usize) -> Result<&mut [u8], StoreError> {
        if index >= self.segments.len() {
            let target = grown_count(self.segments.len(), index);
            for next in self.segments.len()..target {
                let segment = self.map_segment(next)?;
                self.segments.push(segment);
            }
        }
        self.segments
            .get_mut(index)
            .map(AsMut::as_mut)
            .ok_or_else(|| StoreError::OutOfBounds {
                position: u64::try_from(index).unwrap_or(u64::MAX),
            })
    }
}
