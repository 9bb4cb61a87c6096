//! Append-only log of length-prefixed byte frames.

use byteorder::{BigEndian, ByteOrder};

use super::StoreError;
use super::memory::Memory;

const PREFIX: usize = 4;

/// Byte frames appended to segmented memory.
///
/// Each frame is a big-endian `u32` length followed by the payload. A frame
/// never straddles two segments: when the remainder of the current segment
/// is too small, the frame starts at the next segment.
#[derive(Debug)]
pub struct AppendOnlyLog<M> {
    memory: M,
    position: u64,
    shift: u32,
    mask: u64,
}

impl<M: Memory> AppendOnlyLog<M> {
    /// Create an empty log over `memory`.
    pub fn new(memory: M) -> Result<Self, StoreError> {
        let segment_size = memory.segment_size();
        let invalid = || StoreError::SegmentSize {
            size: segment_size,
            slot: PREFIX,
        };
        if !segment_size.is_power_of_two() || segment_size <= PREFIX {
            return Err(invalid());
        }
        let mask = u64::try_from(segment_size).map_err(|_| invalid())? - 1;
        Ok(Self {
            memory,
            position: 0,
            shift: segment_size.trailing_zeros(),
            mask,
        })
    }

    /// Position the next frame would start at, barring a segment skip.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Append `payload`; returns the position of its frame.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64, StoreError> {
        let segment_size = self.memory.segment_size();
        let framed = PREFIX + payload.len();
        if framed > segment_size {
            return Err(StoreError::ValueTooLarge {
                size: framed,
                segment_size,
            });
        }
        let too_large = || StoreError::ValueTooLarge {
            size: framed,
            segment_size,
        };
        let length = u32::try_from(payload.len()).map_err(|_| too_large())?;
        let advance = u64::try_from(framed).map_err(|_| too_large())?;
        let mut position = self.position;
        let (_, offset) = self.locate(position)?;
        if offset + framed > segment_size {
            position = (position | self.mask) + 1;
        }
        let (segment, offset) = self.locate(position)?;
        let frame = self
            .memory
            .segment_mut(segment)?
            .get_mut(offset..offset + framed)
            .ok_or(StoreError::OutOfBounds { position })?;
        let (prefix, body) = frame.split_at_mut(PREFIX);
        BigEndian::write_u32(prefix, length);
        body.copy_from_slice(payload);
        self.position = position + advance;
        Ok(position)
    }

    /// Payload of the frame starting at `position`.
    pub fn read(&self, position: u64) -> Result<&[u8], StoreError> {
        if position >= self.position {
            return Err(StoreError::OutOfBounds { position });
        }
        let (segment, offset) = self.locate(position)?;
        let segment = self
            .memory
            .segment(segment)
            .ok_or(StoreError::OutOfBounds { position })?;
        let prefix = segment
            .get(offset..offset + PREFIX)
            .ok_or(StoreError::OutOfBounds { position })?;
        let length = usize::try_from(BigEndian::read_u32(prefix))
            .map_err(|_| StoreError::OutOfBounds { position })?;
        segment
            .get(offset + PREFIX..offset + PREFIX + length)
            .ok_or(StoreError::OutOfBounds { position })
    }

    /// Segment index and byte offset of `position`.
    fn locate(&self, position: u64) -> Result<(usize, usize), StoreError> {
        let out_of_bounds = |_| StoreError::OutOfBounds { position };
        Ok((
            usize::try_from(position >> self.shift).map_err(out_of_bounds)?,
            usize::try_from(position & self.mask).map_err(out_of_bounds)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::HeapMemory;
    use rstest::rstest;

    #[rstest]
    fn frames_do_not_straddle_segments() {
        let mut log = AppendOnlyLog::new(HeapMemory::new(16).expect("size")).expect("log");
        let first = log.append(&[1; 8]).expect("first");
        let second = log.append(&[2; 8]).expect("second");
        assert_eq!(first, 0);
        assert_eq!(second, 16, "second frame moves to the next segment");
        assert_eq!(log.read(first).expect("read"), &[1; 8]);
        assert_eq!(log.read(second).expect("read"), &[2; 8]);
    }

    #[rstest]
    fn oversized_values_are_rejected() {
        let mut log = AppendOnlyLog::new(HeapMemory::new(16).expect("size")).expect("log");
        assert!(matches!(
            log.append(&[0; 13]),
            Err(StoreError::ValueTooLarge {
                size: 17,
                segment_size: 16
            })
        ));
    }

    #[rstest]
    fn empty_payloads_round_trip() {
        let mut log = AppendOnlyLog::new(HeapMemory::new(16).expect("size")).expect("log");
        let position = log.append(&[]).expect("append");
        assert!(log.read(position).expect("read").is_empty());
    }

    #[rstest]
    #[case(16)]
    #[case(u64::MAX)]
    fn positions_past_the_end_are_out_of_bounds(#[case] position: u64) {
        let mut log = AppendOnlyLog::new(HeapMemory::new(16).expect("size")).expect("log");
        log.append(&[7; 4]).expect("append");
        assert!(matches!(
            log.read(position),
            Err(StoreError::OutOfBounds { position: found }) if found == position
        ));
    }
}
