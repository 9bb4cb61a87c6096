//! Fixed-width slots laid out contiguously over segmented memory.

use super::StoreError;
use super::codec::FixedSizeCodec;
use super::memory::Memory;

/// A growable list of fixed-size slots.
///
/// Slot `i` lives at byte `i * C::SIZE`. Both the slot width and the segment
/// size are powers of two, so a slot never straddles two segments and its
/// location is found with a shift and a mask.
#[derive(Debug)]
pub struct AlignedDataList<C, M> {
    codec: C,
    memory: M,
    len: u64,
    shift: u32,
    mask: u64,
}

impl<C: FixedSizeCodec, M: Memory> AlignedDataList<C, M> {
    /// Create an empty list over `memory`.
    pub fn new(codec: C, memory: M) -> Result<Self, StoreError> {
        let segment_size = memory.segment_size();
        let invalid = || StoreError::SegmentSize {
            size: segment_size,
            slot: C::SIZE,
        };
        if !C::SIZE.is_power_of_two() || !segment_size.is_power_of_two() || segment_size < C::SIZE
        {
            return Err(invalid());
        }
        let mask = u64::try_from(segment_size).map_err(|_| invalid())? - 1;
        Ok(Self {
            codec,
            memory,
            len: 0,
            shift: segment_size.trailing_zeros(),
            mask,
        })
    }

    /// Number of slots written.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether no slot has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Segment index and byte offset of slot `index`.
    fn locate(&self, index: u64) -> Result<(usize, usize), StoreError> {
        let out_of_bounds = || StoreError::OutOfBounds { position: index };
        let byte = u64::try_from(C::SIZE)
            .ok()
            .and_then(|width| index.checked_mul(width))
            .ok_or_else(out_of_bounds)?;
        let segment = usize::try_from(byte >> self.shift).map_err(|_| out_of_bounds())?;
        let offset = usize::try_from(byte & self.mask).map_err(|_| out_of_bounds())?;
        Ok((segment, offset))
    }

    /// Read slot `index`; `None` past the end or for an absent slot.
    pub fn get(&self, index: u64) -> Option<C::Value> {
        if index >= self.len {
            return None;
        }
        let (segment, offset) = self.locate(index).ok()?;
        let slot = self.memory.segment(segment)?.get(offset..offset + C::SIZE)?;
        self.codec.decode(slot)
    }

    /// Overwrite slot `index`, which must already exist.
    pub fn set(&mut self, index: u64, value: &C::Value) -> Result<(), StoreError> {
        if index >= self.len {
            return Err(StoreError::OutOfBounds { position: index });
        }
        let location = self.locate(index)?;
        let slot = slot_in(&mut self.memory, location, C::SIZE, index)?;
        self.codec.encode(value, slot);
        Ok(())
    }

    /// Append a value; returns its index.
    pub fn push(&mut self, value: &C::Value) -> Result<u64, StoreError> {
        let index = self.len;
        let location = self.locate(index)?;
        let slot = slot_in(&mut self.memory, location, C::SIZE, index)?;
        self.codec.encode(value, slot);
        self.len += 1;
        Ok(index)
    }

    /// Append an absent slot; returns its index.
    pub fn push_absent(&mut self) -> Result<u64, StoreError> {
        let index = self.len;
        let location = self.locate(index)?;
        let slot = slot_in(&mut self.memory, location, C::SIZE, index)?;
        self.codec.encode_absent(slot);
        self.len += 1;
        Ok(index)
    }

    /// Extend the list to `len` slots, filling new slots with the absent
    /// sentinel. A shorter `len` is a no-op.
    ///
    /// Codecs whose zeroed slot already reads as absent skip the per-slot
    /// writes and only allocate the segment holding the last slot.
    pub fn grow_to(&mut self, len: u64) -> Result<(), StoreError> {
        if len <= self.len {
            return Ok(());
        }
        if C::ZEROED_IS_ABSENT {
            let (segment, _) = self.locate(len - 1)?;
            self.memory.segment_mut(segment)?;
            self.len = len;
            return Ok(());
        }
        while self.len < len {
            self.push_absent()?;
        }
        Ok(())
    }
}

/// Slot of `width` bytes at `location`, growing `memory` when needed.
fn slot_in<M: Memory>(
    memory: &mut M,
    (segment, offset): (usize, usize),
    width: usize,
    index: u64,
) -> Result<&mut [u8], StoreError> {
    memory
        .segment_mut(segment)?
        .get_mut(offset..offset + width)
        .ok_or(StoreError::OutOfBounds { position: index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CoordinateCodec, HeapMemory, IndexEntry, IndexEntryCodec};
    use geo::Coord;
    use rstest::rstest;

    #[rstest]
    fn slots_span_segments() {
        let memory = HeapMemory::new(32).expect("valid size");
        let mut list = AlignedDataList::new(CoordinateCodec, memory).expect("list");
        for i in 0..5_u32 {
            list.push(&Coord {
                x: f64::from(i),
                y: -f64::from(i),
            })
            .expect("push");
        }
        assert_eq!(list.len(), 5);
        assert_eq!(list.get(4), Some(Coord { x: 4.0, y: -4.0 }));
        list.set(2, &Coord { x: 9.0, y: 9.0 }).expect("set");
        assert_eq!(list.get(2), Some(Coord { x: 9.0, y: 9.0 }));
        assert_eq!(list.get(5), None);
    }

    #[rstest]
    fn segments_smaller_than_a_slot_are_rejected() {
        let memory = HeapMemory::new(8).expect("valid size");
        assert!(matches!(
            AlignedDataList::new(CoordinateCodec, memory),
            Err(StoreError::SegmentSize { size: 8, slot: 16 })
        ));
    }

    #[rstest]
    fn set_and_push_write_through_the_codec() {
        let memory = HeapMemory::new(16).expect("valid size");
        let mut list = AlignedDataList::new(IndexEntryCodec, memory).expect("list");
        let first = IndexEntry {
            key: 7,
            position: 0,
        };
        assert_eq!(list.push(&first).expect("push"), 0);
        assert_eq!(list.push_absent().expect("absent"), 1);
        list.set(
            1,
            &IndexEntry {
                key: 8,
                position: 16,
            },
        )
        .expect("set");
        assert_eq!(list.get(0), Some(first));
        assert_eq!(list.get(1).map(|entry| entry.key), Some(8));
        assert!(matches!(
            list.set(2, &first),
            Err(StoreError::OutOfBounds { position: 2 })
        ));
    }

    #[rstest]
    fn growing_a_zero_absent_list_only_touches_the_last_segment() {
        let memory = HeapMemory::new(64).expect("valid size");
        let mut list = AlignedDataList::new(CoordinateCodec, memory).expect("list");
        list.grow_to(10_000).expect("grow");
        assert_eq!(list.len(), 10_000);
        assert_eq!(list.get(0), None);
        assert_eq!(list.get(9_999), None);
        list.set(9_999, &Coord { x: 0.0, y: 0.0 }).expect("set");
        assert_eq!(list.get(9_999), Some(Coord { x: 0.0, y: 0.0 }));
        list.grow_to(5).expect("shrinking is a no-op");
        assert_eq!(list.len(), 10_000);
    }

    #[rstest]
    fn growing_other_lists_writes_sentinels() {
        let memory = HeapMemory::new(64).expect("valid size");
        let mut list = AlignedDataList::new(IndexEntryCodec, memory).expect("list");
        list.grow_to(9).expect("grow");
        assert_eq!(list.len(), 9);
        assert!((0..9).all(|index| list.get(index).is_none()));
    }
}
