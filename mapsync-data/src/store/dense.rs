//! Direct-addressed map over near-contiguous integer keys.

use super::StoreError;
use super::codec::FixedSizeCodec;
use super::list::AlignedDataList;
use super::memory::Memory;

/// Maps a non-negative key straight to slot `key`.
///
/// Slots below the highest key written that were never assigned hold the
/// codec's absent sentinel, so lookups of unknown keys cost one read. Over
/// a codec whose zeroed slot is absent, a distant key only allocates the
/// segment it lands in plus the segment table up to it.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use mapsync_data::store::{CoordinateCodec, DenseDataMap, HeapMemory};
///
/// let mut map = DenseDataMap::new(CoordinateCodec, HeapMemory::default())?;
/// map.put(3, &Coord { x: 1.0, y: 2.0 })?;
/// assert_eq!(map.get(3), Some(Coord { x: 1.0, y: 2.0 }));
/// assert_eq!(map.get(1), None);
/// # Ok::<(), mapsync_data::store::StoreError>(())
/// ```
#[derive(Debug)]
pub struct DenseDataMap<C, M> {
    slots: AlignedDataList<C, M>,
}

impl<C: FixedSizeCodec, M: Memory> DenseDataMap<C, M> {
    /// Create an empty map over `memory`.
    pub fn new(codec: C, memory: M) -> Result<Self, StoreError> {
        Ok(Self {
            slots: AlignedDataList::new(codec, memory)?,
        })
    }

    /// Store `value` under `key`.
    pub fn put(&mut self, key: i64, value: &C::Value) -> Result<(), StoreError> {
        let index = u64::try_from(key).map_err(|_| StoreError::NegativeKey { key })?;
        self.slots.grow_to(index + 1)?;
        self.slots.set(index, value)
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: i64) -> Option<C::Value> {
        u64::try_from(key)
            .ok()
            .and_then(|index| self.slots.get(index))
    }

    /// Values for `keys`, aligned with the input.
    pub fn get_many(&self, keys: &[i64]) -> Vec<Option<C::Value>> {
        keys.iter().map(|key| self.get(*key)).collect()
    }

    /// One past the highest key written.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.slots.len()
    }
}
