//! Sorted key column beside a column of fixed-size values.

use std::cmp::Ordering;

use super::StoreError;
use super::codec::{FixedSizeCodec, LongCodec};
use super::list::AlignedDataList;
use super::memory::Memory;

/// Maps sparse, increasing keys to fixed-size values.
///
/// Key `i` of the sorted key column owns value slot `i`, so storage grows
/// with the number of keys rather than with the largest key. A new key is
/// published by pushing its value first and its key last.
///
/// # Examples
/// ```
/// use geo::Coord;
/// use mapsync_data::store::{CoordinateCodec, HeapMemory, MonotonicDataMap};
///
/// let mut map =
///     MonotonicDataMap::new(CoordinateCodec, HeapMemory::default(), HeapMemory::default())?;
/// map.put(11_000_000_000, &Coord { x: 1.0, y: 2.0 })?;
/// assert_eq!(map.get(11_000_000_000), Some(Coord { x: 1.0, y: 2.0 }));
/// assert_eq!(map.get(3), None);
/// # Ok::<(), mapsync_data::store::StoreError>(())
/// ```
#[derive(Debug)]
pub struct MonotonicDataMap<C, KM, VM> {
    keys: AlignedDataList<LongCodec, KM>,
    values: AlignedDataList<C, VM>,
}

impl<C: FixedSizeCodec, KM: Memory, VM: Memory> MonotonicDataMap<C, KM, VM> {
    /// Create an empty map with separate key and value memory.
    pub fn new(codec: C, keys: KM, values: VM) -> Result<Self, StoreError> {
        Ok(Self {
            keys: AlignedDataList::new(LongCodec, keys)?,
            values: AlignedDataList::new(codec, values)?,
        })
    }

    /// Number of keys stored.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.keys.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Store `value` under `key`.
    ///
    /// `key` must be greater than every key stored so far, or equal to one
    /// of them.
    pub fn put(&mut self, key: i64, value: &C::Value) -> Result<(), StoreError> {
        match self.last_key() {
            Some(last) if key <= last => {
                let slot = self
                    .search(key)
                    .ok_or(StoreError::UnorderedKey { key, last })?;
                self.values.set(slot, value)
            }
            _ => {
                self.values.push(value)?;
                self.keys.push(&key).map(|_| ())
            }
        }
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: i64) -> Option<C::Value> {
        self.search(key).and_then(|slot| self.values.get(slot))
    }

    /// Values for `keys`, aligned with the input.
    pub fn get_many(&self, keys: &[i64]) -> Vec<Option<C::Value>> {
        keys.iter().map(|key| self.get(*key)).collect()
    }

    fn last_key(&self) -> Option<i64> {
        self.keys
            .len()
            .checked_sub(1)
            .and_then(|last| self.keys.get(last))
    }

    /// Slot holding `key`.
    fn search(&self, key: i64) -> Option<u64> {
        let (mut low, mut high) = (0_u64, self.keys.len());
        while low < high {
            let mid = low + (high - low) / 2;
            match self.keys.get(mid)?.cmp(&key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }
}
