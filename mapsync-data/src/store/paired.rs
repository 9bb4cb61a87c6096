//! Sorted `(key, position)` index over an append-only log of values.

use std::cmp::Ordering;

use super::StoreError;
use super::append_log::AppendOnlyLog;
use super::codec::{IndexEntry, IndexEntryCodec, VariableSizeCodec};
use super::list::AlignedDataList;
use super::memory::Memory;

/// Maps sparse, increasing keys to variable-size values.
///
/// Values are never overwritten in place. Writing a key again appends the
/// new value and repoints its index entry with one slot write, so a reader
/// sees either the old value or the new one.
///
/// # Examples
/// ```
/// use mapsync_data::store::{HeapMemory, LongListCodec, PairedDataMap};
///
/// let mut map = PairedDataMap::new(LongListCodec, HeapMemory::default(), HeapMemory::default())?;
/// map.put(7, &vec![1, 2, 3])?;
/// map.put(42, &vec![3, 4])?;
/// assert_eq!(map.get(7)?, Some(vec![1, 2, 3]));
/// assert_eq!(map.get(8)?, None);
/// # Ok::<(), mapsync_data::store::StoreError>(())
/// ```
#[derive(Debug)]
pub struct PairedDataMap<C, IM, LM> {
    codec: C,
    index: AlignedDataList<IndexEntryCodec, IM>,
    log: AppendOnlyLog<LM>,
    buffer: Vec<u8>,
}

impl<C: VariableSizeCodec, IM: Memory, LM: Memory> PairedDataMap<C, IM, LM> {
    /// Create an empty map with separate index and log memory.
    pub fn new(codec: C, index: IM, log: LM) -> Result<Self, StoreError> {
        Ok(Self {
            codec,
            index: AlignedDataList::new(IndexEntryCodec, index)?,
            log: AppendOnlyLog::new(log)?,
            buffer: Vec::new(),
        })
    }

    /// Number of keys stored.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.index.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Store `value` under `key`.
    ///
    /// `key` must be greater than every key stored so far, or equal to one
    /// of them.
    pub fn put(&mut self, key: i64, value: &C::Value) -> Result<(), StoreError> {
        let slot = match self.last_key() {
            Some(last) if key <= last => Some(
                self.search(key)
                    .ok_or(StoreError::UnorderedKey { key, last })?,
            ),
            _ => None,
        };
        self.buffer.clear();
        self.buffer.reserve(self.codec.encoded_len(value));
        self.codec.encode(value, &mut self.buffer);
        let position = self.log.append(&self.buffer)?;
        let entry = IndexEntry { key, position };
        match slot {
            Some(slot) => self.index.set(slot, &entry),
            None => self.index.push(&entry).map(|_| ()),
        }
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: i64) -> Result<Option<C::Value>, StoreError> {
        let Some(slot) = self.search(key) else {
            return Ok(None);
        };
        let Some(entry) = self.index.get(slot) else {
            return Ok(None);
        };
        let bytes = self.log.read(entry.position)?;
        Ok(Some(self.codec.decode(bytes)?))
    }

    /// Values for `keys`, aligned with the input.
    pub fn get_many(&self, keys: &[i64]) -> Result<Vec<Option<C::Value>>, StoreError> {
        keys.iter().map(|key| self.get(*key)).collect()
    }

    fn last_key(&self) -> Option<i64> {
        self.index
            .len()
            .checked_sub(1)
            .and_then(|last| self.index.get(last))
            .map(|entry| entry.key)
    }

    /// Slot holding `key`.
    fn search(&self, key: i64) -> Option<u64> {
        let (mut low, mut high) = (0_u64, self.index.len());
        while low < high {
            let mid = low + (high - low) / 2;
            match self.index.get(mid)?.key.cmp(&key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => return Some(mid),
            }
        }
        None
    }
}
