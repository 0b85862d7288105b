use crate::value::{SeqNo, UserKey, UserValue, ValueType};
use crate::Value;
use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// The memtable serves as an intermediary, sorted storage for new items
///
/// It is keyed uniquely by user key: a write replaces the previous entry
/// for the same key (the WAL retains history until checkpoint).
#[derive(Default)]
pub struct MemTable {
    pub(crate) items: SkipMap<UserKey, Value>,

    /// Approximate size of the memtable in bytes
    ///
    /// If this grows too large, the memtable is rotated out and flushed
    approximate_size: AtomicU32,

    /// Highest seqno inserted so far; becomes the flush checkpoint
    highest_seqno: AtomicU64,
}

impl MemTable {
    /// Returns the latest entry for the key, if it exists
    ///
    /// Tombstones are returned as-is.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Option<Value> {
        self.items
            .get(key.as_ref())
            .map(|entry| entry.value().clone())
    }

    /// Get approximate size of the memtable in bytes
    ///
    /// Replaced entries are not reclaimed, so the figure only grows
    /// until the memtable is rotated out.
    pub fn approximate_size(&self) -> u32 {
        self.approximate_size.load(Ordering::Acquire)
    }

    /// Returns `true` once the memtable has outgrown its size budget
    /// and should be rotated out for flushing
    #[must_use]
    pub fn is_full(&self, max_size_bytes: u32) -> bool {
        self.approximate_size() >= max_size_bytes
    }

    /// Counts the amount of items in the memtable
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a key-value pair, replacing any previous entry for the key
    pub fn put<K: Into<UserKey>, V: Into<UserValue>>(&self, key: K, value: V, seqno: SeqNo) {
        self.insert(Value::new(key, value, seqno, ValueType::Value));
    }

    /// Stores a tombstone for the key, masking older values
    pub fn delete<K: Into<UserKey>>(&self, key: K, seqno: SeqNo) {
        self.insert(Value::new_tombstone(key, seqno));
    }

    /// Inserts an already-built entry, replacing any previous
    /// entry for the same key
    pub fn insert(&self, item: Value) {
        // NOTE: Truncation is okay, single items are nowhere near 4 GB
        #[allow(clippy::cast_possible_truncation)]
        let item_size = item.size() as u32;

        self.approximate_size.fetch_add(item_size, Ordering::AcqRel);
        self.highest_seqno.fetch_max(item.seqno, Ordering::AcqRel);

        self.items.insert(item.key.clone(), item);
    }

    /// Returns the highest sequence number in the memtable
    pub fn highest_seqno(&self) -> SeqNo {
        self.highest_seqno.load(Ordering::Acquire)
    }

    /// Iterates the entries in key order
    pub fn iter_sorted(&self) -> impl Iterator<Item = Value> + '_ {
        self.items.iter().map(|entry| entry.value().clone())
    }
}
