//! MemTable - in-memory sorted write buffer.
//!
//! The memtable is the first destination for every write. It is a thin
//! layer over the lock-free [`SkipList`], recording the operation type and
//! sequence number of each mutation and tracking approximate memory use so
//! the facade knows when to rotate.
//!
//! Multiple versions of the same user key coexist with different sequence
//! numbers; reads at a snapshot see the newest version at or before that
//! snapshot.

pub mod arena;
pub mod skiplist;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::types::{InternalKey, LookupResult, ValueType};

use skiplist::{Node, SkipList};

/// Fixed per-entry overhead estimate: node tower plus counters.
const ENTRY_OVERHEAD: usize = 64;

/// A single memtable entry. Ordering follows the internal key only; the
/// value never participates.
#[derive(Debug, Default)]
pub struct MemEntry {
    /// Internal key (user key, sequence, type).
    pub key: InternalKey,
    /// Value bytes; empty for tombstones.
    pub value: Bytes,
}

impl PartialEq for MemEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for MemEntry {}

impl PartialOrd for MemEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// In-memory sorted table over the skiplist.
///
/// Writes must come from a single thread at a time (the facade's write
/// mutex provides this); reads may come from any thread concurrently.
pub struct MemTable {
    /// The underlying skiplist of entries.
    table: SkipList<MemEntry>,

    /// Approximate memory usage in bytes.
    approximate_memory_usage: AtomicUsize,

    /// Minimum sequence number in this memtable.
    min_sequence: AtomicU64,

    /// Maximum sequence number in this memtable.
    max_sequence: AtomicU64,

    /// Number of entries.
    entry_count: AtomicUsize,

    /// Unique ID for this memtable.
    id: u64,
}

impl MemTable {
    /// Create a new empty memtable.
    pub fn new(id: u64) -> Self {
        Self {
            table: SkipList::new(),
            approximate_memory_usage: AtomicUsize::new(0),
            min_sequence: AtomicU64::new(u64::MAX),
            max_sequence: AtomicU64::new(0),
            entry_count: AtomicUsize::new(0),
            id,
        }
    }

    /// Get the memtable ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Insert a mutation.
    pub fn add(&self, user_key: &[u8], value: &[u8], sequence: u64, value_type: ValueType) {
        let entry = MemEntry {
            key: InternalKey::new(Bytes::copy_from_slice(user_key), sequence, value_type),
            value: Bytes::copy_from_slice(value),
        };

        let entry_size = user_key.len() + value.len() + ENTRY_OVERHEAD;
        self.approximate_memory_usage
            .fetch_add(entry_size, Ordering::Relaxed);

        self.update_sequence_bounds(sequence);

        self.table.insert(entry);
        self.entry_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Look up a key at a snapshot.
    ///
    /// Seeks to `(user_key, snapshot)` and walks forward; because entries
    /// sort newest-first within a user key, the first entry for the key at
    /// or below the snapshot is the authoritative one.
    pub fn get(&self, user_key: &[u8], snapshot: u64) -> LookupResult {
        let target = MemEntry {
            key: InternalKey::for_value(Bytes::copy_from_slice(user_key), snapshot),
            value: Bytes::new(),
        };

        let mut node = self.table.seek_node(&target);
        while !node.is_null() {
            let entry = unsafe { SkipList::node_key(node) };
            if entry.key.user_key() != user_key {
                break;
            }
            if entry.key.sequence() <= snapshot {
                if entry.key.is_deletion() {
                    return LookupResult::Deleted;
                }
                return LookupResult::Found(entry.value.clone());
            }
            node = unsafe { SkipList::next_node(node) };
        }

        LookupResult::NotFound
    }

    /// Get approximate memory usage in bytes.
    pub fn approximate_memory_usage(&self) -> usize {
        self.approximate_memory_usage.load(Ordering::Relaxed)
    }

    /// Get the number of entries.
    pub fn entry_count(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Check if the memtable is empty.
    pub fn is_empty(&self) -> bool {
        self.entry_count() == 0
    }

    /// Check whether this memtable has reached the rotation threshold.
    pub fn should_flush(&self, threshold: usize) -> bool {
        self.approximate_memory_usage() >= threshold
    }

    /// Get the minimum sequence number.
    pub fn min_sequence(&self) -> u64 {
        let min = self.min_sequence.load(Ordering::Relaxed);
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Get the maximum sequence number.
    pub fn max_sequence(&self) -> u64 {
        self.max_sequence.load(Ordering::Relaxed)
    }

    /// Create a borrowed iterator over all entries in internal-key order.
    pub fn iter(&self) -> MemTableIterator<'_> {
        MemTableIterator {
            inner: self.table.iter(),
        }
    }

    /// Create an iterator that keeps the memtable alive via `Arc`.
    ///
    /// Used by the database iterator, which outlives any borrow of the
    /// facade's memtable pointers.
    pub fn iter_owned(self: &Arc<Self>) -> OwnedMemTableIterator {
        OwnedMemTableIterator {
            memtable: Arc::clone(self),
            node: std::ptr::null(),
        }
    }

    fn update_sequence_bounds(&self, seq: u64) {
        let mut current_min = self.min_sequence.load(Ordering::Relaxed);
        while seq < current_min {
            match self.min_sequence.compare_exchange_weak(
                current_min,
                seq,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_min = x,
            }
        }

        let mut current_max = self.max_sequence.load(Ordering::Relaxed);
        while seq > current_max {
            match self.max_sequence.compare_exchange_weak(
                current_max,
                seq,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }
}

impl std::fmt::Debug for MemTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTable")
            .field("id", &self.id)
            .field("entries", &self.entry_count())
            .field("memory", &self.approximate_memory_usage())
            .finish()
    }
}

/// Borrowed iterator over memtable entries.
pub struct MemTableIterator<'a> {
    inner: skiplist::SkipListIterator<'a, MemEntry>,
}

impl<'a> MemTableIterator<'a> {
    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// Current internal key.
    pub fn key(&self) -> &'a InternalKey {
        &self.inner.key().key
    }

    /// Current value.
    pub fn value(&self) -> &'a Bytes {
        &self.inner.key().value
    }

    /// Position at the first entry.
    pub fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
    }

    /// Position at the newest version of `user_key` (or the first entry
    /// after it).
    pub fn seek(&mut self, user_key: &[u8]) {
        let target = MemEntry {
            key: InternalKey::for_value(Bytes::copy_from_slice(user_key), u64::MAX),
            value: Bytes::new(),
        };
        self.inner.seek(&target);
    }

    /// Advance to the next entry.
    pub fn next(&mut self) {
        self.inner.next();
    }
}

/// Iterator owning its memtable through an `Arc`.
pub struct OwnedMemTableIterator {
    memtable: Arc<MemTable>,
    node: *const Node<MemEntry>,
}

// Safety: the node pointer targets arena memory kept alive by `memtable`.
unsafe impl Send for OwnedMemTableIterator {}

impl OwnedMemTableIterator {
    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Current internal key.
    pub fn key(&self) -> &InternalKey {
        debug_assert!(self.valid());
        unsafe { &SkipList::node_key(self.node).key }
    }

    /// Current value.
    pub fn value(&self) -> &Bytes {
        debug_assert!(self.valid());
        unsafe { &SkipList::node_key(self.node).value }
    }

    /// Position at the first entry.
    pub fn seek_to_first(&mut self) {
        self.node = self.memtable.table.first_node();
    }

    /// Position at the newest version of `user_key` (or the first entry
    /// after it).
    pub fn seek(&mut self, user_key: &[u8]) {
        let target = MemEntry {
            key: InternalKey::for_value(Bytes::copy_from_slice(user_key), u64::MAX),
            value: Bytes::new(),
        };
        self.node = self.memtable.table.seek_node(&target);
    }

    /// Advance to the next entry.
    pub fn next(&mut self) {
        debug_assert!(self.valid());
        self.node = unsafe { SkipList::next_node(self.node) };
    }
}

/// A handle to a memtable that has been rotated out of the write path.
///
/// Read-only from the engine's perspective; served to readers while the
/// flush runs and dropped after the flush commits.
#[derive(Debug, Clone)]
pub struct ImmutableMemTable {
    inner: Arc<MemTable>,
}

impl ImmutableMemTable {
    /// Create from a memtable.
    pub fn new(memtable: MemTable) -> Self {
        Self {
            inner: Arc::new(memtable),
        }
    }

    /// Create from an already shared memtable.
    pub fn from_arc(memtable: Arc<MemTable>) -> Self {
        Self { inner: memtable }
    }

    /// Get a reference to the inner memtable.
    pub fn inner(&self) -> &Arc<MemTable> {
        &self.inner
    }

    /// Get the memtable ID.
    pub fn id(&self) -> u64 {
        self.inner.id()
    }

    /// Look up a key.
    pub fn get(&self, user_key: &[u8], snapshot: u64) -> LookupResult {
        self.inner.get(user_key, snapshot)
    }

    /// Get approximate memory usage.
    pub fn approximate_memory_usage(&self) -> usize {
        self.inner.approximate_memory_usage()
    }

    /// Maximum sequence contained in this memtable.
    pub fn max_sequence(&self) -> u64 {
        self.inner.max_sequence()
    }

    /// Create a borrowed iterator.
    pub fn iter(&self) -> MemTableIterator<'_> {
        self.inner.iter()
    }

    /// Create an owning iterator.
    pub fn iter_owned(&self) -> OwnedMemTableIterator {
        self.inner.iter_owned()
    }
}
