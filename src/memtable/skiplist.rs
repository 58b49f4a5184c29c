//! Lock-free skiplist backing the memtable.
//!
//! Concurrency contract: exactly one writer (the thread holding the
//! database write mutex) and any number of concurrent readers, with no
//! locks. Links are published with release stores and traversed with
//! acquire loads, so a reader that observes a node linked at some level
//! also observes the node's key and its lower-level links fully
//! initialized. Nodes are never unlinked; they live until the list is
//! dropped, which is what makes this safe without hazard pointers or
//! epoch reclamation.

use std::cell::Cell;
use std::cmp::Ordering as CmpOrdering;
use std::ptr::{addr_of_mut, null_mut};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use super::arena::Arena;

/// Maximum tower height.
pub(crate) const MAX_HEIGHT: usize = 12;

/// Geometric height distribution with p = 1/BRANCHING.
const BRANCHING: u64 = 4;

/// A skiplist node. The `next` array is a full-height tower; only the
/// first `height` slots (chosen at insert time) are ever linked, the rest
/// stay null and unread.
pub(crate) struct Node<K> {
    key: K,
    next: [AtomicPtr<Node<K>>; MAX_HEIGHT],
}

impl<K> Node<K> {
    #[inline]
    fn next(&self, level: usize) -> *mut Node<K> {
        self.next[level].load(Ordering::Acquire)
    }

    #[inline]
    fn set_next(&self, level: usize, node: *mut Node<K>) {
        self.next[level].store(node, Ordering::Release);
    }

    #[inline]
    fn next_relaxed(&self, level: usize) -> *mut Node<K> {
        self.next[level].load(Ordering::Relaxed)
    }

    #[inline]
    fn set_next_relaxed(&self, level: usize, node: *mut Node<K>) {
        self.next[level].store(node, Ordering::Relaxed);
    }
}

/// Sorted map over `K` with single-writer / many-reader semantics.
pub struct SkipList<K> {
    arena: Arena,
    /// Sentinel node holding `K::default()`; never compared against.
    head: *mut Node<K>,
    max_height: AtomicUsize,
    len: AtomicUsize,
    /// Height RNG (xorshift64). Only the single writer touches this.
    rng_state: Cell<u64>,
}

// Safety: insert (and with it rng_state and arena bumping) is serialized
// externally by the single-writer contract; readers only follow
// release-published pointers into arena memory that outlives them.
unsafe impl<K: Send> Send for SkipList<K> {}
unsafe impl<K: Send + Sync> Sync for SkipList<K> {}

impl<K: Ord + Default> SkipList<K> {
    /// Create an empty skiplist.
    pub fn new() -> Self {
        let arena = Arena::new();
        let head = Self::alloc_node(&arena);
        unsafe {
            addr_of_mut!((*head).key).write(K::default());
            let next = addr_of_mut!((*head).next) as *mut AtomicPtr<Node<K>>;
            for i in 0..MAX_HEIGHT {
                next.add(i).write(AtomicPtr::new(null_mut()));
            }
        }

        Self {
            arena,
            head,
            max_height: AtomicUsize::new(1),
            len: AtomicUsize::new(0),
            rng_state: Cell::new(rand::random::<u64>() | 1),
        }
    }

    /// Number of inserted keys.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate memory retained by the list's nodes.
    pub fn memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    /// Insert a key.
    ///
    /// Must only be called by one thread at a time; readers may run
    /// concurrently.
    pub fn insert(&self, key: K) {
        let mut prev: [*mut Node<K>; MAX_HEIGHT] = [null_mut(); MAX_HEIGHT];
        self.find_greater_or_equal(&key, Some(&mut prev));

        let height = self.random_height();
        if height > self.current_max_height() {
            for slot in prev
                .iter_mut()
                .take(height)
                .skip(self.current_max_height())
            {
                *slot = self.head;
            }
            // Relaxed is enough: a reader seeing the old height just
            // starts its descent one level lower.
            self.max_height.store(height, Ordering::Relaxed);
        }

        let node = self.new_node(key);
        unsafe {
            for level in 0..height {
                // The node is not yet visible, so its own link can be
                // relaxed; the predecessor link is the publication point.
                (*node).set_next_relaxed(level, (*prev[level]).next_relaxed(level));
                (*prev[level]).set_next(level, node);
            }
        }

        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Check whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        let node = self.find_greater_or_equal(key, None);
        !node.is_null() && unsafe { (*node).key.cmp(key) == CmpOrdering::Equal }
    }

    /// Borrowed iterator over the list.
    pub fn iter(&self) -> SkipListIterator<'_, K> {
        SkipListIterator {
            list: self,
            node: std::ptr::null(),
        }
    }

    // Raw cursor API. The returned pointers stay valid for the lifetime
    // of the list; the owned memtable iterator relies on this.

    pub(crate) fn first_node(&self) -> *const Node<K> {
        unsafe { (*self.head).next(0) }
    }

    pub(crate) fn seek_node(&self, key: &K) -> *const Node<K> {
        self.find_greater_or_equal(key, None)
    }

    pub(crate) unsafe fn next_node(node: *const Node<K>) -> *const Node<K> {
        (*node).next(0)
    }

    pub(crate) unsafe fn node_key<'a>(node: *const Node<K>) -> &'a K {
        &(*node).key
    }

    fn current_max_height(&self) -> usize {
        self.max_height.load(Ordering::Relaxed)
    }

    /// Find the first node with key >= `key`, optionally capturing the
    /// predecessor at every level.
    fn find_greater_or_equal(
        &self,
        key: &K,
        mut prev: Option<&mut [*mut Node<K>; MAX_HEIGHT]>,
    ) -> *mut Node<K> {
        let mut x = self.head;
        let mut level = self.current_max_height() - 1;
        loop {
            let next = unsafe { (*x).next(level) };
            if self.key_is_after_node(key, next) {
                x = next;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = x;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    #[inline]
    fn key_is_after_node(&self, key: &K, node: *mut Node<K>) -> bool {
        !node.is_null() && unsafe { (*node).key < *key }
    }

    fn random_height(&self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.next_random() % BRANCHING == 0 {
            height += 1;
        }
        height
    }

    fn next_random(&self) -> u64 {
        let mut x = self.rng_state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state.set(x);
        x
    }

    fn new_node(&self, key: K) -> *mut Node<K> {
        let node = Self::alloc_node(&self.arena);
        unsafe {
            addr_of_mut!((*node).key).write(key);
            let next = addr_of_mut!((*node).next) as *mut AtomicPtr<Node<K>>;
            for i in 0..MAX_HEIGHT {
                next.add(i).write(AtomicPtr::new(null_mut()));
            }
        }
        node
    }

    fn alloc_node(arena: &Arena) -> *mut Node<K> {
        let layout = std::alloc::Layout::new::<Node<K>>();
        arena.allocate_aligned(layout.size(), layout.align()) as *mut Node<K>
    }
}

impl<K: Ord + Default> Default for SkipList<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for SkipList<K> {
    fn drop(&mut self) {
        // Drop every key in place, the head sentinel's included; node
        // memory itself belongs to the arena.
        let mut node = self.head;
        while !node.is_null() {
            unsafe {
                let next = (*node).next_relaxed(0);
                std::ptr::drop_in_place(addr_of_mut!((*node).key));
                node = next;
            }
        }
    }
}

/// Borrowed forward iterator.
///
/// The iterator is a snapshot in the memory-order sense: inserts that
/// happen after a seek may or may not be observed, but the iterator never
/// sees a torn node.
pub struct SkipListIterator<'a, K> {
    list: &'a SkipList<K>,
    node: *const Node<K>,
}

impl<'a, K: Ord + Default> SkipListIterator<'a, K> {
    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Get the current key. Panics if the iterator is not valid.
    pub fn key(&self) -> &'a K {
        assert!(self.valid());
        unsafe { SkipList::node_key(self.node) }
    }

    /// Position at the first entry.
    pub fn seek_to_first(&mut self) {
        self.node = self.list.first_node();
    }

    /// Position at the first entry with key >= `target`.
    pub fn seek(&mut self, target: &K) {
        self.node = self.list.seek_node(target);
    }

    /// Advance to the next entry. Panics if the iterator is not valid.
    pub fn next(&mut self) {
        assert!(self.valid());
        self.node = unsafe { SkipList::next_node(self.node) };
    }
}
