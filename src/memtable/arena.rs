//! Memory arena backing skiplist nodes.
//!
//! Bump-pointer allocation within blocks; everything is freed at once when
//! the arena is dropped. Skiplist nodes live for the memtable's entire
//! lifetime, which is what makes the lock-free reader protocol work
//! without hazard pointers.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default block size (4KB).
const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

/// Bump-pointer arena.
///
/// Allocation is only called by the single writer; the returned pointers
/// stay valid (and readable from any thread) until the arena is dropped.
pub struct Arena {
    /// Current allocation pointer within the current block.
    alloc_ptr: UnsafeCell<*mut u8>,
    /// Remaining bytes in the current block.
    alloc_bytes_remaining: UnsafeCell<usize>,
    /// All allocated blocks with their layouts, for deallocation on drop.
    blocks: UnsafeCell<Vec<(NonNull<u8>, Layout)>>,
    /// Block size for new allocations.
    block_size: usize,
    /// Total memory usage.
    memory_usage: AtomicUsize,
}

// Safety: allocation is serialized by the single-writer discipline of the
// owning skiplist; readers only dereference previously returned pointers.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    /// Create a new arena with default block size.
    pub fn new() -> Self {
        Self::with_block_size(DEFAULT_BLOCK_SIZE)
    }

    /// Create a new arena with specified block size.
    pub fn with_block_size(block_size: usize) -> Self {
        Self {
            alloc_ptr: UnsafeCell::new(std::ptr::null_mut()),
            alloc_bytes_remaining: UnsafeCell::new(0),
            blocks: UnsafeCell::new(Vec::new()),
            block_size,
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Allocate `size` bytes aligned to `align`.
    ///
    /// The memory is uninitialized and valid until the arena is dropped.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
        debug_assert!(align.is_power_of_two());

        unsafe {
            let current = *self.alloc_ptr.get() as usize;
            let aligned = (current + align - 1) & !(align - 1);
            let padding = aligned - current;
            let needed = size + padding;

            let remaining = *self.alloc_bytes_remaining.get();
            if current != 0 && needed <= remaining {
                let result = aligned as *mut u8;
                *self.alloc_ptr.get() = result.add(size);
                *self.alloc_bytes_remaining.get() = remaining - needed;
                return result;
            }
        }

        self.allocate_fallback(size, align)
    }

    /// Allocate `size` bytes with pointer alignment.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        self.allocate_aligned(size, std::mem::align_of::<usize>())
    }

    /// Slow path: start a new block.
    fn allocate_fallback(&self, size: usize, align: usize) -> *mut u8 {
        if size > self.block_size / 4 {
            // Large allocation gets a dedicated block so the current block
            // keeps serving small nodes.
            return self.allocate_new_block(size, align);
        }

        let block = self.allocate_new_block(self.block_size, align);
        unsafe {
            *self.alloc_ptr.get() = block.add(size);
            *self.alloc_bytes_remaining.get() = self.block_size - size;
        }
        block
    }

    /// Allocate a fresh block of `size` bytes.
    fn allocate_new_block(&self, size: usize, align: usize) -> *mut u8 {
        let align = align.max(std::mem::align_of::<usize>());
        let layout = Layout::from_size_align(size, align).expect("invalid arena layout");

        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }

        let non_null = NonNull::new(ptr).expect("allocation returned null");
        unsafe {
            (*self.blocks.get()).push((non_null, layout));
        }

        self.memory_usage.fetch_add(size, Ordering::Relaxed);
        ptr
    }

    /// Get the total memory usage.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let blocks = unsafe { &mut *self.blocks.get() };
        for (block, layout) in blocks.drain(..) {
            unsafe {
                dealloc(block.as_ptr(), layout);
            }
        }
    }
}
