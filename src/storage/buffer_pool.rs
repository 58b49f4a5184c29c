//! Buffer pool: a fixed set of frames caching pages from a paged file.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Error, Result};

use super::{DiskManager, FrameId, LruKReplacer, Page, PageId};

/// Caches pages in memory frames with LRU-K replacement.
///
/// One latch guards the page table, free list and replacer; page contents
/// sit behind per-frame locks. Every successful `fetch_page`/`new_page`
/// returns a [`PageGuard`] whose drop performs the matching unpin, so
/// frames cannot leak on early returns.
#[derive(Debug)]
pub struct BufferPool {
    /// The page frames.
    frames: Vec<Arc<RwLock<Page>>>,
    /// Page table, free list and replacer under the pool latch.
    state: Mutex<PoolState>,
    /// Backing paged file.
    disk: DiskManager,
}

#[derive(Debug)]
struct PoolState {
    /// Maps page_id -> frame holding it.
    page_table: HashMap<PageId, FrameId>,
    /// Frames not holding any page.
    free_list: Vec<FrameId>,
    /// Victim selector over occupied frames.
    replacer: LruKReplacer,
}

impl BufferPool {
    /// Create a pool of `pool_size` frames over `disk`, with LRU-K
    /// history depth `replacer_k`.
    pub fn new(pool_size: usize, replacer_k: usize, disk: DiskManager) -> Self {
        let frames = (0..pool_size)
            .map(|_| Arc::new(RwLock::new(Page::new())))
            .collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list: (0..pool_size).rev().collect(),
                replacer: LruKReplacer::new(replacer_k),
            }),
            disk,
        }
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Whether a page is currently resident in some frame.
    pub fn contains_page(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains_key(&page_id)
    }

    /// The underlying paged file.
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Fetch a page, pinning it.
    ///
    /// Fails with [`Error::Busy`] when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = Arc::clone(&self.frames[frame_id]);
            frame.write().pin();
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(PageGuard::new(self, page_id, frame));
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let frame = Arc::clone(&self.frames[frame_id]);
        {
            let mut page = frame.write();
            page.reset();
            if let Err(e) = self.disk.read_page(page_id, page.data_mut()) {
                state.free_list.push(frame_id);
                return Err(e);
            }
            page.set_page_id(page_id);
            page.pin();
            page.set_dirty(false);
        }

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok(PageGuard::new(self, page_id, frame))
    }

    /// Allocate a brand-new page and pin it. The page starts empty and
    /// dirty; no read is performed.
    pub fn new_page(&self) -> Result<(PageId, PageGuard<'_>)> {
        let mut state = self.state.lock();

        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = self.disk.allocate_page();

        let frame = Arc::clone(&self.frames[frame_id]);
        {
            let mut page = frame.write();
            page.reset();
            page.set_page_id(page_id);
            page.pin();
            page.set_dirty(true);
        }

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        Ok((page_id, PageGuard::new(self, page_id, frame)))
    }

    /// Decrement a page's pin count, OR-ing in the dirty bit. When the
    /// count reaches zero the frame becomes evictable.
    ///
    /// Returns `false` if the page is not resident or was not pinned.
    pub fn unpin(&self, page_id: PageId, dirty: bool) -> bool {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };

        let mut page = self.frames[frame_id].write();
        if page.pin_count() == 0 {
            return false;
        }

        page.unpin();
        if dirty {
            page.set_dirty(true);
        }
        if page.pin_count() == 0 {
            state.replacer.set_evictable(frame_id, true);
        }

        true
    }

    /// Write a resident page back to disk, clearing its dirty bit.
    ///
    /// Returns `false` if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };

        let mut page = self.frames[frame_id].write();
        page.update_checksum();
        self.disk.write_page(page_id, page.data())?;
        page.set_dirty(false);

        Ok(true)
    }

    /// Write every dirty resident page back to disk.
    pub fn flush_all(&self) -> Result<()> {
        let state = self.state.lock();

        for (&page_id, &frame_id) in state.page_table.iter() {
            let mut page = self.frames[frame_id].write();
            if page.is_dirty() {
                page.update_checksum();
                self.disk.write_page(page_id, page.data())?;
                page.set_dirty(false);
            }
        }

        Ok(())
    }

    /// Drop a page from the pool and deallocate its ID.
    ///
    /// Returns `false` if the page is resident and pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                // Not resident; just release the ID.
                self.disk.deallocate_page(page_id);
                return Ok(true);
            }
        };

        let mut page = self.frames[frame_id].write();
        if page.pin_count() > 0 {
            return Ok(false);
        }

        page.reset();
        drop(page);

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.free_list.push(frame_id);
        self.disk.deallocate_page(page_id);

        Ok(true)
    }

    /// Find a frame for a new occupant: the free list first, then the
    /// replacer. A dirty victim is written back before reuse.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }

        let frame_id = state
            .replacer
            .evict()
            .ok_or_else(|| Error::busy("all buffer pool frames are pinned"))?;

        let mut page = self.frames[frame_id].write();
        if page.is_dirty() {
            page.update_checksum();
            if let Err(e) = self.disk.write_page(page.page_id(), page.data()) {
                // Write-back failed: leave the victim resident and
                // evictable again.
                state.replacer.record_access(frame_id);
                state.replacer.set_evictable(frame_id, true);
                return Err(e);
            }
            page.set_dirty(false);
        }

        state.page_table.remove(&page.page_id());
        Ok(frame_id)
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        // Destruction writes back all dirty frames.
        let _ = self.flush_all();
    }
}

/// RAII pin on a fetched page.
///
/// Dropping the guard unpins the page, carrying the dirty bit accumulated
/// through [`write`](PageGuard::write) / [`mark_dirty`](PageGuard::mark_dirty).
#[derive(Debug)]
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: Arc<RwLock<Page>>,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferPool, page_id: PageId, frame: Arc<RwLock<Page>>) -> Self {
        Self {
            pool,
            page_id,
            frame,
            dirty: Cell::new(false),
        }
    }

    /// The pinned page's ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Shared access to the page contents.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.read()
    }

    /// Exclusive access to the page contents; marks the guard dirty.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.dirty.set(true);
        self.frame.write()
    }

    /// Mark the page dirty without taking the write lock.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.page_id, self.dirty.get());
    }
}
