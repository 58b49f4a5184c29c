//! Page-based disk I/O.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::{Error, Result};

use super::{PageId, PAGE_SIZE};

/// Reads and writes fixed-size pages of a single backing file.
///
/// Page IDs are allocated by atomic increment; the file is extended
/// lazily on the first write to a page's offset. All I/O is serialized by
/// an internal lock.
#[derive(Debug)]
pub struct DiskManager {
    /// Backing file, guarded together with the free list.
    inner: Mutex<DiskInner>,
    /// Next page ID to allocate.
    next_page_id: AtomicU32,
    /// Path of the backing file.
    path: PathBuf,
}

#[derive(Debug)]
struct DiskInner {
    file: File,
    /// Deallocated page IDs awaiting reuse. Never compacted.
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Open (or create) the backing file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            inner: Mutex::new(DiskInner {
                file,
                free_pages: Vec::new(),
            }),
            next_page_id: AtomicU32::new(next_page_id),
            path: path.to_path_buf(),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a page into `buf`. Pages past EOF read as zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::invalid_argument("page buffer must be PAGE_SIZE"));
        }

        let mut inner = self.inner.lock();
        let offset = page_id as u64 * PAGE_SIZE as u64;

        let file_size = inner.file.metadata()?.len();
        if offset >= file_size {
            buf.fill(0);
            return Ok(());
        }

        inner.file.seek(SeekFrom::Start(offset))?;

        // A short read at the tail zero-fills the remainder.
        let mut read = 0;
        while read < buf.len() {
            let n = inner.file.read(&mut buf[read..])?;
            if n == 0 {
                buf[read..].fill(0);
                break;
            }
            read += n;
        }

        Ok(())
    }

    /// Write a page from `buf`, extending the file if necessary.
    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::invalid_argument("page buffer must be PAGE_SIZE"));
        }

        let mut inner = self.inner.lock();
        let offset = page_id as u64 * PAGE_SIZE as u64;

        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(buf)?;

        Ok(())
    }

    /// Allocate a page ID, reusing a deallocated one when available.
    pub fn allocate_page(&self) -> PageId {
        if let Some(page_id) = self.inner.lock().free_pages.pop() {
            return page_id;
        }
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a page ID as free for future reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.inner.lock().free_pages.push(page_id);
    }

    /// Number of pages ever allocated.
    pub fn num_pages(&self) -> u32 {
        self.next_page_id.load(Ordering::SeqCst)
    }

    /// Force pending writes to stable storage.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_disk_manager_allocate() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("data.db")).unwrap();

        assert_eq!(dm.allocate_page(), 0);
        assert_eq!(dm.allocate_page(), 1);
        assert_eq!(dm.allocate_page(), 2);
        assert_eq!(dm.num_pages(), 3);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("data.db")).unwrap();

        let page_id = dm.allocate_page();
        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0] = 0xAB;
        write_buf[PAGE_SIZE - 1] = 0xCD;
        dm.write_page(page_id, &write_buf).unwrap();

        let mut read_buf = vec![0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_buf).unwrap();
        assert_eq!(read_buf, write_buf);
    }

    #[test]
    fn test_disk_manager_read_past_eof() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("data.db")).unwrap();

        let mut buf = vec![0xFFu8; PAGE_SIZE];
        dm.read_page(99, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_lazy_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        let dm = DiskManager::open(&path).unwrap();

        // Allocating does not grow the file; writing does.
        for _ in 0..10 {
            dm.allocate_page();
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        let buf = vec![1u8; PAGE_SIZE];
        dm.write_page(7, &buf).unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            8 * PAGE_SIZE as u64
        );
    }

    #[test]
    fn test_disk_manager_deallocate_reuse() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("data.db")).unwrap();

        let a = dm.allocate_page();
        let _b = dm.allocate_page();
        dm.deallocate_page(a);

        assert_eq!(dm.allocate_page(), a);
        assert_eq!(dm.allocate_page(), 2);
    }

    #[test]
    fn test_disk_manager_reopen_preserves_next_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");

        {
            let dm = DiskManager::open(&path).unwrap();
            dm.allocate_page();
            dm.allocate_page();
            let buf = vec![9u8; PAGE_SIZE];
            dm.write_page(1, &buf).unwrap();
            dm.flush().unwrap();
        }

        let dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.allocate_page(), 2);
    }

    #[test]
    fn test_disk_manager_bad_buffer_size() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::open(&dir.path().join("data.db")).unwrap();

        let mut small = vec![0u8; 16];
        assert!(dm.read_page(0, &mut small).is_err());
        assert!(dm.write_page(0, &small).is_err());
    }
}
