//! Page-granular storage: paged file, slotted pages, and the buffer pool.
//!
//! This stack is independent of the LSM engine; secondary structures such
//! as B+ tree indexes build on it. The hierarchy is:
//!
//! ```text
//! Caller (index / table heap)
//!         |
//!         v
//!    BufferPool        frame cache, pin/unpin, LRU-K eviction
//!         |
//!         v
//!    DiskManager       fixed-size page I/O over one file
//! ```

mod buffer_pool;
mod disk_manager;
mod lru_k;
mod page;

pub use buffer_pool::{BufferPool, PageGuard};
pub use disk_manager::DiskManager;
pub use lru_k::LruKReplacer;
pub use page::{Page, INVALID_PAGE_ID, PAGE_SIZE};

/// Page identifier. Offsets in the backing file are `page_id * PAGE_SIZE`.
pub type PageId = u32;

/// Frame index within the buffer pool.
pub type FrameId = usize;
