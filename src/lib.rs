//! # loamdb
//!
//! An embeddable key-value storage engine: a log-structured merge-tree
//! with a slotted-page buffer manager beneath.
//!
//! ## Features
//!
//! - **LSM write path**: memtable over a lock-free skiplist, write-ahead
//!   logging, sorted immutable table files, leveled background compaction
//! - **Snapshot reads**: every mutation gets a sequence number; reads are
//!   parameterized by a snapshot and see a consistent point in time
//! - **Self-describing tables**: sorted data blocks, sparse index, bloom
//!   filter, fixed footer
//! - **Buffer pool**: page-granular caching with LRU-K replacement for
//!   secondary structures such as B+ tree indexes
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use loamdb::{Database, Options};
//!
//! let db = Database::open("./data")?;
//!
//! db.put(b"hello", b"world")?;
//! let value = db.get(b"hello")?;
//! db.delete(b"hello")?;
//!
//! // Snapshot reads
//! let snap = db.get_snapshot();
//! db.put(b"hello", b"later")?;
//! let old = db.get_with_options(b"hello", &loamdb::ReadOptions::at_snapshot(snap))?;
//! ```

// Public modules
pub mod error;
pub mod options;
pub mod storage;
pub mod types;

// Database facade
mod db;

// Internal modules
mod compaction;
mod iterator;
mod memtable;
mod sstable;
mod util;
mod version;
mod wal;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, ReadOptions, WriteOptions};
pub use types::{InternalKey, LookupResult, ValueType, WriteBatch};

// Database
pub use db::{Database, DatabaseStats, LevelStats};

// Compaction statistics
pub use compaction::CompactorStats;

// Iterators
pub use iterator::DBIterator;

// Page storage stack for collaborators
pub use storage::{BufferPool, DiskManager, LruKReplacer, Page, PageGuard};
