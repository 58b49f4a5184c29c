//! Configuration options for loamdb.

/// Maximum number of levels in the LSM tree.
pub const MAX_LEVELS: usize = 7;

/// Default block size (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024;

/// Default memtable size before rotation (64MB).
pub const DEFAULT_MEMTABLE_SIZE: usize = 64 * 1024 * 1024;

/// Default bloom filter bits per key (~1% false positive rate).
pub const DEFAULT_BLOOM_BITS_PER_KEY: usize = 10;

/// Number of level-0 files that triggers a compaction.
pub const L0_COMPACTION_TRIGGER: usize = 4;

/// Byte budget for level 1. Each level above is `LEVEL_SIZE_MULTIPLIER`
/// times larger.
pub const LEVEL_BASE_SIZE: u64 = 10 * 1024 * 1024;

/// Size multiplier between adjacent levels.
pub const LEVEL_SIZE_MULTIPLIER: u64 = 10;

/// Maximum key size (8KB).
pub const MAX_KEY_SIZE: usize = 8 * 1024;

/// Maximum value size (1GB).
pub const MAX_VALUE_SIZE: usize = 1024 * 1024 * 1024;

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Return an error if the database already exists.
    pub error_if_exists: bool,

    /// Maximum memtable size before it is rotated and flushed.
    pub memtable_size: usize,

    /// Write mutations to the write-ahead log.
    pub enable_wal: bool,

    /// Request kernel-level durability on every write by default.
    /// Individual writes can override this via [`WriteOptions`].
    ///
    /// [`WriteOptions`]: crate::WriteOptions
    pub sync_writes: bool,

    /// Number of background compaction threads. One is sufficient; the
    /// compactor currently runs a single worker regardless.
    pub compaction_threads: usize,

    /// Build bloom filters for SSTables.
    pub enable_bloom_filter: bool,

    /// Bloom filter bits per key.
    pub bloom_bits_per_key: usize,

    /// Target size for SSTable data blocks.
    pub block_size: usize,

    /// Maximum key size.
    pub max_key_size: usize,

    /// Maximum value size.
    pub max_value_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            memtable_size: DEFAULT_MEMTABLE_SIZE,
            enable_wal: true,
            sync_writes: false,
            compaction_threads: 1,
            enable_bloom_filter: true,
            bloom_bits_per_key: DEFAULT_BLOOM_BITS_PER_KEY,
            block_size: DEFAULT_BLOCK_SIZE,
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.memtable_size < 1024 {
            return Err(crate::Error::InvalidConfiguration(
                "memtable_size must be at least 1KB".into(),
            ));
        }

        if self.block_size < 256 {
            return Err(crate::Error::InvalidConfiguration(
                "block_size must be at least 256 bytes".into(),
            ));
        }

        if self.compaction_threads == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "compaction_threads must be at least 1".into(),
            ));
        }

        if self.max_key_size > MAX_KEY_SIZE {
            return Err(crate::Error::InvalidConfiguration(format!(
                "max_key_size cannot exceed {}",
                MAX_KEY_SIZE
            )));
        }

        Ok(())
    }

    /// Byte budget for a given level. Level 0 is triggered by file count,
    /// not size.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        if level == 0 {
            return (self.memtable_size as u64) * (L0_COMPACTION_TRIGGER as u64);
        }
        let mut size = LEVEL_BASE_SIZE;
        for _ in 1..level {
            size *= LEVEL_SIZE_MULTIPLIER;
        }
        size
    }
}

/// Per-write options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Request kernel-level durability before the call returns.
    pub sync: bool,

    /// Skip the write-ahead log for this write. The write is only as
    /// durable as the next flush.
    pub disable_wal: bool,
}

impl WriteOptions {
    /// Options requesting a synchronous write.
    pub fn sync() -> Self {
        Self {
            sync: true,
            disable_wal: false,
        }
    }
}

/// Per-read options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Snapshot sequence to read at. Zero means "latest".
    pub snapshot: u64,
}

impl ReadOptions {
    /// Read at a specific snapshot.
    pub fn at_snapshot(snapshot: u64) -> Self {
        Self { snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.error_if_exists);
        assert_eq!(opts.memtable_size, DEFAULT_MEMTABLE_SIZE);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        opts.memtable_size = 100;
        assert!(opts.validate().is_err());

        let mut opts = Options::default();
        opts.block_size = 16;
        assert!(opts.validate().is_err());

        let mut opts = Options::default();
        opts.compaction_threads = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_level_size_calculation() {
        let opts = Options::default();

        assert_eq!(opts.max_bytes_for_level(1), 10 * 1024 * 1024);
        assert_eq!(opts.max_bytes_for_level(2), 100 * 1024 * 1024);
        assert_eq!(opts.max_bytes_for_level(3), 1000 * 1024 * 1024);
    }

    #[test]
    fn test_write_options() {
        let opts = WriteOptions::sync();
        assert!(opts.sync);
        assert!(!opts.disable_wal);
    }
}
