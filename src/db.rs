//! Database - the storage engine facade.
//!
//! Coordinates the write path (WAL -> memtable -> rotation -> flush), the
//! read path (memtable -> immutable memtable -> level 0 -> levels 1..N),
//! snapshots, and the background compactor.
//!
//! # Thread safety
//!
//! The database is `Send + Sync` and is shared behind an `Arc`. One write
//! mutex serializes all mutations; readers run concurrently from any
//! thread. Rotations swap the memtable pointers under exclusive locks
//! held only for the swap itself.

use std::fs::{File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::compaction::{Compactor, CompactorStats};
use crate::iterator::{DBIterator, MemSource, StorageIterator, TableSource};
use crate::memtable::{ImmutableMemTable, MemTable};
use crate::options::{Options, ReadOptions, WriteOptions, MAX_LEVELS};
use crate::sstable::{StoredValue, TableBuilder, TableReader};
use crate::types::{LookupResult, ValueType, WriteBatch};
use crate::util::filename::{
    create_dir_if_missing, delete_file, list_files_of_type, lock_file_path, manifest_file_path,
    manifest_temp_path, table_file_path, FileType,
};
use crate::version::{FileMetadata, VersionSet};
use crate::wal::{WalManager, WalReader};
use crate::{Error, Result};

/// The storage engine.
pub struct Database {
    /// Database directory path.
    db_path: PathBuf,
    /// Database options.
    options: Arc<Options>,
    /// Version set: which files live at which levels.
    versions: Arc<VersionSet>,
    /// Active memtable.
    memtable: RwLock<Arc<MemTable>>,
    /// Immutable memtable awaiting flush, if any.
    imm_memtable: RwLock<Option<ImmutableMemTable>>,
    /// Current WAL writer (absent when the WAL is disabled).
    wal: Mutex<Option<crate::wal::WalWriter>>,
    /// WAL segment management.
    wal_manager: WalManager,
    /// Last assigned sequence number.
    sequence: AtomicU64,
    /// Next memtable ID.
    next_memtable_id: AtomicU64,
    /// Lock file handle, held open to keep the flock.
    _lock_file: File,
    /// Set when `close` begins; rejects further writes.
    shutting_down: AtomicBool,
    /// Ensures `close` runs once.
    closed: AtomicBool,
    /// Serializes all mutations.
    write_mutex: Mutex<()>,
    /// Background compactor.
    compactor: Arc<Compactor>,

    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Database {
    /// Open a database with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with_options(path, Options::default())
    }

    /// Open a database with custom options.
    pub fn open_with_options(path: impl AsRef<Path>, options: Options) -> Result<Arc<Self>> {
        options.validate()?;
        let db_path = path.as_ref().to_path_buf();
        let options = Arc::new(options);

        if !db_path.exists() {
            if options.create_if_missing {
                create_dir_if_missing(&db_path)?;
            } else {
                return Err(Error::NotFound(format!(
                    "database directory does not exist: {}",
                    db_path.display()
                )));
            }
        } else if options.error_if_exists && manifest_file_path(&db_path).exists() {
            return Err(Error::AlreadyExists(format!(
                "database already exists: {}",
                db_path.display()
            )));
        }

        let lock_file = Self::acquire_lock(&db_path)?;

        let versions = Arc::new(VersionSet::new(&db_path, Arc::clone(&options)));
        versions.load_manifest()?;

        Self::remove_obsolete_files(&db_path, &versions)?;

        // Replay WAL segments in base-sequence order into a fresh
        // memtable, recovering the sequence counter along the way. Even a
        // record-free segment pins the counter via its embedded base, so
        // trimmed history can never roll the sequence backwards.
        let memtable = Arc::new(MemTable::new(1));
        let wal_manager = WalManager::new(&db_path);
        let mut max_sequence = 0u64;

        for (base_sequence, wal_path) in wal_manager.list_segments()? {
            max_sequence = max_sequence.max(base_sequence);

            let mut reader = WalReader::open(&wal_path)?;
            reader.for_each(|record| {
                memtable.add(
                    &record.key,
                    &record.value,
                    record.sequence,
                    record.value_type,
                );
                max_sequence = max_sequence.max(record.sequence);
                Ok(())
            })?;
        }

        if memtable.entry_count() > 0 {
            info!(
                entries = memtable.entry_count(),
                sequence = max_sequence,
                "recovered memtable from WAL"
            );
        }

        let wal = if options.enable_wal {
            Some(wal_manager.create_writer(max_sequence)?)
        } else {
            None
        };

        let compactor = Compactor::new(
            db_path.clone(),
            Arc::clone(&options),
            Arc::clone(&versions),
        );

        let db = Arc::new(Self {
            db_path: db_path.clone(),
            options,
            versions,
            memtable: RwLock::new(memtable),
            imm_memtable: RwLock::new(None),
            wal: Mutex::new(wal),
            wal_manager,
            sequence: AtomicU64::new(max_sequence),
            next_memtable_id: AtomicU64::new(2),
            _lock_file: lock_file,
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            write_mutex: Mutex::new(()),
            compactor,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        });

        db.compactor.start();

        info!(path = %db_path.display(), sequence = max_sequence, "database opened");
        Ok(db)
    }

    /// Acquire the database lock file.
    fn acquire_lock(db_path: &Path) -> Result<File> {
        let lock_path = lock_file_path(db_path);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(|e| {
                Error::LockError(format!(
                    "failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                return Err(Error::LockError(
                    "database is already locked by another process".to_string(),
                ));
            }
        }

        #[allow(unused_mut)]
        let mut lock_file = lock_file;
        writeln!(lock_file, "loamdb lock").ok();

        Ok(lock_file)
    }

    /// Delete `.sst` files not referenced by the manifest, plus any
    /// leftover manifest temp file. Run at open; orphans appear when a
    /// crash lands between writing a table and committing the manifest.
    fn remove_obsolete_files(db_path: &Path, versions: &VersionSet) -> Result<()> {
        delete_file(&manifest_temp_path(db_path))?;

        let live = versions.live_files();
        for number in list_files_of_type(db_path, FileType::Table)? {
            if !live.contains(&number) {
                warn!(file = number, "deleting orphaned table file");
                delete_file(&table_file_path(db_path, number))?;
            }
        }

        Ok(())
    }

    /// Put a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_with_options(key, value, &WriteOptions::default())
    }

    /// Put a key-value pair with explicit write options.
    pub fn put_with_options(&self, key: &[u8], value: &[u8], opts: &WriteOptions) -> Result<()> {
        self.write_internal(key, value, ValueType::Value, opts)
    }

    /// Delete a key (writes a tombstone).
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_with_options(key, &WriteOptions::default())
    }

    /// Delete a key with explicit write options.
    pub fn delete_with_options(&self, key: &[u8], opts: &WriteOptions) -> Result<()> {
        self.write_internal(key, b"", ValueType::Deletion, opts)
    }

    /// Apply a batch of operations under one lock acquisition.
    ///
    /// Each operation still receives its own sequence number; `sync` is
    /// honored once for the whole batch.
    pub fn write(&self, batch: &WriteBatch, opts: &WriteOptions) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        for entry in batch.entries() {
            self.validate_key(&entry.key)?;
            if let Some(ref value) = entry.value {
                self.validate_value(value)?;
            }
        }

        let _guard = self.write_mutex.lock();
        self.check_open()?;

        for entry in batch.entries() {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let (value, value_type): (&[u8], ValueType) = match entry.value {
                Some(ref value) => (value.as_ref(), ValueType::Value),
                None => (b"", ValueType::Deletion),
            };

            if !opts.disable_wal {
                self.append_wal(value_type, &entry.key, value, sequence)?;
            }
            self.memtable
                .read()
                .add(&entry.key, value, sequence, value_type);

            match value_type {
                ValueType::Value => self.writes.fetch_add(1, Ordering::Relaxed),
                ValueType::Deletion => self.deletes.fetch_add(1, Ordering::Relaxed),
            };
        }

        if !opts.disable_wal && (opts.sync || self.options.sync_writes) {
            self.sync_wal()?;
        }

        self.maybe_rotate()
    }

    fn write_internal(
        &self,
        key: &[u8],
        value: &[u8],
        value_type: ValueType,
        opts: &WriteOptions,
    ) -> Result<()> {
        self.validate_key(key)?;
        self.validate_value(value)?;

        let _guard = self.write_mutex.lock();
        self.check_open()?;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        if !opts.disable_wal {
            self.append_wal(value_type, key, value, sequence)?;
            if opts.sync || self.options.sync_writes {
                self.sync_wal()?;
            }
        }

        self.memtable.read().add(key, value, sequence, value_type);

        match value_type {
            ValueType::Value => self.writes.fetch_add(1, Ordering::Relaxed),
            ValueType::Deletion => self.deletes.fetch_add(1, Ordering::Relaxed),
        };

        self.maybe_rotate()
    }

    fn append_wal(
        &self,
        value_type: ValueType,
        key: &[u8],
        value: &[u8],
        sequence: u64,
    ) -> Result<()> {
        if !self.options.enable_wal {
            return Ok(());
        }

        let mut wal = self.wal.lock();
        if let Some(ref mut writer) = *wal {
            writer.append(value_type, key, value, sequence)?;
        }
        Ok(())
    }

    fn sync_wal(&self) -> Result<()> {
        let mut wal = self.wal.lock();
        if let Some(ref mut writer) = *wal {
            writer.sync()?;
        }
        Ok(())
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if key.len() > self.options.max_key_size {
            return Err(Error::KeyTooLarge {
                size: key.len(),
                max: self.options.max_key_size,
            });
        }
        Ok(())
    }

    fn validate_value(&self, value: &[u8]) -> Result<()> {
        if value.len() > self.options.max_value_size {
            return Err(Error::ValueTooLarge {
                size: value.len(),
                max: self.options.max_value_size,
            });
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(Error::Aborted("database is shutting down".into()));
        }
        Ok(())
    }

    /// Rotate when the active memtable has outgrown its budget. Called
    /// with the write mutex held.
    fn maybe_rotate(&self) -> Result<()> {
        if self
            .memtable
            .read()
            .should_flush(self.options.memtable_size)
        {
            self.rotate_memtable()?;
        }
        Ok(())
    }

    /// Swap the active memtable out and flush it. Called with the write
    /// mutex held.
    fn rotate_memtable(&self) -> Result<()> {
        // At most one immutable memtable exists; flush the previous one
        // before rotating again.
        self.flush_immutable()?;

        let new_memtable = Arc::new(MemTable::new(
            self.next_memtable_id.fetch_add(1, Ordering::Relaxed),
        ));

        {
            // Both pointers swap under exclusive locks so a reader sees
            // the record in the active table or the immutable one, never
            // in neither.
            let mut mem_guard = self.memtable.write();
            let mut imm_guard = self.imm_memtable.write();
            let old = Arc::clone(&*mem_guard);
            *mem_guard = new_memtable;
            *imm_guard = Some(ImmutableMemTable::from_arc(old));
        }

        debug!("rotated memtable");

        // Roll the WAL: the new segment's base is the current sequence,
        // so everything in older segments is covered by the flush below.
        if self.options.enable_wal {
            let new_writer = self
                .wal_manager
                .create_writer(self.sequence.load(Ordering::SeqCst))?;
            let old_writer = self.wal.lock().replace(new_writer);
            if let Some(writer) = old_writer {
                writer.close()?;
            }
        }

        self.flush_immutable()
    }

    /// Flush the immutable memtable to a level-0 table, commit it to the
    /// manifest, then drop the memtable and trim covered WAL segments.
    fn flush_immutable(&self) -> Result<()> {
        let imm = match self.imm_memtable.read().clone() {
            Some(imm) => imm,
            None => return Ok(()),
        };

        if imm.inner().is_empty() {
            *self.imm_memtable.write() = None;
            return Ok(());
        }

        let file_number = self.versions.new_file_number();
        let table_path = table_file_path(&self.db_path, file_number);

        let bloom_bits = self
            .options
            .enable_bloom_filter
            .then_some(self.options.bloom_bits_per_key);
        let mut builder = TableBuilder::new(
            &table_path,
            file_number,
            self.options.block_size,
            bloom_bits,
        )?;

        let mut iter = imm.iter();
        iter.seek_to_first();
        while iter.valid() {
            let key = iter.key();
            let stored = StoredValue::encode(key.value_type(), key.sequence(), iter.value());
            builder.add(key.user_key(), &stored)?;
            iter.next();
        }

        let entry_count = builder.entry_count();
        let info = builder.finish()?;

        let meta = FileMetadata::new(
            file_number,
            info.file_size,
            format!("{}.sst", file_number),
            info.smallest_key.unwrap_or_else(Bytes::new),
            info.largest_key.unwrap_or_else(Bytes::new),
            entry_count,
        );

        self.versions.add_file(0, meta);
        self.versions.write_manifest()?;

        // The table is durable and registered; the memtable and its WAL
        // coverage are no longer needed.
        *self.imm_memtable.write() = None;
        self.wal_manager.purge_obsolete(imm.max_sequence())?;

        info!(
            file = file_number,
            entries = entry_count,
            bytes = info.file_size,
            "flushed memtable to level 0"
        );

        self.compactor.maybe_schedule();
        Ok(())
    }

    /// Get a value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.get_with_options(key, &ReadOptions::default())
    }

    /// Get a value at an explicit snapshot.
    pub fn get_with_options(&self, key: &[u8], opts: &ReadOptions) -> Result<Option<Bytes>> {
        self.validate_key(key)?;
        self.reads.fetch_add(1, Ordering::Relaxed);

        let snapshot = if opts.snapshot != 0 {
            opts.snapshot
        } else {
            self.sequence.load(Ordering::SeqCst)
        };

        {
            let memtable = self.memtable.read();
            match memtable.get(key, snapshot) {
                LookupResult::Found(value) => return Ok(Some(value)),
                LookupResult::Deleted => return Ok(None),
                LookupResult::NotFound => {}
            }
        }

        {
            let imm = self.imm_memtable.read();
            if let Some(ref imm) = *imm {
                match imm.get(key, snapshot) {
                    LookupResult::Found(value) => return Ok(Some(value)),
                    LookupResult::Deleted => return Ok(None),
                    LookupResult::NotFound => {}
                }
            }
        }

        self.get_from_tables(key, snapshot)
    }

    /// Check whether a key is present.
    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn get_from_tables(&self, key: &[u8], snapshot: u64) -> Result<Option<Bytes>> {
        // Compaction may unlink a table between listing and opening it.
        // The re-listed state is consistent again, so retry a few times
        // before surfacing the error.
        let mut last_err = None;
        for _ in 0..5 {
            match self.try_get_from_tables(key, snapshot) {
                Err(Error::Io(e)) => last_err = Some(Error::Io(e)),
                other => return other,
            }
        }
        Err(last_err.unwrap_or_else(|| Error::internal("table lookup retry exhausted")))
    }

    fn try_get_from_tables(&self, key: &[u8], snapshot: u64) -> Result<Option<Bytes>> {
        // Level 0 files overlap; scan newest-first. Their sequence ranges
        // are disjoint and increase with the file number, so the first
        // authoritative answer is the right one.
        for file in self.versions.files_at_level(0) {
            if !file.may_contain_key(key) {
                continue;
            }

            let path = table_file_path(&self.db_path, file.file_number());
            let mut reader = TableReader::open(&path, file.file_number())?;
            match reader.get(key, snapshot)? {
                LookupResult::Found(value) => return Ok(Some(value)),
                LookupResult::Deleted => return Ok(None),
                LookupResult::NotFound => {}
            }
        }

        // Levels 1+ are disjoint and sorted: binary search finds the one
        // candidate file per level.
        for level in 1..MAX_LEVELS {
            let files = self.versions.files_at_level(level);
            if files.is_empty() {
                continue;
            }

            let pp = files.partition_point(|f| f.smallest_key().as_ref() <= key);
            let candidate = match pp.checked_sub(1) {
                Some(idx) => &files[idx],
                None => continue,
            };
            if !candidate.may_contain_key(key) {
                continue;
            }

            let path = table_file_path(&self.db_path, candidate.file_number());
            let mut reader = TableReader::open(&path, candidate.file_number())?;
            match reader.get(key, snapshot)? {
                LookupResult::Found(value) => return Ok(Some(value)),
                LookupResult::Deleted => return Ok(None),
                LookupResult::NotFound => {}
            }
        }

        Ok(None)
    }

    /// Create an iterator over the database at the latest snapshot.
    pub fn new_iterator(&self) -> Result<DBIterator> {
        self.new_iterator_with_options(&ReadOptions::default())
    }

    /// Create an iterator at an explicit snapshot.
    ///
    /// Yields user key/value pairs in ascending key order, deduplicated
    /// to the newest visible version, with tombstoned keys omitted.
    pub fn new_iterator_with_options(&self, opts: &ReadOptions) -> Result<DBIterator> {
        let snapshot = if opts.snapshot != 0 {
            opts.snapshot
        } else {
            self.sequence.load(Ordering::SeqCst)
        };

        // Same vanished-file retry as point reads: compaction can unlink
        // a listed table before we open it.
        let mut last_err = None;
        for _ in 0..5 {
            match self.build_iterator_sources() {
                Ok(sources) => return DBIterator::new(sources, snapshot),
                Err(Error::Io(e)) => last_err = Some(Error::Io(e)),
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::internal("iterator retry exhausted")))
    }

    fn build_iterator_sources(&self) -> Result<Vec<Box<dyn StorageIterator>>> {
        let mut sources: Vec<Box<dyn StorageIterator>> = Vec::new();

        {
            let memtable = self.memtable.read();
            sources.push(Box::new(MemSource::new(&memtable)));
        }
        {
            let imm = self.imm_memtable.read();
            if let Some(ref imm) = *imm {
                sources.push(Box::new(MemSource::new(imm.inner())));
            }
        }
        for level in 0..MAX_LEVELS {
            for file in self.versions.files_at_level(level) {
                let path = table_file_path(&self.db_path, file.file_number());
                let reader = TableReader::open(&path, file.file_number())?;
                sources.push(Box::new(TableSource::new(reader)));
            }
        }

        Ok(sources)
    }

    /// Flush the active memtable to a level-0 table.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.write_mutex.lock();

        if self.memtable.read().is_empty() && self.imm_memtable.read().is_none() {
            return Ok(());
        }

        self.rotate_memtable()
    }

    /// Compact one level synchronously. `level = -1` means "any".
    pub fn compact_level(&self, level: i32) -> Result<bool> {
        self.compactor.compact_level(level)
    }

    /// Take a snapshot of the current state.
    ///
    /// Snapshots are sequence numbers; reads at the snapshot see exactly
    /// the mutations at or below it.
    pub fn get_snapshot(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Release a snapshot. Nothing is retained per snapshot, so this is
    /// a no-op kept for API symmetry.
    pub fn release_snapshot(&self, _snapshot: u64) {}

    /// Current database statistics.
    pub fn stats(&self) -> DatabaseStats {
        let mut level_stats = Vec::new();
        for level in 0..MAX_LEVELS {
            let num_files = self.versions.num_files_at_level(level);
            if num_files > 0 || level == 0 {
                level_stats.push(LevelStats {
                    level,
                    num_files,
                    size_bytes: self.versions.level_size(level),
                });
            }
        }

        DatabaseStats {
            memtable_size: self.memtable.read().approximate_memory_usage(),
            has_immutable_memtable: self.imm_memtable.read().is_some(),
            sequence: self.sequence.load(Ordering::SeqCst),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            level_stats,
            compaction: self.compactor.stats(),
        }
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Last assigned sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Close the database: stop the compactor, flush buffered writes,
    /// and close the WAL. Idempotent; also invoked on drop.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutting_down.store(true, Ordering::SeqCst);
        self.compactor.stop();

        let _guard = self.write_mutex.lock();

        self.flush_immutable()?;
        if !self.memtable.read().is_empty() {
            self.rotate_memtable()?;
        }

        if let Some(writer) = self.wal.lock().take() {
            writer.close()?;
        }

        info!(path = %self.db_path.display(), "database closed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing database");
        }
    }
}

/// Point-in-time statistics snapshot.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Active memtable size in bytes.
    pub memtable_size: usize,
    /// Whether an immutable memtable is awaiting flush.
    pub has_immutable_memtable: bool,
    /// Last assigned sequence number.
    pub sequence: u64,
    /// Point reads served.
    pub reads: u64,
    /// Puts applied.
    pub writes: u64,
    /// Deletes applied.
    pub deletes: u64,
    /// Per-level file statistics.
    pub level_stats: Vec<LevelStats>,
    /// Cumulative compactor statistics.
    pub compaction: CompactorStats,
}

/// Statistics for a single level.
#[derive(Debug, Clone)]
pub struct LevelStats {
    /// Level number.
    pub level: usize,
    /// Number of files at this level.
    pub num_files: usize,
    /// Total size in bytes.
    pub size_bytes: u64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database statistics:")?;
        writeln!(f, "  Memtable: {} bytes", self.memtable_size)?;
        writeln!(f, "  Sequence: {}", self.sequence)?;
        writeln!(
            f,
            "  Ops: {} reads, {} writes, {} deletes",
            self.reads, self.writes, self.deletes
        )?;
        writeln!(f, "  Levels:")?;
        for level in &self.level_stats {
            writeln!(
                f,
                "    L{}: {} files, {:.2} MB",
                level.level,
                level.num_files,
                level.size_bytes as f64 / (1024.0 * 1024.0)
            )?;
        }
        writeln!(
            f,
            "  Compaction: {} runs, {} files, {:.2} MB written",
            self.compaction.compactions_completed,
            self.compaction.files_compacted,
            self.compaction.bytes_written as f64 / (1024.0 * 1024.0)
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_memtable_options() -> Options {
        let mut opts = Options::default();
        opts.memtable_size = 4 * 1024;
        opts
    }

    #[test]
    fn test_open_new_database() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.path(), dir.path());
        assert_eq!(db.sequence(), 0);
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"hello", b"world").unwrap();
        assert_eq!(db.get(b"hello").unwrap(), Some(Bytes::from("world")));
        assert_eq!(db.get(b"missing").unwrap(), None);
        assert!(db.exists(b"hello").unwrap());

        db.delete(b"hello").unwrap();
        assert_eq!(db.get(b"hello").unwrap(), None);
        assert!(!db.exists(b"hello").unwrap());
    }

    #[test]
    fn test_empty_key_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        assert!(matches!(db.put(b"", b"v"), Err(Error::EmptyKey)));
        assert!(matches!(db.get(b""), Err(Error::EmptyKey)));
    }

    #[test]
    fn test_oversized_key_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let big_key = vec![b'k'; crate::options::MAX_KEY_SIZE + 1];
        assert!(matches!(
            db.put(&big_key, b"v"),
            Err(Error::KeyTooLarge { .. })
        ));
    }

    #[test]
    fn test_write_batch_assigns_sequence_per_op() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let mut batch = WriteBatch::new();
        batch.put(&b"k1"[..], &b"v1"[..]);
        batch.put(&b"k2"[..], &b"v2"[..]);
        batch.delete(&b"k1"[..]);
        db.write(&batch, &WriteOptions::default()).unwrap();

        assert_eq!(db.sequence(), 3);
        assert_eq!(db.get(b"k1").unwrap(), None);
        assert_eq!(db.get(b"k2").unwrap(), Some(Bytes::from("v2")));
    }

    #[test]
    fn test_flush_creates_level0_file() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        for i in 0..10 {
            db.put(format!("key{}", i).as_bytes(), b"value").unwrap();
        }
        db.flush().unwrap();

        let stats = db.stats();
        assert!(stats
            .level_stats
            .iter()
            .any(|l| l.level == 0 && l.num_files > 0));

        // Reads hit the table now.
        for i in 0..10 {
            assert!(db.get(format!("key{}", i).as_bytes()).unwrap().is_some());
        }
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.flush().unwrap();
        assert_eq!(db.stats().level_stats[0].num_files, 0);
    }

    #[test]
    fn test_automatic_rotation() {
        let dir = tempdir().unwrap();
        let db = Database::open_with_options(dir.path(), small_memtable_options()).unwrap();

        // Overflow the tiny memtable several times.
        for i in 0..200 {
            let key = format!("key{:05}", i);
            db.put(key.as_bytes(), &[b'v'; 100]).unwrap();
        }

        let stats = db.stats();
        let table_files: usize = stats.level_stats.iter().map(|l| l.num_files).sum();
        assert!(table_files > 0, "rotation should have flushed tables");

        for i in 0..200 {
            let key = format!("key{:05}", i);
            assert!(db.get(key.as_bytes()).unwrap().is_some(), "lost {}", key);
        }
    }

    #[test]
    fn test_snapshot_isolation() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"k", b"v1").unwrap();
        let snap = db.get_snapshot();
        db.put(b"k", b"v2").unwrap();

        assert_eq!(
            db.get_with_options(b"k", &ReadOptions::at_snapshot(snap))
                .unwrap(),
            Some(Bytes::from("v1"))
        );
        assert_eq!(db.get(b"k").unwrap(), Some(Bytes::from("v2")));

        db.release_snapshot(snap);
    }

    #[test]
    fn test_snapshot_survives_flush() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"k", b"v1").unwrap();
        let snap = db.get_snapshot();
        db.flush().unwrap();
        db.put(b"k", b"v2").unwrap();
        db.flush().unwrap();

        assert_eq!(
            db.get_with_options(b"k", &ReadOptions::at_snapshot(snap))
                .unwrap(),
            Some(Bytes::from("v1"))
        );
        assert_eq!(db.get(b"k").unwrap(), Some(Bytes::from("v2")));
    }

    #[test]
    fn test_iterator_end_to_end() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"b", b"2").unwrap();
        db.put(b"a", b"1").unwrap();
        db.flush().unwrap();
        db.put(b"c", b"3").unwrap();
        db.delete(b"b").unwrap();

        let entries: Vec<_> = db.new_iterator().unwrap().collect();
        assert_eq!(
            entries,
            vec![
                (Bytes::from("a"), Bytes::from("1")),
                (Bytes::from("c"), Bytes::from("3")),
            ]
        );
    }

    #[test]
    fn test_reopen_after_close() {
        let dir = tempdir().unwrap();

        {
            let db = Database::open(dir.path()).unwrap();
            db.put(b"persisted", b"yes").unwrap();
            db.close().unwrap();
        }

        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.get(b"persisted").unwrap(), Some(Bytes::from("yes")));
        assert!(db.sequence() >= 1);
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.close().unwrap();

        assert!(matches!(db.put(b"k", b"v"), Err(Error::Aborted(_))));
    }

    #[test]
    fn test_error_if_exists() {
        let dir = tempdir().unwrap();

        {
            let db = Database::open(dir.path()).unwrap();
            db.put(b"k", b"v").unwrap();
            db.flush().unwrap();
        }

        let mut opts = Options::default();
        opts.error_if_exists = true;
        assert!(matches!(
            Database::open_with_options(dir.path(), opts),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_if_missing_false() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        let mut opts = Options::default();
        opts.create_if_missing = false;
        assert!(matches!(
            Database::open_with_options(&missing, opts),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_orphan_table_cleanup() {
        let dir = tempdir().unwrap();

        {
            let db = Database::open(dir.path()).unwrap();
            db.put(b"k", b"v").unwrap();
            db.flush().unwrap();
        }

        // Drop an orphan .sst into the directory; it is not in the
        // manifest and must be removed at open.
        let orphan = table_file_path(dir.path(), 9999);
        std::fs::write(&orphan, b"garbage").unwrap();

        let db = Database::open(dir.path()).unwrap();
        assert!(!orphan.exists());
        assert_eq!(db.get(b"k").unwrap(), Some(Bytes::from("v")));
    }

    #[test]
    fn test_stats() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"a", b"1").unwrap();
        db.put(b"b", b"2").unwrap();
        db.delete(b"a").unwrap();
        db.get(b"b").unwrap();

        let stats = db.stats();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.deletes, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.sequence, 3);
        assert!(stats.memtable_size > 0);
        assert!(!format!("{}", stats).is_empty());
    }
}
