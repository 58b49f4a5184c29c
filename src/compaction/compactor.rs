//! Background compaction worker.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{error, info};

use crate::options::{Options, MAX_LEVELS};
use crate::sstable::{merge_tables, TableBuilder, TableReader};
use crate::util::filename::{delete_file, table_file_path};
use crate::version::{FileMetadata, VersionSet};
use crate::{Error, Result};

use super::{CompactionJob, CompactorStats};

/// How often the worker re-checks triggers without being poked.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct WorkerState {
    /// A compaction has been requested.
    pending: bool,
    /// The worker is currently compacting.
    in_progress: bool,
}

/// Single background worker that merges levels when triggers fire.
///
/// Borrows the version set (via `Arc`); the database owns both. The
/// worker wakes on explicit scheduling or once per tick, scans the levels
/// bottom-up, and runs at most one compaction per wakeup.
pub struct Compactor {
    /// Database directory.
    db_path: PathBuf,
    /// Database options.
    options: Arc<Options>,
    /// Version set to read triggers from and install results into.
    versions: Arc<VersionSet>,
    /// Worker coordination.
    state: Mutex<WorkerState>,
    /// Signals schedule requests and completion.
    work_cv: Condvar,
    /// Set once by `stop`.
    shutdown: AtomicBool,
    /// Worker thread handle.
    handle: Mutex<Option<JoinHandle<()>>>,
    /// Last background error, if any.
    last_error: RwLock<Option<Error>>,

    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    files_compacted: AtomicU64,
    compactions_completed: AtomicU64,
}

impl Compactor {
    /// Create a compactor over the given version set.
    pub fn new(db_path: PathBuf, options: Arc<Options>, versions: Arc<VersionSet>) -> Arc<Self> {
        Arc::new(Self {
            db_path,
            options,
            versions,
            state: Mutex::new(WorkerState::default()),
            work_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
            last_error: RwLock::new(None),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            files_compacted: AtomicU64::new(0),
            compactions_completed: AtomicU64::new(0),
        })
    }

    /// Start the background worker thread.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }

        let worker = Arc::clone(self);
        *handle = Some(
            std::thread::Builder::new()
                .name("loamdb-compaction".to_string())
                .spawn(move || worker.background_loop())
                .expect("failed to spawn compaction thread"),
        );
    }

    /// Stop the worker and join it. Honored within one loop period.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.work_cv.notify_all();

        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    /// Wake the worker to re-check triggers.
    pub fn maybe_schedule(&self) {
        let mut state = self.state.lock();
        state.pending = true;
        self.work_cv.notify_one();
    }

    /// Block until no compaction is requested or running.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while state.pending || state.in_progress {
            self.work_cv.wait(&mut state);
        }
    }

    /// Last error seen by the background worker.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error.read().clone()
    }

    /// Cumulative statistics.
    pub fn stats(&self) -> CompactorStats {
        CompactorStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            files_compacted: self.files_compacted.load(Ordering::Relaxed),
            compactions_completed: self.compactions_completed.load(Ordering::Relaxed),
        }
    }

    /// Synchronously compact one level.
    ///
    /// `level < 0` means "any": the first triggered level, falling back
    /// to the lowest non-empty level (manual compactions run even without
    /// a trigger). Returns `false` when there was nothing to do.
    pub fn compact_level(&self, level: i32) -> Result<bool> {
        // Take the in-progress slot so a manual compaction never races
        // the background worker over the same input files.
        {
            let mut state = self.state.lock();
            while state.in_progress {
                self.work_cv.wait(&mut state);
            }
            state.in_progress = true;
        }

        let result = self.compact_level_locked(level);

        {
            let mut state = self.state.lock();
            state.in_progress = false;
            self.work_cv.notify_all();
        }

        result
    }

    fn compact_level_locked(&self, level: i32) -> Result<bool> {
        let level = if level >= 0 {
            level as usize
        } else {
            match self.versions.pick_compaction_level() {
                Some(level) => level,
                None => match (0..MAX_LEVELS - 1)
                    .find(|&l| self.versions.num_files_at_level(l) > 0)
                {
                    Some(level) => level,
                    None => return Ok(false),
                },
            }
        };

        if level >= MAX_LEVELS - 1 {
            return Err(Error::invalid_argument(format!(
                "cannot compact level {}",
                level
            )));
        }

        match self.pick_job(level) {
            Some(job) => self.do_compaction(job).map(|_| true),
            None => Ok(false),
        }
    }

    fn background_loop(&self) {
        info!("compaction worker started");

        loop {
            {
                // Also hold off while a manual compaction occupies the
                // in-progress slot.
                let mut state = self.state.lock();
                while (!state.pending || state.in_progress)
                    && !self.shutdown.load(Ordering::SeqCst)
                {
                    self.work_cv.wait_for(&mut state, TICK_INTERVAL);
                    if !state.pending
                        && !state.in_progress
                        && self.versions.pick_compaction_level().is_some()
                    {
                        state.pending = true;
                    }
                }
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                state.pending = false;
                state.in_progress = true;
            }

            let result = match self.versions.pick_compaction_level() {
                Some(level) => match self.pick_job(level) {
                    Some(job) => self.do_compaction(job),
                    None => Ok(()),
                },
                None => Ok(()),
            };

            {
                let mut state = self.state.lock();
                state.in_progress = false;
                match result {
                    Ok(()) => *self.last_error.write() = None,
                    Err(e) => {
                        error!(error = %e, "compaction failed");
                        *self.last_error.write() = Some(e);
                    }
                }
                self.work_cv.notify_all();
            }
        }

        info!("compaction worker stopped");
    }

    /// Build a job for `level`: all of its files plus the overlapping
    /// files one level down.
    fn pick_job(&self, level: usize) -> Option<CompactionJob> {
        let inputs = self.versions.files_at_level(level);
        if inputs.is_empty() {
            return None;
        }

        let smallest = inputs
            .iter()
            .map(|f| f.smallest_key().clone())
            .min()
            .unwrap_or_default();
        let largest = inputs
            .iter()
            .map(|f| f.largest_key().clone())
            .max()
            .unwrap_or_default();

        // Pulling in the overlapping files keeps level+1 disjoint after
        // the merged output lands there.
        let overlaps: Vec<Arc<FileMetadata>> = self
            .versions
            .files_at_level(level + 1)
            .into_iter()
            .filter(|f| f.overlaps(&smallest, &largest))
            .collect();

        Some(CompactionJob {
            level,
            inputs,
            overlaps,
        })
    }

    /// Merge the job's inputs into one output table at level+1, commit
    /// the manifest, then unlink the inputs.
    ///
    /// A failure before the manifest write leaves an orphaned output
    /// file that the startup janitor removes; a failure after it leaves
    /// deletable inputs for the same janitor.
    fn do_compaction(&self, job: CompactionJob) -> Result<()> {
        let all_inputs: Vec<&Arc<FileMetadata>> =
            job.inputs.iter().chain(job.overlaps.iter()).collect();

        info!(
            level = job.level,
            inputs = job.inputs.len(),
            overlaps = job.overlaps.len(),
            "starting compaction"
        );

        let mut readers = Vec::with_capacity(all_inputs.len());
        let mut bytes_read = 0u64;
        for file in &all_inputs {
            let path = table_file_path(&self.db_path, file.file_number());
            readers.push(TableReader::open(&path, file.file_number())?);
            bytes_read += file.file_size();
        }

        let output_number = self.versions.new_file_number();
        let output_path = table_file_path(&self.db_path, output_number);

        let bloom_bits = self
            .options
            .enable_bloom_filter
            .then_some(self.options.bloom_bits_per_key);
        let mut builder = TableBuilder::new(
            &output_path,
            output_number,
            self.options.block_size,
            bloom_bits,
        )?;
        merge_tables(readers, &mut builder)?;
        let output_info = builder.finish()?;

        let meta = FileMetadata::new(
            output_number,
            output_info.file_size,
            format!("{}.sst", output_number),
            output_info.smallest_key.unwrap_or_else(Bytes::new),
            output_info.largest_key.unwrap_or_else(Bytes::new),
            output_info.entry_count,
        );

        let input_numbers: Vec<u64> = job.inputs.iter().map(|f| f.file_number()).collect();
        let overlap_numbers: Vec<u64> = job.overlaps.iter().map(|f| f.file_number()).collect();

        self.versions
            .apply_compaction(job.level, &input_numbers, &overlap_numbers, meta);
        self.versions.write_manifest()?;

        // The manifest no longer references the inputs; unlink them.
        for file in &all_inputs {
            delete_file(&table_file_path(&self.db_path, file.file_number()))?;
        }

        self.bytes_read.fetch_add(bytes_read, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(output_info.file_size, Ordering::Relaxed);
        self.files_compacted
            .fetch_add(all_inputs.len() as u64, Ordering::Relaxed);
        self.compactions_completed.fetch_add(1, Ordering::Relaxed);

        info!(
            level = job.level,
            output = output_number,
            entries = output_info.entry_count,
            "compaction complete"
        );

        Ok(())
    }
}

impl Drop for Compactor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::StoredValue;
    use crate::types::{LookupResult, ValueType};
    use tempfile::tempdir;

    fn build_table(
        versions: &VersionSet,
        level: usize,
        entries: &[(&[u8], u64, ValueType, &[u8])],
    ) {
        let number = versions.new_file_number();
        let path = table_file_path(versions.db_path(), number);

        let mut builder = TableBuilder::new(&path, number, 4096, Some(10)).unwrap();
        for (key, seq, vt, value) in entries {
            builder
                .add(key, &StoredValue::encode(*vt, *seq, value))
                .unwrap();
        }
        let info = builder.finish().unwrap();

        versions.add_file(
            level,
            FileMetadata::new(
                number,
                info.file_size,
                format!("{}.sst", number),
                info.smallest_key.unwrap(),
                info.largest_key.unwrap(),
                info.entry_count,
            ),
        );
    }

    fn new_compactor(dir: &std::path::Path) -> (Arc<Compactor>, Arc<VersionSet>) {
        let options = Arc::new(Options::default());
        let versions = Arc::new(VersionSet::new(dir, Arc::clone(&options)));
        let compactor = Compactor::new(dir.to_path_buf(), options, Arc::clone(&versions));
        (compactor, versions)
    }

    #[test]
    fn test_compact_empty() {
        let dir = tempdir().unwrap();
        let (compactor, _versions) = new_compactor(dir.path());

        assert!(!compactor.compact_level(-1).unwrap());
        assert_eq!(compactor.stats(), CompactorStats::default());
    }

    #[test]
    fn test_compact_l0_to_l1() {
        let dir = tempdir().unwrap();
        let (compactor, versions) = new_compactor(dir.path());

        build_table(&versions, 0, &[(b"a", 1, ValueType::Value, b"1")]);
        build_table(&versions, 0, &[(b"b", 2, ValueType::Value, b"2")]);
        build_table(&versions, 0, &[(b"c", 3, ValueType::Value, b"3")]);

        assert!(compactor.compact_level(0).unwrap());

        assert_eq!(versions.num_files_at_level(0), 0);
        assert_eq!(versions.num_files_at_level(1), 1);

        let stats = compactor.stats();
        assert_eq!(stats.compactions_completed, 1);
        assert_eq!(stats.files_compacted, 3);
        assert!(stats.bytes_read > 0);
        assert!(stats.bytes_written > 0);

        // Old input files are gone; only the output remains.
        let output = &versions.files_at_level(1)[0];
        let mut reader = TableReader::open(
            &table_file_path(dir.path(), output.file_number()),
            output.file_number(),
        )
        .unwrap();
        assert_eq!(reader.num_entries(), 3);
        assert!(matches!(
            reader.get(b"b", u64::MAX).unwrap(),
            LookupResult::Found(_)
        ));
    }

    #[test]
    fn test_compact_pulls_overlapping_target_files() {
        let dir = tempdir().unwrap();
        let (compactor, versions) = new_compactor(dir.path());

        // L1 already holds [a..c] and [x..z]; only the first overlaps L0.
        build_table(&versions, 1, &[
            (b"a", 1, ValueType::Value, b"old-a"),
            (b"c", 2, ValueType::Value, b"old-c"),
        ]);
        build_table(&versions, 1, &[
            (b"x", 3, ValueType::Value, b"old-x"),
            (b"z", 4, ValueType::Value, b"old-z"),
        ]);
        build_table(&versions, 0, &[(b"b", 5, ValueType::Value, b"new-b")]);

        assert!(compactor.compact_level(0).unwrap());

        // [x..z] untouched; [a..c] merged with the L0 file. Level 1 stays
        // pairwise disjoint.
        let files = versions.files_at_level(1);
        assert_eq!(files.len(), 2);
        for (i, file) in files.iter().enumerate() {
            for other in files.iter().skip(i + 1) {
                assert!(
                    !file.overlaps(other.smallest_key(), other.largest_key()),
                    "level 1 files overlap"
                );
            }
        }

        let merged = files
            .iter()
            .find(|f| f.smallest_key().as_ref() == b"a")
            .expect("merged file");
        assert_eq!(merged.entry_count(), 3);
        assert_eq!(merged.largest_key().as_ref(), b"c");
    }

    #[test]
    fn test_compaction_persists_manifest() {
        let dir = tempdir().unwrap();
        let (compactor, versions) = new_compactor(dir.path());

        build_table(&versions, 0, &[(b"a", 1, ValueType::Value, b"1")]);
        build_table(&versions, 0, &[(b"b", 2, ValueType::Value, b"2")]);
        assert!(compactor.compact_level(0).unwrap());

        let reloaded = Arc::new(VersionSet::new(dir.path(), Arc::new(Options::default())));
        assert!(reloaded.load_manifest().unwrap());
        assert_eq!(reloaded.num_files_at_level(0), 0);
        assert_eq!(reloaded.num_files_at_level(1), 1);
    }

    #[test]
    fn test_background_worker_start_stop() {
        let dir = tempdir().unwrap();
        let (compactor, versions) = new_compactor(dir.path());

        compactor.start();

        // Trip the L0 trigger and poke the worker.
        for i in 0..4u64 {
            let key = format!("key{}", i);
            build_table(&versions, 0, &[(key.as_bytes(), i + 1, ValueType::Value, b"v")]);
        }
        compactor.maybe_schedule();

        // The worker should drain L0 within a couple of ticks.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while versions.num_files_at_level(0) > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        compactor.wait();

        assert_eq!(versions.num_files_at_level(0), 0);
        assert!(compactor.last_error().is_none());

        compactor.stop();
    }
}
