//! VersionSet - persistent record of which files exist at which levels.
//!
//! MANIFEST binary format (little-endian): `next_file_number u64`,
//! `num_levels u32`, then per level `num_files u32` followed by each
//! file's metadata. The manifest is rewritten in full to a temp file and
//! renamed over `MANIFEST`, so a crash leaves either the old or the new
//! state, never a mix.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::options::{Options, MAX_LEVELS};
use crate::util::coding::{get_u32_le, get_u64_le, put_u32_le, put_u64_le};
use crate::util::filename::{manifest_file_path, manifest_temp_path, sync_dir};
use crate::{Error, Result};

use super::FileMetadata;

/// Tracks the set of live SSTables per level and allocates file numbers.
///
/// Mutations are serialized by an internal mutex; `files_at_level`
/// returns a copy safe to use without holding any lock.
pub struct VersionSet {
    /// Database directory path.
    db_path: PathBuf,
    /// Files per level. L0 is kept newest-first by file number; L1+ are
    /// sorted by smallest key and pairwise disjoint.
    levels: Mutex<Vec<Vec<Arc<FileMetadata>>>>,
    /// Next file number to allocate.
    next_file_number: AtomicU64,
    /// Database options.
    options: Arc<Options>,
}

impl VersionSet {
    /// Create an empty version set.
    pub fn new(db_path: &Path, options: Arc<Options>) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            levels: Mutex::new(vec![Vec::new(); MAX_LEVELS]),
            next_file_number: AtomicU64::new(1),
            options,
        }
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Allocate a fresh file number.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    /// Peek at the next file number without allocating.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number.load(Ordering::SeqCst)
    }

    /// Register a file at a level.
    pub fn add_file(&self, level: usize, file: FileMetadata) {
        let mut levels = self.levels.lock();
        debug!(level, file = file.file_number(), "registering table");

        let files = &mut levels[level];
        files.push(Arc::new(file));
        Self::sort_level(level, files);
    }

    /// Remove files by number from a level.
    pub fn remove_files(&self, level: usize, file_numbers: &[u64]) {
        let mut levels = self.levels.lock();
        levels[level].retain(|f| !file_numbers.contains(&f.file_number()));
    }

    /// Atomically swap a compaction's inputs for its output: readers see
    /// either the inputs or the output, never neither.
    pub fn apply_compaction(
        &self,
        level: usize,
        input_numbers: &[u64],
        overlap_numbers: &[u64],
        output: FileMetadata,
    ) {
        let mut levels = self.levels.lock();
        debug!(
            level,
            output = output.file_number(),
            "installing compaction result"
        );

        levels[level].retain(|f| !input_numbers.contains(&f.file_number()));
        levels[level + 1].retain(|f| !overlap_numbers.contains(&f.file_number()));
        levels[level + 1].push(Arc::new(output));
        Self::sort_level(level + 1, &mut levels[level + 1]);
    }

    /// Copy of the file list at a level.
    pub fn files_at_level(&self, level: usize) -> Vec<Arc<FileMetadata>> {
        let levels = self.levels.lock();
        if level >= levels.len() {
            return Vec::new();
        }
        levels[level].clone()
    }

    /// Number of files at a level.
    pub fn num_files_at_level(&self, level: usize) -> usize {
        let levels = self.levels.lock();
        levels.get(level).map(|f| f.len()).unwrap_or(0)
    }

    /// Total bytes at a level.
    pub fn level_size(&self, level: usize) -> u64 {
        let levels = self.levels.lock();
        levels
            .get(level)
            .map(|files| files.iter().map(|f| f.file_size()).sum())
            .unwrap_or(0)
    }

    /// Total file count across all levels.
    pub fn total_files(&self) -> usize {
        let levels = self.levels.lock();
        levels.iter().map(|f| f.len()).sum()
    }

    /// Check whether a level has tripped its compaction trigger.
    pub fn needs_compaction(&self, level: usize) -> bool {
        if level == 0 {
            return self.num_files_at_level(0) >= crate::options::L0_COMPACTION_TRIGGER;
        }
        self.level_size(level) > self.options.max_bytes_for_level(level)
    }

    /// First level (bottom-up) that wants compacting, if any.
    pub fn pick_compaction_level(&self) -> Option<usize> {
        (0..MAX_LEVELS - 1).find(|&level| self.needs_compaction(level))
    }

    /// File numbers of every live table.
    pub fn live_files(&self) -> HashSet<u64> {
        let levels = self.levels.lock();
        levels
            .iter()
            .flat_map(|files| files.iter().map(|f| f.file_number()))
            .collect()
    }

    /// Serialize the whole state and atomically replace `MANIFEST`.
    pub fn write_manifest(&self) -> Result<()> {
        let encoded = {
            let levels = self.levels.lock();
            let mut buf = BytesMut::new();

            put_u64_le(&mut buf, self.next_file_number.load(Ordering::SeqCst));
            put_u32_le(&mut buf, levels.len() as u32);

            for files in levels.iter() {
                put_u32_le(&mut buf, files.len() as u32);
                for file in files {
                    file.encode_to(&mut buf);
                }
            }

            buf.freeze()
        };

        let temp_path = manifest_temp_path(&self.db_path);
        let manifest_path = manifest_file_path(&self.db_path);

        {
            let mut file = File::create(&temp_path)
                .map_err(|e| Error::manifest(format!("create {}: {}", temp_path.display(), e)))?;
            file.write_all(&encoded)
                .map_err(|e| Error::manifest(format!("write manifest: {}", e)))?;
            file.sync_all()
                .map_err(|e| Error::manifest(format!("sync manifest: {}", e)))?;
        }

        std::fs::rename(&temp_path, &manifest_path)
            .map_err(|e| Error::manifest(format!("rename manifest: {}", e)))?;
        sync_dir(&self.db_path)?;

        Ok(())
    }

    /// Restore state from `MANIFEST`.
    ///
    /// Returns `false` when no manifest exists (fresh database).
    pub fn load_manifest(&self) -> Result<bool> {
        let manifest_path = manifest_file_path(&self.db_path);
        if !manifest_path.exists() {
            return Ok(false);
        }

        let mut data = Vec::new();
        File::open(&manifest_path)?.read_to_end(&mut data)?;

        let mut offset = 0;
        let next_file_number = get_u64_le(&data, &mut offset)?;
        let num_levels = get_u32_le(&data, &mut offset)? as usize;

        let mut new_levels: Vec<Vec<Arc<FileMetadata>>> =
            vec![Vec::new(); num_levels.max(MAX_LEVELS)];

        for files in new_levels.iter_mut().take(num_levels) {
            let num_files = get_u32_le(&data, &mut offset)? as usize;
            for _ in 0..num_files {
                files.push(Arc::new(FileMetadata::decode(&data, &mut offset)?));
            }
        }

        for (level, files) in new_levels.iter_mut().enumerate() {
            Self::sort_level(level, files);
        }

        self.next_file_number
            .store(next_file_number, Ordering::SeqCst);
        *self.levels.lock() = new_levels;

        info!(
            next_file_number,
            files = self.total_files(),
            "loaded manifest"
        );
        Ok(true)
    }

    fn sort_level(level: usize, files: &mut [Arc<FileMetadata>]) {
        if level == 0 {
            // L0 overlaps; reads go newest-first by file number.
            files.sort_by(|a, b| b.file_number().cmp(&a.file_number()));
        } else {
            files.sort_by(|a, b| a.smallest_key().cmp(b.smallest_key()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    fn make_meta(number: u64, smallest: &[u8], largest: &[u8], size: u64) -> FileMetadata {
        FileMetadata::new(
            number,
            size,
            format!("{}.sst", number),
            Bytes::copy_from_slice(smallest),
            Bytes::copy_from_slice(largest),
            1,
        )
    }

    fn new_version_set(path: &Path) -> VersionSet {
        VersionSet::new(path, Arc::new(Options::default()))
    }

    #[test]
    fn test_version_set_file_numbers() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());

        assert_eq!(vs.new_file_number(), 1);
        assert_eq!(vs.new_file_number(), 2);
        assert_eq!(vs.new_file_number(), 3);
        assert_eq!(vs.next_file_number(), 4);
    }

    #[test]
    fn test_version_set_add_remove() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());

        vs.add_file(0, make_meta(1, b"a", b"m", 100));
        vs.add_file(0, make_meta(2, b"n", b"z", 100));
        vs.add_file(1, make_meta(3, b"a", b"z", 100));

        assert_eq!(vs.num_files_at_level(0), 2);
        assert_eq!(vs.num_files_at_level(1), 1);
        assert_eq!(vs.total_files(), 3);
        assert_eq!(vs.level_size(0), 200);

        vs.remove_files(0, &[1]);
        assert_eq!(vs.num_files_at_level(0), 1);
        assert_eq!(vs.files_at_level(0)[0].file_number(), 2);
    }

    #[test]
    fn test_version_set_l0_newest_first() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());

        vs.add_file(0, make_meta(1, b"a", b"z", 100));
        vs.add_file(0, make_meta(5, b"a", b"z", 100));
        vs.add_file(0, make_meta(3, b"a", b"z", 100));

        let numbers: Vec<u64> = vs
            .files_at_level(0)
            .iter()
            .map(|f| f.file_number())
            .collect();
        assert_eq!(numbers, vec![5, 3, 1]);
    }

    #[test]
    fn test_version_set_l1_sorted_by_key() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());

        vs.add_file(1, make_meta(1, b"m", b"p", 100));
        vs.add_file(1, make_meta(2, b"a", b"c", 100));
        vs.add_file(1, make_meta(3, b"t", b"z", 100));

        let smallest: Vec<Vec<u8>> = vs
            .files_at_level(1)
            .iter()
            .map(|f| f.smallest_key().to_vec())
            .collect();
        assert_eq!(smallest, vec![b"a".to_vec(), b"m".to_vec(), b"t".to_vec()]);
    }

    #[test]
    fn test_compaction_triggers() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());

        assert!(!vs.needs_compaction(0));
        for i in 0..4 {
            vs.add_file(0, make_meta(i + 1, b"a", b"z", 100));
        }
        assert!(vs.needs_compaction(0));
        assert_eq!(vs.pick_compaction_level(), Some(0));

        // Level 1 trips on bytes, not count.
        let vs = new_version_set(dir.path());
        vs.add_file(1, make_meta(1, b"a", b"m", 11 * 1024 * 1024));
        assert!(vs.needs_compaction(1));

        let vs = new_version_set(dir.path());
        vs.add_file(1, make_meta(1, b"a", b"m", 9 * 1024 * 1024));
        assert!(!vs.needs_compaction(1));

        // Level 2 budget is 10x larger.
        let vs = new_version_set(dir.path());
        vs.add_file(2, make_meta(1, b"a", b"m", 11 * 1024 * 1024));
        assert!(!vs.needs_compaction(2));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempdir().unwrap();

        {
            let vs = new_version_set(dir.path());
            vs.new_file_number();
            vs.new_file_number();
            vs.add_file(0, make_meta(1, b"a", b"m", 100));
            vs.add_file(0, make_meta(2, b"n", b"z", 200));
            vs.add_file(1, make_meta(3, b"a", b"z", 300));
            vs.write_manifest().unwrap();
        }

        let vs = new_version_set(dir.path());
        assert!(vs.load_manifest().unwrap());

        assert_eq!(vs.next_file_number(), 3);
        assert_eq!(vs.num_files_at_level(0), 2);
        assert_eq!(vs.num_files_at_level(1), 1);

        let f = &vs.files_at_level(1)[0];
        assert_eq!(f.file_number(), 3);
        assert_eq!(f.file_size(), 300);
        assert_eq!(f.filename(), "3.sst");
        assert_eq!(f.smallest_key().as_ref(), b"a");
        assert_eq!(f.largest_key().as_ref(), b"z");
    }

    #[test]
    fn test_manifest_missing() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());
        assert!(!vs.load_manifest().unwrap());
    }

    #[test]
    fn test_manifest_atomic_replace() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());

        vs.add_file(0, make_meta(1, b"a", b"z", 100));
        vs.write_manifest().unwrap();
        vs.add_file(0, make_meta(2, b"a", b"z", 100));
        vs.write_manifest().unwrap();

        // No temp file survives a successful write.
        assert!(!manifest_temp_path(dir.path()).exists());

        let vs2 = new_version_set(dir.path());
        assert!(vs2.load_manifest().unwrap());
        assert_eq!(vs2.num_files_at_level(0), 2);
    }

    #[test]
    fn test_live_files() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(dir.path());

        vs.add_file(0, make_meta(7, b"a", b"z", 100));
        vs.add_file(3, make_meta(9, b"a", b"z", 100));

        let live = vs.live_files();
        assert!(live.contains(&7));
        assert!(live.contains(&9));
        assert_eq!(live.len(), 2);
    }
}
