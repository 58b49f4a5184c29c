//! Database file naming conventions.
//!
//! Directory layout:
//! - `MANIFEST` — version-set snapshot (rewritten atomically via
//!   `MANIFEST.tmp`).
//! - `<seq>.wal` — WAL segments, named by the sequence number current at
//!   segment creation.
//! - `<n>.sst` — SSTables, `<n>` assigned by the version set.
//! - `LOCK` — held open with flock for the process lifetime.

use std::path::{Path, PathBuf};

/// File types in the database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Write-ahead log segment.
    Wal,
    /// SSTable data file.
    Table,
    /// Manifest file.
    Manifest,
    /// Lock file.
    Lock,
    /// Temporary file.
    Temp,
}

/// Generate the lock file path.
pub fn lock_file_path(db_path: &Path) -> PathBuf {
    db_path.join("LOCK")
}

/// Generate the manifest file path.
pub fn manifest_file_path(db_path: &Path) -> PathBuf {
    db_path.join("MANIFEST")
}

/// Generate the temporary manifest path used for atomic replacement.
pub fn manifest_temp_path(db_path: &Path) -> PathBuf {
    db_path.join("MANIFEST.tmp")
}

/// Generate a WAL segment path for the given base sequence.
pub fn wal_file_path(db_path: &Path, sequence: u64) -> PathBuf {
    db_path.join(format!("{}.wal", sequence))
}

/// Generate an SSTable file path.
pub fn table_file_path(db_path: &Path, file_number: u64) -> PathBuf {
    db_path.join(format!("{}.sst", file_number))
}

/// Parse a file name and return its type and embedded number.
///
/// Returns `None` if the file name doesn't match any known pattern.
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == "MANIFEST" {
        return Some((FileType::Manifest, 0));
    }
    if name == "MANIFEST.tmp" {
        return Some((FileType::Temp, 0));
    }
    if name == "LOCK" {
        return Some((FileType::Lock, 0));
    }

    let (num_str, ext) = name.rsplit_once('.')?;
    let number = num_str.parse::<u64>().ok()?;
    let file_type = match ext {
        "wal" => FileType::Wal,
        "sst" => FileType::Table,
        "tmp" => FileType::Temp,
        _ => return None,
    };
    Some((file_type, number))
}

/// List all files of a given type, sorted numerically by embedded number.
pub fn list_files_of_type(db_path: &Path, file_type: FileType) -> std::io::Result<Vec<u64>> {
    let mut numbers = Vec::new();

    for entry in std::fs::read_dir(db_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if let Some((ft, number)) = parse_file_name(&name) {
            if ft == file_type {
                numbers.push(number);
            }
        }
    }

    numbers.sort_unstable();
    Ok(numbers)
}

/// Delete a file, ignoring "not found" errors.
pub fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> std::io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

/// Sync a directory so renames and unlinks within it are durable.
pub fn sync_dir(path: &Path) -> std::io::Result<()> {
    let dir = std::fs::File::open(path)?;
    dir.sync_all()
}
