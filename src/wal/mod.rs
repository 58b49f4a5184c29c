//! Write-ahead log.
//!
//! Record wire format (little-endian):
//!
//! ```text
//! [crc u32][sequence u64][op u8][key_len u32][key][value_len u32][value]
//! ```
//!
//! The CRC (IEEE 802.3) covers every byte after the CRC field. Segments
//! are named `<seq>.wal`, where `<seq>` is the engine sequence number at
//! segment creation; a segment therefore only contains records with
//! sequences greater than its embedded base.

mod reader;
mod writer;

pub use reader::WalReader;
pub use writer::WalWriter;

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use crate::types::ValueType;
use crate::util::filename::{delete_file, list_files_of_type, wal_file_path, FileType};
use crate::Result;

/// Size of the fixed record prefix: crc + sequence + op + key_len.
pub(crate) const RECORD_HEADER_SIZE: usize = 4 + 8 + 1 + 4;

/// A decoded WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Sequence number of the mutation.
    pub sequence: u64,
    /// Operation type.
    pub value_type: ValueType,
    /// User key.
    pub key: Bytes,
    /// Value bytes; empty for deletions.
    pub value: Bytes,
}

/// Manages the WAL segments of a database directory.
pub struct WalManager {
    db_path: PathBuf,
}

impl WalManager {
    /// Create a manager over the given database directory.
    pub fn new(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
        }
    }

    /// Create a fresh writer for a segment based at `sequence`.
    pub fn create_writer(&self, sequence: u64) -> Result<WalWriter> {
        WalWriter::create(&wal_file_path(&self.db_path, sequence), sequence)
    }

    /// Enumerate existing segments, sorted numerically by base sequence.
    pub fn list_segments(&self) -> Result<Vec<(u64, PathBuf)>> {
        let numbers = list_files_of_type(&self.db_path, FileType::Wal)?;
        Ok(numbers
            .into_iter()
            .map(|seq| (seq, wal_file_path(&self.db_path, seq)))
            .collect())
    }

    /// Delete segments whose base sequence is strictly below
    /// `min_sequence`.
    ///
    /// The active segment's base equals the durable sequence after a
    /// flush, so the strict comparison keeps it alive.
    pub fn purge_obsolete(&self, min_sequence: u64) -> Result<()> {
        for (seq, path) in self.list_segments()? {
            if seq < min_sequence {
                delete_file(&path)?;
                debug!(segment = seq, "deleted obsolete WAL segment");
            }
        }
        Ok(())
    }
}
