//! Background compaction.

mod compactor;

pub use compactor::Compactor;

use std::sync::Arc;

use crate::version::FileMetadata;

/// A selected unit of compaction work.
#[derive(Debug)]
pub struct CompactionJob {
    /// Source level.
    pub level: usize,
    /// Files at the source level.
    pub inputs: Vec<Arc<FileMetadata>>,
    /// Files at level+1 overlapping the inputs' key range. Merged in so
    /// the target level stays pairwise disjoint.
    pub overlaps: Vec<Arc<FileMetadata>>,
}

/// Cumulative compactor statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactorStats {
    /// Bytes read from input files.
    pub bytes_read: u64,
    /// Bytes written to output files.
    pub bytes_written: u64,
    /// Number of input files consumed.
    pub files_compacted: u64,
    /// Number of completed compactions.
    pub compactions_completed: u64,
}
