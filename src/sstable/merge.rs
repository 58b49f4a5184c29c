//! K-way merge of table iterators.
//!
//! Produces a single table that is the sorted merge of the inputs,
//! ordered by (user key ascending, sequence descending). Versions are not
//! collapsed and tombstones are not dropped; shrinking history is the
//! compactor's concern, not the merger's.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;

use crate::Result;

use super::{StoredValue, TableBuilder, TableIterator, TableReader};

/// One pending entry in the merge heap.
#[derive(Debug, Clone)]
struct MergeEntry {
    /// User key.
    key: Bytes,
    /// Sequence from the stored-value header.
    sequence: u64,
    /// Encoded stored value.
    stored: Bytes,
    /// Which input this came from.
    input_index: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.sequence == other.sequence
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for the max-heap: smallest key first; within a key,
        // highest sequence first; stable by input index.
        match other.key.cmp(&self.key) {
            Ordering::Equal => match self.sequence.cmp(&other.sequence) {
                Ordering::Equal => other.input_index.cmp(&self.input_index),
                ord => ord,
            },
            ord => ord,
        }
    }
}

/// Merge `inputs` into `builder`.
///
/// The builder is left unfinished so the caller can inspect or finish it.
pub fn merge_tables(inputs: Vec<TableReader>, builder: &mut TableBuilder) -> Result<()> {
    let mut iters: Vec<TableIterator> = inputs
        .into_iter()
        .map(TableReader::into_iter)
        .collect();

    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (index, iter) in iters.iter_mut().enumerate() {
        iter.seek_to_first()?;
        if let Some(entry) = current_entry(iter, index)? {
            heap.push(entry);
        }
    }

    while let Some(entry) = heap.pop() {
        builder.add(&entry.key, &entry.stored)?;

        let iter = &mut iters[entry.input_index];
        iter.next()?;
        if let Some(next) = current_entry(iter, entry.input_index)? {
            heap.push(next);
        }
    }

    Ok(())
}

fn current_entry(iter: &TableIterator, index: usize) -> Result<Option<MergeEntry>> {
    if !iter.valid() {
        return Ok(None);
    }
    let stored = iter.stored_value().clone();
    let sequence = StoredValue::peek_sequence(&stored)?;
    Ok(Some(MergeEntry {
        key: Bytes::copy_from_slice(iter.key()),
        sequence,
        stored,
        input_index: index,
    }))
}
