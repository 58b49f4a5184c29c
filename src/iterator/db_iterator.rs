//! User-facing merged iterator.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use bytes::Bytes;

use crate::memtable::{MemTable, OwnedMemTableIterator};
use crate::sstable::{StoredValue, TableIterator, TableReader};
use crate::{Error, Result};

use super::StorageIterator;

/// Memtable-backed source. Keeps its memtable alive through an `Arc`.
pub(crate) struct MemSource {
    iter: OwnedMemTableIterator,
}

impl MemSource {
    pub(crate) fn new(memtable: &Arc<MemTable>) -> Self {
        Self {
            iter: memtable.iter_owned(),
        }
    }
}

impl StorageIterator for MemSource {
    fn valid(&self) -> bool {
        self.iter.valid()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.iter.seek_to_first();
        Ok(())
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.iter.seek(target);
        Ok(())
    }

    fn next(&mut self) -> Result<()> {
        self.iter.next();
        Ok(())
    }

    fn key(&self) -> &[u8] {
        self.iter.key().user_key()
    }

    fn sequence(&self) -> u64 {
        self.iter.key().sequence()
    }

    fn is_deletion(&self) -> bool {
        self.iter.key().is_deletion()
    }

    fn value(&self) -> &[u8] {
        self.iter.value()
    }
}

/// SSTable-backed source. Owns its reader through the iterator.
pub(crate) struct TableSource {
    iter: TableIterator,
    /// Decoded stored value for the current position.
    current: Option<StoredValue>,
}

impl TableSource {
    pub(crate) fn new(reader: TableReader) -> Self {
        Self {
            iter: reader.into_iter(),
            current: None,
        }
    }

    fn refresh(&mut self) -> Result<()> {
        self.current = if self.iter.valid() {
            Some(self.iter.value()?)
        } else {
            None
        };
        Ok(())
    }
}

impl StorageIterator for TableSource {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) -> Result<()> {
        self.iter.seek_to_first()?;
        self.refresh()
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.iter.seek(target)?;
        self.refresh()
    }

    fn next(&mut self) -> Result<()> {
        self.iter.next()?;
        self.refresh()
    }

    fn key(&self) -> &[u8] {
        self.iter.key()
    }

    fn sequence(&self) -> u64 {
        self.current.as_ref().map(|c| c.sequence).unwrap_or(0)
    }

    fn is_deletion(&self) -> bool {
        self.current
            .as_ref()
            .map(|c| c.value_type.is_deletion())
            .unwrap_or(false)
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().map(|c| c.value.as_ref()).unwrap_or(&[])
    }
}

/// Heap item: a copy of one source's current position.
struct HeapItem {
    key: Bytes,
    sequence: u64,
    source: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.sequence == other.sequence
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for the max-heap: smallest key first, then newest
        // version first, then source order (memtable before tables).
        match other.key.cmp(&self.key) {
            Ordering::Equal => match self.sequence.cmp(&other.sequence) {
                Ordering::Equal => other.source.cmp(&self.source),
                ord => ord,
            },
            ord => ord,
        }
    }
}

/// Iterator over the visible user keys of the whole database at one
/// snapshot.
///
/// K-way merge over {active memtable, immutable memtable, all SSTables}:
/// for each user key the newest version with sequence <= snapshot wins;
/// tombstones suppress their key entirely.
pub struct DBIterator {
    sources: Vec<Box<dyn StorageIterator>>,
    heap: BinaryHeap<HeapItem>,
    snapshot: u64,
    current: Option<(Bytes, Bytes)>,
    /// Last user key resolved (emitted or suppressed by a tombstone).
    last_resolved: Option<Bytes>,
    /// First error encountered while iterating.
    status: Option<Error>,
}

impl DBIterator {
    /// Build an iterator and position it at the first visible entry.
    pub(crate) fn new(sources: Vec<Box<dyn StorageIterator>>, snapshot: u64) -> Result<Self> {
        let mut iter = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            snapshot,
            current: None,
            last_resolved: None,
            status: None,
        };
        iter.seek_to_first()?;
        Ok(iter)
    }

    /// Whether the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Current user key. Panics if invalid.
    pub fn key(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not valid").0
    }

    /// Current value. Panics if invalid.
    pub fn value(&self) -> &[u8] {
        &self.current.as_ref().expect("iterator not valid").1
    }

    /// First error encountered, if any.
    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Reposition at the first visible entry.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.heap.clear();
        self.current = None;
        self.last_resolved = None;

        for index in 0..self.sources.len() {
            self.sources[index].seek_to_first()?;
            self.skip_invisible(index)?;
            self.push_current(index);
        }

        self.advance()
    }

    /// Reposition at the first visible entry with key >= `target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        self.heap.clear();
        self.current = None;
        self.last_resolved = None;

        for index in 0..self.sources.len() {
            self.sources[index].seek(target)?;
            self.skip_invisible(index)?;
            self.push_current(index);
        }

        self.advance()
    }

    /// Advance to the next visible entry.
    pub fn advance(&mut self) -> Result<()> {
        self.current = None;

        while let Some(item) = self.heap.pop() {
            let source = item.source;
            let is_deletion = self.sources[source].is_deletion();
            let value = Bytes::copy_from_slice(self.sources[source].value());

            // Move the drained source forward and re-queue it.
            self.sources[source].next()?;
            self.skip_invisible(source)?;
            self.push_current(source);

            // Older version of a key we already resolved.
            if self.last_resolved.as_ref() == Some(&item.key) {
                continue;
            }
            self.last_resolved = Some(item.key.clone());

            // Newest visible version is a tombstone: the key is gone.
            if is_deletion {
                continue;
            }

            self.current = Some((item.key, value));
            return Ok(());
        }

        Ok(())
    }

    /// Skip entries newer than the snapshot.
    fn skip_invisible(&mut self, index: usize) -> Result<()> {
        while self.sources[index].valid() && self.sources[index].sequence() > self.snapshot {
            self.sources[index].next()?;
        }
        Ok(())
    }

    fn push_current(&mut self, index: usize) {
        let source = &self.sources[index];
        if source.valid() {
            self.heap.push(HeapItem {
                key: Bytes::copy_from_slice(source.key()),
                sequence: source.sequence(),
                source: index,
            });
        }
    }
}

impl Iterator for DBIterator {
    type Item = (Bytes, Bytes);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current.take()?;
        if let Err(e) = self.advance() {
            self.status = Some(e);
            self.current = None;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::TableBuilder;
    use crate::types::ValueType;
    use tempfile::tempdir;

    fn mem_with(entries: &[(&[u8], &[u8], u64, ValueType)]) -> Arc<MemTable> {
        let mem = Arc::new(MemTable::new(1));
        for (key, value, seq, vt) in entries {
            mem.add(key, value, *seq, *vt);
        }
        mem
    }

    fn table_with(
        dir: &std::path::Path,
        name: &str,
        entries: &[(&[u8], &[u8], u64, ValueType)],
    ) -> TableReader {
        let path = dir.join(name);
        let mut builder = TableBuilder::new(&path, 0, 4096, Some(10)).unwrap();
        for (key, value, seq, vt) in entries {
            builder
                .add(key, &StoredValue::encode(*vt, *seq, value))
                .unwrap();
        }
        builder.finish().unwrap();
        TableReader::open(&path, 0).unwrap()
    }

    fn collect(iter: DBIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
        iter.map(|(k, v)| (k.to_vec(), v.to_vec())).collect()
    }

    #[test]
    fn test_iterator_memtable_only() {
        let mem = mem_with(&[
            (b"b", b"2", 2, ValueType::Value),
            (b"a", b"1", 1, ValueType::Value),
            (b"c", b"3", 3, ValueType::Value),
        ]);

        let iter = DBIterator::new(vec![Box::new(MemSource::new(&mem))], u64::MAX).unwrap();
        let entries = collect(iter);

        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );
    }

    #[test]
    fn test_iterator_dedups_to_newest() {
        let mem = mem_with(&[
            (b"k", b"old", 1, ValueType::Value),
            (b"k", b"new", 5, ValueType::Value),
        ]);

        let iter = DBIterator::new(vec![Box::new(MemSource::new(&mem))], u64::MAX).unwrap();
        let entries = collect(iter);
        assert_eq!(entries, vec![(b"k".to_vec(), b"new".to_vec())]);
    }

    #[test]
    fn test_iterator_skips_tombstones() {
        let mem = mem_with(&[
            (b"a", b"1", 1, ValueType::Value),
            (b"b", b"2", 2, ValueType::Value),
            (b"b", b"", 3, ValueType::Deletion),
            (b"c", b"3", 4, ValueType::Value),
        ]);

        let iter = DBIterator::new(vec![Box::new(MemSource::new(&mem))], u64::MAX).unwrap();
        let entries = collect(iter);

        assert_eq!(
            entries,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]
        );
    }

    #[test]
    fn test_iterator_snapshot_filtering() {
        let mem = mem_with(&[
            (b"k", b"v1", 1, ValueType::Value),
            (b"k", b"v2", 5, ValueType::Value),
        ]);

        let iter = DBIterator::new(vec![Box::new(MemSource::new(&mem))], 3).unwrap();
        let entries = collect(iter);
        assert_eq!(entries, vec![(b"k".to_vec(), b"v1".to_vec())]);

        // Snapshot before any write sees nothing.
        let iter = DBIterator::new(vec![Box::new(MemSource::new(&mem))], 0).unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_merges_memtable_over_table() {
        let dir = tempdir().unwrap();

        // The table holds the old state, the memtable shadows part of it.
        let table = table_with(
            dir.path(),
            "1.sst",
            &[
                (b"a", b"a-disk", 1, ValueType::Value),
                (b"b", b"b-disk", 2, ValueType::Value),
            ],
        );
        let mem = mem_with(&[
            (b"b", b"b-mem", 9, ValueType::Value),
            (b"c", b"c-mem", 10, ValueType::Value),
        ]);

        let iter = DBIterator::new(
            vec![
                Box::new(MemSource::new(&mem)),
                Box::new(TableSource::new(table)),
            ],
            u64::MAX,
        )
        .unwrap();
        let entries = collect(iter);

        assert_eq!(
            entries,
            vec![
                (b"a".to_vec(), b"a-disk".to_vec()),
                (b"b".to_vec(), b"b-mem".to_vec()),
                (b"c".to_vec(), b"c-mem".to_vec()),
            ]
        );
    }

    #[test]
    fn test_iterator_tombstone_in_memtable_hides_table_value() {
        let dir = tempdir().unwrap();

        let table = table_with(
            dir.path(),
            "1.sst",
            &[(b"doomed", b"payload", 1, ValueType::Value)],
        );
        let mem = mem_with(&[(b"doomed", b"", 5, ValueType::Deletion)]);

        let iter = DBIterator::new(
            vec![
                Box::new(MemSource::new(&mem)),
                Box::new(TableSource::new(table)),
            ],
            u64::MAX,
        )
        .unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_seek() {
        let mem = mem_with(&[
            (b"a", b"1", 1, ValueType::Value),
            (b"c", b"3", 2, ValueType::Value),
            (b"e", b"5", 3, ValueType::Value),
        ]);

        let mut iter = DBIterator::new(vec![Box::new(MemSource::new(&mem))], u64::MAX).unwrap();
        iter.seek(b"b").unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"c");

        iter.seek(b"f").unwrap();
        assert!(!iter.valid());
    }

    #[test]
    fn test_iterator_empty_database() {
        let mem = mem_with(&[]);
        let iter = DBIterator::new(vec![Box::new(MemSource::new(&mem))], u64::MAX).unwrap();
        assert!(!iter.valid());
        assert_eq!(collect(iter).len(), 0);
    }
}
