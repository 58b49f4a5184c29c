//! SSTable reader.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::types::LookupResult;
use crate::util::coding::get_u32_le;
use crate::{Error, Result};

use super::{parse_block, BloomFilter, Footer, IndexEntry, StoredValue, FOOTER_SIZE};

/// Reader over a finished table file.
///
/// Owns its file handle; opening parses the footer, index and bloom
/// filter and computes the key range.
#[derive(Debug)]
pub struct TableReader {
    /// File handle.
    file: File,
    /// File path, for error messages.
    path: PathBuf,
    /// Total file size.
    file_size: u64,
    /// Parsed footer.
    footer: Footer,
    /// Sparse index, one entry per data block.
    index: Vec<IndexEntry>,
    /// Bloom filter, absent when the file carries none.
    filter: Option<BloomFilter>,
    /// Smallest user key in the file.
    smallest_key: Bytes,
    /// Largest user key in the file.
    largest_key: Bytes,
    /// File number.
    file_number: u64,
}

impl TableReader {
    /// Open a table file.
    pub fn open(path: &Path, file_number: u64) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::corruption(format!(
                "{}: file too small for footer",
                path.display()
            )));
        }

        let mut footer_buf = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)?;

        let index_data = read_range(&mut file, footer.index_offset, footer.index_size)?;
        let index = parse_index(&index_data)?;

        let filter = if footer.bloom_size > 0 {
            let bloom_data = read_range(&mut file, footer.bloom_offset, footer.bloom_size)?;
            // An unparseable filter degrades to "may contain".
            BloomFilter::from_bytes(Bytes::from(bloom_data))
        } else {
            None
        };

        let smallest_key = index
            .first()
            .map(|e| e.first_key.clone())
            .unwrap_or_default();

        let largest_key = match index.last() {
            Some(last) => {
                let block = read_range(&mut file, last.block_offset, last.block_size)?;
                let entries = parse_block(&block)?;
                entries
                    .last()
                    .map(|(k, _)| k.clone())
                    .ok_or_else(|| Error::corruption("index points at empty block"))?
            }
            None => Bytes::new(),
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_size,
            footer,
            index,
            filter,
            smallest_key,
            largest_key,
            file_number,
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of entries in the file.
    pub fn num_entries(&self) -> u64 {
        self.footer.entry_count
    }

    /// Smallest user key in the file.
    pub fn smallest_key(&self) -> &Bytes {
        &self.smallest_key
    }

    /// Largest user key in the file.
    pub fn largest_key(&self) -> &Bytes {
        &self.largest_key
    }

    /// File path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check the bloom filter. `true` on absent filter.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        match &self.filter {
            Some(filter) => filter.may_contain(key),
            None => true,
        }
    }

    /// Index of the first block whose range may contain `key`.
    ///
    /// Strict comparison: with duplicate first keys (versions of one key
    /// spanning blocks) the scan must start at the first such block,
    /// where the newest version lives.
    fn find_block(&self, key: &[u8]) -> Option<usize> {
        if self.index.is_empty() {
            return None;
        }
        let pp = self.index.partition_point(|e| e.first_key.as_ref() < key);
        Some(pp.saturating_sub(1))
    }

    /// Point lookup at a snapshot.
    ///
    /// Versions of a key are stored newest-first, so the first entry at
    /// or below the snapshot wins.
    pub fn get(&mut self, key: &[u8], snapshot: u64) -> Result<LookupResult> {
        if self.index.is_empty() || !self.may_contain(key) {
            return Ok(LookupResult::NotFound);
        }

        let mut block_idx = match self.find_block(key) {
            Some(idx) => idx,
            None => return Ok(LookupResult::NotFound),
        };

        // Versions of one key can spill across block boundaries; keep
        // scanning while following blocks could still start at the key.
        loop {
            let entry = &self.index[block_idx];
            let block = read_range(&mut self.file, entry.block_offset, entry.block_size)?;
            let entries = parse_block(&block)?;

            for (entry_key, stored) in entries {
                match entry_key.as_ref().cmp(key) {
                    std::cmp::Ordering::Less => continue,
                    std::cmp::Ordering::Greater => return Ok(LookupResult::NotFound),
                    std::cmp::Ordering::Equal => {
                        let stored = StoredValue::decode(&stored)?;
                        if stored.sequence <= snapshot {
                            return Ok(if stored.value_type.is_deletion() {
                                LookupResult::Deleted
                            } else {
                                LookupResult::Found(stored.value)
                            });
                        }
                    }
                }
            }

            block_idx += 1;
            if block_idx >= self.index.len() || self.index[block_idx].first_key.as_ref() > key {
                return Ok(LookupResult::NotFound);
            }
        }
    }

    /// Turn the reader into a forward iterator.
    pub fn into_iter(self) -> TableIterator {
        TableIterator {
            reader: self,
            block_idx: 0,
            entries: Vec::new(),
            entry_idx: 0,
        }
    }

    fn load_block(&mut self, block_idx: usize) -> Result<Vec<(Bytes, Bytes)>> {
        let entry = &self.index[block_idx];
        let block = read_range(&mut self.file, entry.block_offset, entry.block_size)?;
        parse_block(&block)
    }
}

/// Cursor over a table: `(block index, position within block)`.
pub struct TableIterator {
    reader: TableReader,
    block_idx: usize,
    entries: Vec<(Bytes, Bytes)>,
    entry_idx: usize,
}

impl TableIterator {
    /// Check if the iterator is positioned at an entry.
    pub fn valid(&self) -> bool {
        self.entry_idx < self.entries.len()
    }

    /// Current user key. Panics if invalid.
    pub fn key(&self) -> &[u8] {
        &self.entries[self.entry_idx].0
    }

    /// Current stored value (still encoded). Panics if invalid.
    pub fn stored_value(&self) -> &Bytes {
        &self.entries[self.entry_idx].1
    }

    /// Decode the current stored value.
    pub fn value(&self) -> Result<StoredValue> {
        StoredValue::decode(&self.entries[self.entry_idx].1)
    }

    /// The underlying reader.
    pub fn reader(&self) -> &TableReader {
        &self.reader
    }

    /// Position at the first entry of the file.
    pub fn seek_to_first(&mut self) -> Result<()> {
        self.block_idx = 0;
        self.entry_idx = 0;
        self.entries.clear();
        if !self.reader.index.is_empty() {
            self.entries = self.reader.load_block(0)?;
        }
        self.skip_exhausted_blocks()
    }

    /// Position at the first entry with key >= `target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        if self.reader.index.is_empty() {
            self.entries.clear();
            self.entry_idx = 0;
            return Ok(());
        }

        self.block_idx = self.reader.find_block(target).unwrap_or(0);
        self.entries = self.reader.load_block(self.block_idx)?;
        self.entry_idx = self
            .entries
            .partition_point(|(k, _)| k.as_ref() < target);
        self.skip_exhausted_blocks()
    }

    /// Advance to the next entry. Panics if invalid.
    pub fn next(&mut self) -> Result<()> {
        assert!(self.valid());
        self.entry_idx += 1;
        self.skip_exhausted_blocks()
    }

    fn skip_exhausted_blocks(&mut self) -> Result<()> {
        while self.entry_idx >= self.entries.len() {
            if self.block_idx + 1 >= self.reader.index.len() {
                return Ok(());
            }
            self.block_idx += 1;
            self.entries = self.reader.load_block(self.block_idx)?;
            self.entry_idx = 0;
        }
        Ok(())
    }
}

fn read_range(file: &mut File, offset: u64, size: u64) -> Result<Vec<u8>> {
    let mut data = vec![0u8; size as usize];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut data)?;
    Ok(data)
}

fn parse_index(data: &[u8]) -> Result<Vec<IndexEntry>> {
    let mut offset = 0;
    let count = get_u32_le(data, &mut offset)? as usize;

    let mut index = Vec::with_capacity(count);
    for _ in 0..count {
        index.push(IndexEntry::decode(data, &mut offset)?);
    }

    Ok(index)
}
