//! SSTable builder.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::util::coding::put_length_prefixed;
use crate::Result;

use super::{BloomFilterBuilder, Footer, IndexEntry, FOOTER_SIZE};

/// Builds a table file from keys added in non-decreasing order.
///
/// States: open (accepting keys), finished (footer written), abandoned
/// (partial file removed). Dropping an unfinished builder abandons it.
pub struct TableBuilder {
    /// Destination path.
    path: PathBuf,
    /// Buffered file writer.
    writer: BufWriter<File>,
    /// Current offset in the file.
    offset: u64,
    /// Data block under construction.
    data_block: BytesMut,
    /// First key of the block under construction.
    first_key_in_block: Option<Bytes>,
    /// Sparse index entries collected so far.
    index_entries: Vec<IndexEntry>,
    /// Bloom filter builder, absent when filters are disabled.
    filter_builder: Option<BloomFilterBuilder>,
    /// Last key added, for order checking.
    last_key: Vec<u8>,
    /// Number of entries added.
    entry_count: u64,
    /// Target data block size.
    block_size: usize,
    /// File number this table will be registered under.
    file_number: u64,
    /// Smallest user key added.
    smallest_key: Option<Bytes>,
    /// Largest user key added.
    largest_key: Option<Bytes>,
    /// Whether `finish` completed.
    finished: bool,
}

impl TableBuilder {
    /// Create a builder writing to `path`.
    pub fn new(
        path: &Path,
        file_number: u64,
        block_size: usize,
        bloom_bits_per_key: Option<usize>,
    ) -> Result<Self> {
        let file = File::create(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::with_capacity(block_size * 4, file),
            offset: 0,
            data_block: BytesMut::with_capacity(block_size + 512),
            first_key_in_block: None,
            index_entries: Vec::new(),
            filter_builder: bloom_bits_per_key.map(BloomFilterBuilder::new),
            last_key: Vec::new(),
            entry_count: 0,
            block_size,
            file_number,
            smallest_key: None,
            largest_key: None,
            finished: false,
        })
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Number of entries added so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Bytes written plus the block under construction.
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.data_block.len() as u64
    }

    /// Add an entry. `stored_value` is the already-encoded
    /// `[op][sequence][value]` payload.
    ///
    /// Keys must be non-decreasing; equal keys are allowed (multiple
    /// versions of one user key).
    pub fn add(&mut self, key: &[u8], stored_value: &[u8]) -> Result<()> {
        debug_assert!(
            self.last_key.is_empty() || key >= self.last_key.as_slice(),
            "keys must be added in sorted order"
        );

        if self.first_key_in_block.is_none() {
            self.first_key_in_block = Some(Bytes::copy_from_slice(key));
        }

        if let Some(ref mut filter) = self.filter_builder {
            filter.add(key);
        }

        if self.smallest_key.is_none() {
            self.smallest_key = Some(Bytes::copy_from_slice(key));
        }
        self.largest_key = Some(Bytes::copy_from_slice(key));

        put_length_prefixed(&mut self.data_block, key);
        put_length_prefixed(&mut self.data_block, stored_value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;

        if self.data_block.len() >= self.block_size {
            self.flush_block()?;
        }

        Ok(())
    }

    /// Flush the block under construction and record its index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }

        let first_key = self
            .first_key_in_block
            .take()
            .expect("non-empty block without a first key");

        self.index_entries.push(IndexEntry {
            first_key,
            block_offset: self.offset,
            block_size: self.data_block.len() as u64,
        });

        self.writer.write_all(&self.data_block)?;
        self.offset += self.data_block.len() as u64;
        self.data_block.clear();

        Ok(())
    }

    /// Abandon the build and remove the partial file.
    pub fn abandon(mut self) {
        self.finished = true;
        let _ = std::fs::remove_file(&self.path);
        debug!(table = %self.path.display(), "abandoned partial table");
    }

    /// Flush the final block, then write the index, bloom filter and
    /// footer, and sync the file.
    pub fn finish(mut self) -> Result<TableInfo> {
        self.flush_block()?;

        // Index block.
        let index_offset = self.offset;
        let mut index_data = BytesMut::new();
        index_data.put_u32_le(self.index_entries.len() as u32);
        for entry in &self.index_entries {
            entry.encode_to(&mut index_data);
        }
        self.writer.write_all(&index_data)?;
        self.offset += index_data.len() as u64;

        // Bloom block.
        let bloom_offset = self.offset;
        if let Some(ref filter) = self.filter_builder {
            let bloom_data = filter.finish();
            self.writer.write_all(&bloom_data)?;
            self.offset += bloom_data.len() as u64;
        }

        // Footer.
        let footer = Footer {
            data_offset: 0,
            data_size: index_offset,
            index_offset,
            index_size: bloom_offset - index_offset,
            bloom_offset,
            bloom_size: self.offset - bloom_offset,
            entry_count: self.entry_count,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += FOOTER_SIZE as u64;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.finished = true;

        debug!(
            table = %self.path.display(),
            entries = self.entry_count,
            bytes = self.offset,
            "finished table"
        );

        Ok(TableInfo {
            file_number: self.file_number,
            file_size: self.offset,
            entry_count: self.entry_count,
            smallest_key: self.smallest_key.take(),
            largest_key: self.largest_key.take(),
        })
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if !self.finished {
            // Abandon: the partial file must not survive.
            let _ = std::fs::remove_file(&self.path);
            debug!(table = %self.path.display(), "abandoned partial table");
        }
    }
}

/// Information about a completed table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// File number.
    pub file_number: u64,
    /// Total file size in bytes.
    pub file_size: u64,
    /// Number of entries.
    pub entry_count: u64,
    /// Smallest user key (if any entries).
    pub smallest_key: Option<Bytes>,
    /// Largest user key (if any entries).
    pub largest_key: Option<Bytes>,
}
