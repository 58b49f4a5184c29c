//! Metadata describing one SSTable file.

use bytes::{Bytes, BytesMut};
use std::cmp::Ordering;

use crate::util::coding::{
    get_length_prefixed, get_u64_le, put_length_prefixed, put_u64_le,
};
use crate::Result;

/// Metadata about an SSTable registered in the manifest.
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Unique file number.
    file_number: u64,
    /// File size in bytes.
    file_size: u64,
    /// On-disk file name (basename).
    filename: String,
    /// Smallest user key in the file.
    smallest_key: Bytes,
    /// Largest user key in the file.
    largest_key: Bytes,
    /// Number of entries in the file.
    entry_count: u64,
}

impl FileMetadata {
    /// Create new file metadata.
    pub fn new(
        file_number: u64,
        file_size: u64,
        filename: String,
        smallest_key: Bytes,
        largest_key: Bytes,
        entry_count: u64,
    ) -> Self {
        Self {
            file_number,
            file_size,
            filename,
            smallest_key,
            largest_key,
            entry_count,
        }
    }

    /// Get the file number.
    pub fn file_number(&self) -> u64 {
        self.file_number
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the file name.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Get the smallest user key.
    pub fn smallest_key(&self) -> &Bytes {
        &self.smallest_key
    }

    /// Get the largest user key.
    pub fn largest_key(&self) -> &Bytes {
        &self.largest_key
    }

    /// Get the number of entries.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Check if the file's key range overlaps `[smallest, largest]`.
    pub fn overlaps(&self, smallest: &[u8], largest: &[u8]) -> bool {
        !(self.largest_key.as_ref() < smallest || self.smallest_key.as_ref() > largest)
    }

    /// Check if a user key falls inside this file's range.
    pub fn may_contain_key(&self, user_key: &[u8]) -> bool {
        user_key >= self.smallest_key.as_ref() && user_key <= self.largest_key.as_ref()
    }

    /// Append the manifest encoding of this file.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        put_u64_le(buf, self.file_number);
        put_u64_le(buf, self.file_size);
        put_length_prefixed(buf, self.filename.as_bytes());
        put_length_prefixed(buf, &self.smallest_key);
        put_length_prefixed(buf, &self.largest_key);
        put_u64_le(buf, self.entry_count);
    }

    /// Decode one file at `offset`, advancing it.
    pub fn decode(data: &[u8], offset: &mut usize) -> Result<Self> {
        let file_number = get_u64_le(data, offset)?;
        let file_size = get_u64_le(data, offset)?;
        let filename_bytes = get_length_prefixed(data, offset)?;
        let filename = String::from_utf8_lossy(&filename_bytes).into_owned();
        let smallest_key = get_length_prefixed(data, offset)?;
        let largest_key = get_length_prefixed(data, offset)?;
        let entry_count = get_u64_le(data, offset)?;

        Ok(Self {
            file_number,
            file_size,
            filename,
            smallest_key,
            largest_key,
            entry_count,
        })
    }
}

impl PartialEq for FileMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.file_number == other.file_number
    }
}

impl Eq for FileMetadata {}

impl PartialOrd for FileMetadata {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileMetadata {
    fn cmp(&self, other: &Self) -> Ordering {
        // By smallest key, then by file number for stability.
        match self.smallest_key.cmp(&other.smallest_key) {
            Ordering::Equal => self.file_number.cmp(&other.file_number),
            ord => ord,
        }
    }
}
