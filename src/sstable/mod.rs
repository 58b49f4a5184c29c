//! SSTable - sorted, immutable, self-describing on-disk files.
//!
//! # File layout (contiguous, in order)
//!
//! ```text
//! +------------------+
//! | Data Block 1     |  [key_len u32][user_key][value_len u32][stored_value] ...
//! +------------------+
//! | ...              |
//! +------------------+
//! | Data Block N     |
//! +------------------+
//! | Index Block      |  [num_entries u32] then per block:
//! |                  |  [first_key_len u32][first_key][offset u64][size u64]
//! +------------------+
//! | Bloom Block      |  [num_hashes u32][bit array]
//! +------------------+
//! | Footer (60 B)    |  seven u64 fields + u32 magic
//! +------------------+
//! ```
//!
//! Keys on disk are plain user keys; the stored value carries a one-byte
//! operation tag and the sequence number (`[op u8][sequence u64][value]`),
//! so tombstones are distinguishable from empty values and readers can
//! filter by snapshot. A user key may appear multiple times (one entry per
//! surviving version), newest first; collapsing versions is deferred to
//! compaction.

mod builder;
mod filter;
mod merge;
mod reader;

pub use builder::{TableBuilder, TableInfo};
pub use filter::{BloomFilter, BloomFilterBuilder};
pub use merge::merge_tables;
pub use reader::{TableIterator, TableReader};

use bytes::{BufMut, Bytes, BytesMut};

use crate::types::ValueType;
use crate::util::coding::{
    get_length_prefixed, get_u32_le, get_u64_le, put_length_prefixed, put_u64_le,
};
use crate::{Error, Result};

/// Footer magic number.
pub const TABLE_MAGIC: u32 = 0x4D59_4442;

/// Footer size: seven u64 fields plus the u32 magic.
pub const FOOTER_SIZE: usize = 60;

/// Size of the stored-value header: op byte plus sequence.
pub const VALUE_HEADER_SIZE: usize = 9;

/// Self-describing footer at the end of every table file.
#[derive(Debug, Clone, Default)]
pub struct Footer {
    /// Offset of the first data block (always zero today).
    pub data_offset: u64,
    /// Total bytes of data blocks.
    pub data_size: u64,
    /// Offset of the index block.
    pub index_offset: u64,
    /// Size of the index block.
    pub index_size: u64,
    /// Offset of the bloom block.
    pub bloom_offset: u64,
    /// Size of the bloom block (zero when absent).
    pub bloom_size: u64,
    /// Number of entries in the file.
    pub entry_count: u64,
}

impl Footer {
    /// Encode the footer to its fixed 60-byte representation.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FOOTER_SIZE);
        put_u64_le(&mut buf, self.data_offset);
        put_u64_le(&mut buf, self.data_size);
        put_u64_le(&mut buf, self.index_offset);
        put_u64_le(&mut buf, self.index_size);
        put_u64_le(&mut buf, self.bloom_offset);
        put_u64_le(&mut buf, self.bloom_size);
        put_u64_le(&mut buf, self.entry_count);
        buf.put_u32_le(TABLE_MAGIC);
        buf.freeze()
    }

    /// Decode a footer from its 60-byte representation.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FOOTER_SIZE {
            return Err(Error::corruption("footer too short"));
        }

        let data = &data[data.len() - FOOTER_SIZE..];
        let mut offset = 0;

        let footer = Self {
            data_offset: get_u64_le(data, &mut offset)?,
            data_size: get_u64_le(data, &mut offset)?,
            index_offset: get_u64_le(data, &mut offset)?,
            index_size: get_u64_le(data, &mut offset)?,
            bloom_offset: get_u64_le(data, &mut offset)?,
            bloom_size: get_u64_le(data, &mut offset)?,
            entry_count: get_u64_le(data, &mut offset)?,
        };

        let magic = get_u32_le(data, &mut offset)?;
        if magic != TABLE_MAGIC {
            return Err(Error::invalid_format(format!(
                "bad table magic {:#x}",
                magic
            )));
        }

        Ok(footer)
    }
}

/// Sparse index entry: the first key of a data block and its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// First user key in the block.
    pub first_key: Bytes,
    /// Byte offset of the block in the file.
    pub block_offset: u64,
    /// Size of the block in bytes.
    pub block_size: u64,
}

impl IndexEntry {
    /// Append the encoded entry.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        put_length_prefixed(buf, &self.first_key);
        put_u64_le(buf, self.block_offset);
        put_u64_le(buf, self.block_size);
    }

    /// Decode one entry at `offset`, advancing it.
    pub fn decode(data: &[u8], offset: &mut usize) -> Result<Self> {
        Ok(Self {
            first_key: get_length_prefixed(data, offset)?,
            block_offset: get_u64_le(data, offset)?,
            block_size: get_u64_le(data, offset)?,
        })
    }
}

/// A decoded stored value: operation tag, sequence, and the user value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    /// Operation type.
    pub value_type: ValueType,
    /// Sequence number of the mutation.
    pub sequence: u64,
    /// User value; empty for tombstones.
    pub value: Bytes,
}

impl StoredValue {
    /// Encode `[op][sequence][value]`.
    pub fn encode(value_type: ValueType, sequence: u64, value: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(VALUE_HEADER_SIZE + value.len());
        buf.put_u8(value_type.to_byte());
        buf.put_u64_le(sequence);
        buf.put_slice(value);
        buf.freeze()
    }

    /// Decode a stored value, sharing the underlying buffer.
    pub fn decode(data: &Bytes) -> Result<Self> {
        if data.len() < VALUE_HEADER_SIZE {
            return Err(Error::corruption("stored value too short"));
        }
        let value_type = ValueType::from_byte(data[0])
            .ok_or_else(|| Error::corruption("invalid op byte in stored value"))?;
        let sequence = u64::from_le_bytes(data[1..VALUE_HEADER_SIZE].try_into().unwrap());
        Ok(Self {
            value_type,
            sequence,
            value: data.slice(VALUE_HEADER_SIZE..),
        })
    }

    /// Decode only the sequence number.
    pub fn peek_sequence(data: &[u8]) -> Result<u64> {
        if data.len() < VALUE_HEADER_SIZE {
            return Err(Error::corruption("stored value too short"));
        }
        Ok(u64::from_le_bytes(data[1..VALUE_HEADER_SIZE].try_into().unwrap()))
    }
}

/// Parse a raw data block into `(user_key, stored_value)` pairs.
pub(crate) fn parse_block(data: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let key = get_length_prefixed(data, &mut offset)?;
        let value = get_length_prefixed(data, &mut offset)?;
        entries.push((key, value));
    }

    Ok(entries)
}
