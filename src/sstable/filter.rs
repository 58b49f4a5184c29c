//! Bloom filter for SSTable key filtering.
//!
//! Probabilistic membership with no false negatives. Bits are set by
//! double hashing (`h1 + i * h2`) over a 32-bit murmur3 hash, so the
//! filter is stable across platforms.
//!
//! Serialized form: `[num_hashes u32 LE][bit array]`.

use bytes::{BufMut, Bytes, BytesMut};

/// Minimum filter size in bits.
const MIN_FILTER_BITS: usize = 64;

/// Immutable bloom filter loaded from a table file.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    /// The bit array.
    bits: Bytes,
    /// Number of hash probes.
    num_hashes: u32,
}

impl BloomFilter {
    /// Create a filter from its serialized form.
    pub fn from_bytes(data: Bytes) -> Option<Self> {
        if data.len() < 5 {
            return None;
        }

        let num_hashes = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if num_hashes == 0 || num_hashes > 30 {
            // Implausible probe count, probably corrupted.
            return None;
        }

        Some(Self {
            bits: data.slice(4..),
            num_hashes,
        })
    }

    /// Check if a key might be in the set.
    ///
    /// `false` means definitely absent; `true` may be a false positive.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let num_bits = self.bits.len() * 8;
        if num_bits == 0 {
            return false;
        }

        let (h1, h2) = double_hash(key);
        for i in 0..self.num_hashes {
            let bit_pos = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % num_bits;
            if self.bits[bit_pos / 8] & (1 << (bit_pos % 8)) == 0 {
                return false;
            }
        }

        true
    }

    /// Number of hash probes.
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }
}

/// Accumulates keys and builds the serialized filter.
pub struct BloomFilterBuilder {
    /// Bits per key.
    bits_per_key: usize,
    /// Number of hash probes.
    num_hashes: u32,
    /// Keys added so far.
    keys: Vec<Bytes>,
}

impl BloomFilterBuilder {
    /// Create a builder with the given bits-per-key budget.
    pub fn new(bits_per_key: usize) -> Self {
        // Optimal probe count: bits_per_key * ln 2, clamped to [1, 30].
        let num_hashes = ((bits_per_key as f64 * 0.693147).round() as u32).clamp(1, 30);

        Self {
            bits_per_key,
            num_hashes,
            keys: Vec::new(),
        }
    }

    /// Add a key. Duplicates are harmless.
    pub fn add(&mut self, key: &[u8]) {
        self.keys.push(Bytes::copy_from_slice(key));
    }

    /// Get the number of keys added.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if the builder is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Build the serialized filter.
    pub fn finish(&self) -> Bytes {
        if self.keys.is_empty() {
            return Bytes::new();
        }

        // Round the bit count up to a whole byte, floor at the minimum.
        let mut num_bits = self.keys.len() * self.bits_per_key;
        if num_bits < MIN_FILTER_BITS {
            num_bits = MIN_FILTER_BITS;
        }
        let num_bytes = (num_bits + 7) / 8;
        let num_bits = num_bytes * 8;

        let mut bits = vec![0u8; num_bytes];
        for key in &self.keys {
            let (h1, h2) = double_hash(key);
            for i in 0..self.num_hashes {
                let bit_pos = (h1.wrapping_add(i.wrapping_mul(h2)) as usize) % num_bits;
                bits[bit_pos / 8] |= 1 << (bit_pos % 8);
            }
        }

        let mut out = BytesMut::with_capacity(4 + num_bytes);
        out.put_u32_le(self.num_hashes);
        out.put_slice(&bits);
        out.freeze()
    }
}

/// Two independent 32-bit hashes for double hashing.
fn double_hash(key: &[u8]) -> (u32, u32) {
    let h1 = murmur3_32(key, 0);
    let h2 = murmur3_32(key, h1);
    (h1, h2)
}

/// murmur3 x86 32-bit.
fn murmur3_32(key: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let mut chunks = key.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes(chunk.try_into().unwrap());
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13);
        h1 = h1.wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k1 |= (b as u32) << (i * 8);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= key.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;

    h1
}
