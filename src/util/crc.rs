//! CRC32 checksum utilities.
//!
//! IEEE 802.3 CRC32 (polynomial 0xEDB88320, init/final-xor 0xFFFFFFFF),
//! as computed by `crc32fast`.

use crc32fast::Hasher;

/// Compute CRC32 checksum of the given data.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Compute CRC32 checksum of multiple data slices.
pub fn crc32_multi(slices: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for slice in slices {
        hasher.update(slice);
    }
    hasher.finalize()
}

/// Verify that data matches the expected CRC.
pub fn verify_crc(data: &[u8], expected: u32) -> bool {
    crc32(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc32_data() {
        let data = b"hello world";
        let crc = crc32(data);
        assert_ne!(crc, 0);
        assert_eq!(crc32(data), crc);
    }

    #[test]
    fn test_crc32_known_value() {
        // IEEE 802.3 reference vector.
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn test_crc32_multi() {
        let crc1 = crc32(b"hello world");
        let crc2 = crc32_multi(&[b"hello ", b"world"]);
        assert_eq!(crc1, crc2);
    }

    #[test]
    fn test_verify_crc() {
        let data = b"test data";
        let crc = crc32(data);

        assert!(verify_crc(data, crc));
        assert!(!verify_crc(data, crc.wrapping_add(1)));
        assert!(!verify_crc(b"other data", crc));
    }

    #[test]
    fn test_crc32_single_byte_flip() {
        let mut data = b"some record payload".to_vec();
        let crc = crc32(&data);

        for i in 0..data.len() {
            data[i] ^= 0x01;
            assert!(!verify_crc(&data, crc), "flip at {} not detected", i);
            data[i] ^= 0x01;
        }
    }
}
