//! Fixed-width little-endian encoding helpers.
//!
//! All on-disk formats in this crate use fixed-width little-endian
//! integers and length-prefixed byte strings; these helpers centralize the
//! bounds checking that decoding requires.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Append a u32 in little-endian order.
pub fn put_u32_le(buf: &mut BytesMut, v: u32) {
    buf.put_u32_le(v);
}

/// Append a u64 in little-endian order.
pub fn put_u64_le(buf: &mut BytesMut, v: u64) {
    buf.put_u64_le(v);
}

/// Append a `[len u32][bytes]` length-prefixed slice.
pub fn put_length_prefixed(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

/// Read a u32 at `offset`, advancing it.
pub fn get_u32_le(data: &[u8], offset: &mut usize) -> Result<u32> {
    let end = offset
        .checked_add(4)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| Error::corruption("truncated u32"))?;
    let v = u32::from_le_bytes(data[*offset..end].try_into().unwrap());
    *offset = end;
    Ok(v)
}

/// Read a u64 at `offset`, advancing it.
pub fn get_u64_le(data: &[u8], offset: &mut usize) -> Result<u64> {
    let end = offset
        .checked_add(8)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| Error::corruption("truncated u64"))?;
    let v = u64::from_le_bytes(data[*offset..end].try_into().unwrap());
    *offset = end;
    Ok(v)
}

/// Read a `[len u32][bytes]` length-prefixed slice at `offset`, advancing it.
pub fn get_length_prefixed(data: &[u8], offset: &mut usize) -> Result<Bytes> {
    let len = get_u32_le(data, offset)? as usize;
    let end = offset
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| Error::corruption("truncated length-prefixed slice"))?;
    let out = Bytes::copy_from_slice(&data[*offset..end]);
    *offset = end;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_roundtrip() {
        let mut buf = BytesMut::new();
        put_u32_le(&mut buf, 0xDEAD_BEEF);

        let mut offset = 0;
        assert_eq!(get_u32_le(&buf, &mut offset).unwrap(), 0xDEAD_BEEF);
        assert_eq!(offset, 4);
    }

    #[test]
    fn test_u64_roundtrip() {
        let mut buf = BytesMut::new();
        put_u64_le(&mut buf, u64::MAX - 7);

        let mut offset = 0;
        assert_eq!(get_u64_le(&buf, &mut offset).unwrap(), u64::MAX - 7);
    }

    #[test]
    fn test_length_prefixed_roundtrip() {
        let mut buf = BytesMut::new();
        put_length_prefixed(&mut buf, b"hello");
        put_length_prefixed(&mut buf, b"");
        put_length_prefixed(&mut buf, b"world");

        let mut offset = 0;
        assert_eq!(get_length_prefixed(&buf, &mut offset).unwrap(), "hello");
        assert_eq!(get_length_prefixed(&buf, &mut offset).unwrap(), "");
        assert_eq!(get_length_prefixed(&buf, &mut offset).unwrap(), "world");
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_truncated_reads() {
        let mut offset = 0;
        assert!(get_u32_le(&[1, 2], &mut offset).is_err());

        let mut buf = BytesMut::new();
        put_u32_le(&mut buf, 100);
        buf.put_slice(b"short");

        let mut offset = 0;
        assert!(get_length_prefixed(&buf, &mut offset).is_err());
    }
}
