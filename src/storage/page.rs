//! Slotted page layout.
//!
//! ```text
//! +------------------+
//! |   Page Header    |  24 bytes
//! +------------------+
//! |   Slot Array     |  grows upward from the header
//! |        |         |
//! |        v         |
//! |   Free Space     |
//! |        ^         |
//! |        |         |
//! |   Record Data    |  grows downward from the page tail
//! +------------------+
//! ```
//!
//! Header fields (little-endian): `page_id u32, lsn u64, tuple_count u16,
//! free_space_pointer u16, slot_array_end u16, checksum u32`, two bytes
//! reserved. Slot entries are `offset u16, length u16, flags u16` with
//! bit 0 of the flags marking validity. The slot array and record data
//! must never overlap.
//!
//! Pin count and dirty flag are in-memory only and never hit disk.

use crate::util::crc::crc32_multi;

use super::PageId;

/// Fixed page size.
pub const PAGE_SIZE: usize = 4096;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = PageId::MAX;

const HEADER_SIZE: usize = 24;
const SLOT_SIZE: usize = 6;

// Header field offsets.
const OFF_PAGE_ID: usize = 0;
const OFF_LSN: usize = 4;
const OFF_TUPLE_COUNT: usize = 12;
const OFF_FREE_SPACE_PTR: usize = 14;
const OFF_SLOT_ARRAY_END: usize = 16;
const OFF_CHECKSUM: usize = 18;
const CHECKSUM_END: usize = OFF_CHECKSUM + 4;

const SLOT_VALID: u16 = 0x1;

/// An in-memory database page with slotted-record layout.
#[derive(Debug)]
pub struct Page {
    /// Raw page bytes as stored on disk.
    data: Box<[u8; PAGE_SIZE]>,
    /// Number of callers currently using this page.
    pin_count: u32,
    /// Whether the in-memory copy differs from disk.
    is_dirty: bool,
}

impl Page {
    /// Create an empty page.
    pub fn new() -> Self {
        let mut page = Self {
            data: Box::new([0u8; PAGE_SIZE]),
            pin_count: 0,
            is_dirty: false,
        };
        page.reset();
        page
    }

    /// Raw page bytes.
    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Mutable raw page bytes (used when loading from disk).
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    /// Get the page ID stored in the header.
    pub fn page_id(&self) -> PageId {
        self.read_u32(OFF_PAGE_ID)
    }

    /// Set the page ID in the header.
    pub fn set_page_id(&mut self, page_id: PageId) {
        self.write_u32(OFF_PAGE_ID, page_id);
    }

    /// Get the log sequence number.
    pub fn lsn(&self) -> u64 {
        u64::from_le_bytes(self.data[OFF_LSN..OFF_LSN + 8].try_into().unwrap())
    }

    /// Set the log sequence number.
    pub fn set_lsn(&mut self, lsn: u64) {
        self.data[OFF_LSN..OFF_LSN + 8].copy_from_slice(&lsn.to_le_bytes());
    }

    /// Number of slots (valid or deleted) in this page.
    pub fn tuple_count(&self) -> u16 {
        self.read_u16(OFF_TUPLE_COUNT)
    }

    /// Current pin count.
    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    /// Increment the pin count.
    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Decrement the pin count, flooring at zero.
    pub fn unpin(&mut self) {
        if self.pin_count > 0 {
            self.pin_count -= 1;
        }
    }

    /// Whether the page has unwritten changes.
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Set or clear the dirty flag.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    /// Bytes available for one more record and its slot.
    pub fn free_space(&self) -> usize {
        let free_space_ptr = self.read_u16(OFF_FREE_SPACE_PTR) as usize;
        let slot_array_end = self.read_u16(OFF_SLOT_ARRAY_END) as usize;
        free_space_ptr.saturating_sub(slot_array_end)
    }

    /// Insert a record. Returns the slot index, or `None` when the page
    /// cannot fit the record plus its slot.
    pub fn insert(&mut self, record: &[u8]) -> Option<u16> {
        if record.len() + SLOT_SIZE > self.free_space() {
            return None;
        }

        let free_space_ptr = self.read_u16(OFF_FREE_SPACE_PTR) as usize;
        let tuple_count = self.tuple_count();

        // Record data grows down from the tail.
        let record_offset = free_space_ptr - record.len();
        self.data[record_offset..free_space_ptr].copy_from_slice(record);

        // Slot array grows up from the header.
        let slot_offset = HEADER_SIZE + tuple_count as usize * SLOT_SIZE;
        self.write_u16(slot_offset, record_offset as u16);
        self.write_u16(slot_offset + 2, record.len() as u16);
        self.write_u16(slot_offset + 4, SLOT_VALID);

        self.write_u16(OFF_FREE_SPACE_PTR, record_offset as u16);
        self.write_u16(OFF_TUPLE_COUNT, tuple_count + 1);
        self.write_u16(
            OFF_SLOT_ARRAY_END,
            (slot_offset + SLOT_SIZE) as u16,
        );

        self.is_dirty = true;
        Some(tuple_count)
    }

    /// Get the record at `slot_index`, if the slot is valid.
    pub fn get(&self, slot_index: u16) -> Option<&[u8]> {
        if slot_index >= self.tuple_count() {
            return None;
        }

        let slot_offset = HEADER_SIZE + slot_index as usize * SLOT_SIZE;
        let flags = self.read_u16(slot_offset + 4);
        if flags & SLOT_VALID == 0 {
            return None;
        }

        let record_offset = self.read_u16(slot_offset) as usize;
        let length = self.read_u16(slot_offset + 2) as usize;
        Some(&self.data[record_offset..record_offset + length])
    }

    /// Mark the slot invalid. Space is not reclaimed.
    pub fn delete(&mut self, slot_index: u16) -> bool {
        if slot_index >= self.tuple_count() {
            return false;
        }

        let slot_offset = HEADER_SIZE + slot_index as usize * SLOT_SIZE;
        let flags = self.read_u16(slot_offset + 4);
        if flags & SLOT_VALID == 0 {
            return false;
        }

        self.write_u16(slot_offset + 4, flags & !SLOT_VALID);
        self.is_dirty = true;
        true
    }

    /// Zero the buffer and reinitialize the header.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.write_u32(OFF_PAGE_ID, INVALID_PAGE_ID);
        self.write_u16(OFF_FREE_SPACE_PTR, PAGE_SIZE as u16);
        self.write_u16(OFF_SLOT_ARRAY_END, HEADER_SIZE as u16);
        self.pin_count = 0;
        self.is_dirty = false;
    }

    /// Recompute and store the header checksum.
    pub fn update_checksum(&mut self) {
        let crc = self.compute_checksum();
        self.write_u32(OFF_CHECKSUM, crc);
    }

    /// Verify the stored checksum. A zero checksum (never written) passes.
    pub fn verify_checksum(&self) -> bool {
        let stored = self.read_u32(OFF_CHECKSUM);
        stored == 0 || stored == self.compute_checksum()
    }

    fn compute_checksum(&self) -> u32 {
        // Everything except the checksum field itself.
        crc32_multi(&[&self.data[..OFF_CHECKSUM], &self.data[CHECKSUM_END..]])
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.data[offset..offset + 2].try_into().unwrap())
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.data[offset..offset + 4].try_into().unwrap())
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_initial_state() {
        let page = Page::new();
        assert_eq!(page.page_id(), INVALID_PAGE_ID);
        assert_eq!(page.tuple_count(), 0);
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());
        assert_eq!(page.free_space(), PAGE_SIZE - HEADER_SIZE);
    }

    #[test]
    fn test_page_insert_get() {
        let mut page = Page::new();

        let slot = page.insert(b"hello").unwrap();
        assert_eq!(slot, 0);
        assert_eq!(page.get(0), Some(b"hello".as_slice()));
        assert!(page.is_dirty());

        let slot = page.insert(b"world!").unwrap();
        assert_eq!(slot, 1);
        assert_eq!(page.get(1), Some(b"world!".as_slice()));
        assert_eq!(page.tuple_count(), 2);

        // First record still intact.
        assert_eq!(page.get(0), Some(b"hello".as_slice()));
    }

    #[test]
    fn test_page_records_grow_from_tail() {
        let mut page = Page::new();
        page.insert(b"aaaa").unwrap();
        page.insert(b"bb").unwrap();

        // Later records sit at lower offsets.
        let first = page.get(0).unwrap().as_ptr() as usize;
        let second = page.get(1).unwrap().as_ptr() as usize;
        assert!(second < first);
    }

    #[test]
    fn test_page_delete() {
        let mut page = Page::new();
        page.insert(b"hello").unwrap();

        assert!(page.delete(0));
        assert_eq!(page.get(0), None);
        // Double delete fails.
        assert!(!page.delete(0));
        // Slot count unchanged; space not reclaimed.
        assert_eq!(page.tuple_count(), 1);
    }

    #[test]
    fn test_page_get_out_of_range() {
        let page = Page::new();
        assert_eq!(page.get(0), None);
        assert_eq!(page.get(100), None);
    }

    #[test]
    fn test_page_full() {
        let mut page = Page::new();

        let record = vec![0xAB; 1000];
        let mut inserted = 0;
        while page.insert(&record).is_some() {
            inserted += 1;
        }

        // 4 KiB minus header fits four 1000-byte records plus slots.
        assert_eq!(inserted, 4);
        assert!(page.free_space() < record.len() + SLOT_SIZE);

        // A small record still fits in the remainder.
        assert!(page.insert(b"x").is_some());
    }

    #[test]
    fn test_page_slot_data_never_overlap() {
        let mut page = Page::new();

        while page.insert(&[7u8; 100]).is_some() {}

        let slot_array_end = page.read_u16(OFF_SLOT_ARRAY_END) as usize;
        let free_space_ptr = page.read_u16(OFF_FREE_SPACE_PTR) as usize;
        assert!(slot_array_end <= free_space_ptr);
    }

    #[test]
    fn test_page_reset() {
        let mut page = Page::new();
        page.insert(b"data").unwrap();
        page.set_page_id(42);
        page.set_lsn(7);
        page.pin();

        page.reset();
        assert_eq!(page.page_id(), INVALID_PAGE_ID);
        assert_eq!(page.lsn(), 0);
        assert_eq!(page.tuple_count(), 0);
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());
        assert_eq!(page.get(0), None);
    }

    #[test]
    fn test_page_pin_unpin() {
        let mut page = Page::new();
        page.pin();
        page.pin();
        assert_eq!(page.pin_count(), 2);
        page.unpin();
        page.unpin();
        assert_eq!(page.pin_count(), 0);
        // Floor at zero.
        page.unpin();
        assert_eq!(page.pin_count(), 0);
    }

    #[test]
    fn test_page_checksum() {
        let mut page = Page::new();
        page.set_page_id(1);
        page.insert(b"payload").unwrap();
        page.update_checksum();
        assert!(page.verify_checksum());

        // Corrupt a data byte.
        page.data_mut()[PAGE_SIZE - 1] ^= 0xFF;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_page_header_roundtrip_through_bytes() {
        let mut page = Page::new();
        page.set_page_id(99);
        page.set_lsn(12345);
        page.insert(b"persisted").unwrap();
        page.update_checksum();

        // Simulate a disk roundtrip.
        let mut other = Page::new();
        other.data_mut().copy_from_slice(page.data());

        assert_eq!(other.page_id(), 99);
        assert_eq!(other.lsn(), 12345);
        assert_eq!(other.get(0), Some(b"persisted".as_slice()));
        assert!(other.verify_checksum());
        // In-memory state does not travel with the bytes.
        assert_eq!(other.pin_count(), 0);
        assert!(!other.is_dirty());
    }
}
