//! Page header: the metadata at the front of every slotted page.
//!
//! # Layout (24 bytes, little-endian)
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       4     page_id            (u32)
//! 4       4     lsn                (u32, low 32 bits of the page's Lsn)
//! 8       4     prev_page_id       (u32, or u32::MAX for "none")
//! 12      4     next_page_id       (u32, or u32::MAX for "none")
//! 16      4     free_space_pointer (u32, byte offset where tuple bodies start)
//! 20      4     tuple_count        (u32)
//! ```
//! followed by `tuple_count` x `{offset: u32, size: u32}` slot entries
//! growing from the header outward. Tuple bodies occupy the region ending
//! at `free_space_pointer` and growing downward from the checksum trailer;
//! `free_space_pointer` is the lowest byte offset currently in use by a
//! tuple body. The slot directory grows upward from `FIXED_SIZE`. A page
//! is full once the two regions meet.
//!
//! A CRC32 checksum is additionally stored in the last 4 bytes of the
//! page, alongside this header layout.

use crate::common::config::PAGE_SIZE;
use crate::common::PageId;

/// A single entry in a page's slot directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Byte offset of the tuple body within the page.
    pub offset: u32,
    /// Byte length of the tuple body. `0` means the slot is tombstoned —
    /// the RID remains valid but carries no live tuple.
    pub size: u32,
}

impl Slot {
    pub const ENCODED_SIZE: usize = 8;

    pub fn is_tombstoned(&self) -> bool {
        self.size == 0
    }
}

/// Metadata stored at the beginning of every slotted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    pub lsn: u32,
    pub prev_page_id: PageId,
    pub next_page_id: PageId,
    /// Lowest byte offset currently occupied by a tuple body. Tuple bodies
    /// grow downward from `OFFSET_CHECKSUM` toward this pointer.
    pub free_space_pointer: u32,
    pub slots: Vec<Slot>,
}

impl PageHeader {
    /// Fixed-size portion of the header, before the slot directory.
    pub const FIXED_SIZE: usize = 24;

    const OFFSET_PAGE_ID: usize = 0;
    const OFFSET_LSN: usize = 4;
    const OFFSET_PREV_PAGE_ID: usize = 8;
    const OFFSET_NEXT_PAGE_ID: usize = 12;
    const OFFSET_FREE_SPACE_POINTER: usize = 16;
    const OFFSET_TUPLE_COUNT: usize = 20;
    pub const OFFSET_SLOTS: usize = Self::FIXED_SIZE;

    /// Checksum lives in the last 4 bytes of the page.
    pub const OFFSET_CHECKSUM: usize = PAGE_SIZE - 4;

    /// A fresh, empty page header: no tuples yet, free space pointer at the
    /// end of the tuple-body region (just before the checksum trailer).
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            lsn: 0,
            prev_page_id: PageId::INVALID,
            next_page_id: PageId::INVALID,
            free_space_pointer: Self::OFFSET_CHECKSUM as u32,
            slots: Vec::new(),
        }
    }

    pub fn tuple_count(&self) -> usize {
        self.slots.len()
    }

    /// Bytes available between the end of the slot directory and the start
    /// of the tuple-body region.
    pub fn free_space(&self) -> usize {
        let slot_dir_end = Self::OFFSET_SLOTS + self.slots.len() * Slot::ENCODED_SIZE;
        (self.free_space_pointer as usize).saturating_sub(slot_dir_end)
    }

    /// Whether inserting a tuple of `size` bytes (plus its new slot entry)
    /// fits in the remaining free space.
    pub fn fits(&self, size: usize) -> bool {
        self.free_space() >= size + Slot::ENCODED_SIZE
    }

    /// Read a header from the beginning of a page-sized byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= PAGE_SIZE, "buffer too small for a page");

        let page_id = PageId::new(u32::from_le_bytes(
            data[Self::OFFSET_PAGE_ID..Self::OFFSET_PAGE_ID + 4]
                .try_into()
                .unwrap(),
        ));
        let lsn = u32::from_le_bytes(
            data[Self::OFFSET_LSN..Self::OFFSET_LSN + 4]
                .try_into()
                .unwrap(),
        );
        let prev_page_id = PageId::new(u32::from_le_bytes(
            data[Self::OFFSET_PREV_PAGE_ID..Self::OFFSET_PREV_PAGE_ID + 4]
                .try_into()
                .unwrap(),
        ));
        let next_page_id = PageId::new(u32::from_le_bytes(
            data[Self::OFFSET_NEXT_PAGE_ID..Self::OFFSET_NEXT_PAGE_ID + 4]
                .try_into()
                .unwrap(),
        ));
        let free_space_pointer = u32::from_le_bytes(
            data[Self::OFFSET_FREE_SPACE_POINTER..Self::OFFSET_FREE_SPACE_POINTER + 4]
                .try_into()
                .unwrap(),
        );
        let tuple_count = u32::from_le_bytes(
            data[Self::OFFSET_TUPLE_COUNT..Self::OFFSET_TUPLE_COUNT + 4]
                .try_into()
                .unwrap(),
        ) as usize;

        let mut slots = Vec::with_capacity(tuple_count);
        for i in 0..tuple_count {
            let base = Self::OFFSET_SLOTS + i * Slot::ENCODED_SIZE;
            let offset = u32::from_le_bytes(data[base..base + 4].try_into().unwrap());
            let size = u32::from_le_bytes(data[base + 4..base + 8].try_into().unwrap());
            slots.push(Slot { offset, size });
        }

        Self {
            page_id,
            lsn,
            prev_page_id,
            next_page_id,
            free_space_pointer,
            slots,
        }
    }

    /// Write this header (fixed fields + slot directory) to the beginning
    /// of a page-sized byte slice. Does not touch the tuple-body region or
    /// the checksum trailer.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= PAGE_SIZE, "buffer too small for a page");
        assert!(
            Self::OFFSET_SLOTS + self.slots.len() * Slot::ENCODED_SIZE
                <= self.free_space_pointer as usize,
            "slot directory would cross the free-space pointer"
        );

        data[Self::OFFSET_PAGE_ID..Self::OFFSET_PAGE_ID + 4]
            .copy_from_slice(&self.page_id.0.to_le_bytes());
        data[Self::OFFSET_LSN..Self::OFFSET_LSN + 4].copy_from_slice(&self.lsn.to_le_bytes());
        data[Self::OFFSET_PREV_PAGE_ID..Self::OFFSET_PREV_PAGE_ID + 4]
            .copy_from_slice(&self.prev_page_id.0.to_le_bytes());
        data[Self::OFFSET_NEXT_PAGE_ID..Self::OFFSET_NEXT_PAGE_ID + 4]
            .copy_from_slice(&self.next_page_id.0.to_le_bytes());
        data[Self::OFFSET_FREE_SPACE_POINTER..Self::OFFSET_FREE_SPACE_POINTER + 4]
            .copy_from_slice(&self.free_space_pointer.to_le_bytes());
        data[Self::OFFSET_TUPLE_COUNT..Self::OFFSET_TUPLE_COUNT + 4]
            .copy_from_slice(&(self.slots.len() as u32).to_le_bytes());

        for (i, slot) in self.slots.iter().enumerate() {
            let base = Self::OFFSET_SLOTS + i * Slot::ENCODED_SIZE;
            data[base..base + 4].copy_from_slice(&slot.offset.to_le_bytes());
            data[base + 4..base + 8].copy_from_slice(&slot.size.to_le_bytes());
        }
    }

    /// Compute the CRC32 checksum of a page, with the checksum trailer
    /// itself zeroed out so the checksum doesn't include itself.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut header = PageHeader::new(PageId::new(3));
        header.lsn = 7;
        header.prev_page_id = PageId::new(1);
        header.next_page_id = PageId::new(5);
        header.slots.push(Slot {
            offset: 4000,
            size: 96,
        });
        header.free_space_pointer = 4000;

        let mut buf = [0u8; PAGE_SIZE];
        header.write_to(&mut buf);
        let recovered = PageHeader::from_bytes(&buf);

        assert_eq!(header, recovered);
    }

    #[test]
    fn test_fresh_header_has_full_free_space() {
        let header = PageHeader::new(PageId::new(0));
        assert_eq!(header.tuple_count(), 0);
        assert!(header.fits(100));
    }

    #[test]
    fn test_tombstone_slot() {
        let slot = Slot {
            offset: 123,
            size: 0,
        };
        assert!(slot.is_tombstoned());
    }

    #[test]
    fn test_fits_accounts_for_new_slot_entry() {
        let mut header = PageHeader::new(PageId::new(0));
        header.free_space_pointer =
            PageHeader::OFFSET_SLOTS as u32 + Slot::ENCODED_SIZE as u32 + 10;
        assert!(header.fits(10));
        assert!(!header.fits(11));
    }

    #[test]
    fn test_checksum_changes_with_data() {
        let mut page1 = [0u8; PAGE_SIZE];
        let mut page2 = [0u8; PAGE_SIZE];
        page1[100] = 1;
        page2[100] = 2;
        assert_ne!(
            PageHeader::compute_checksum(&page1),
            PageHeader::compute_checksum(&page2)
        );
    }
}
