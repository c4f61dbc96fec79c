//! Page-resident static hash index.
//!
//! One header page holds the bucket directory (a fixed list of block page
//! ids, sized once at `create` time); each bucket is one [`IndexBlockPage`]
//! of [`BLOCK_CAPACITY`] slots. A key probes linearly from
//! `hash(key) % total_slots`, wrapping across bucket boundaries, until it
//! either finds a match, finds an unoccupied slot (end of the probe
//! chain), or wraps all the way back around (table full).

use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{Error, PageId, Result, Value};
use crate::index::hash::block_page::{IndexBlockPage, BLOCK_CAPACITY, KEY_WIDTH};
use crate::index::hash::header_page::IndexHeaderPage;
use crate::index::hash::key::encode_key;
use crate::index::hash::murmur::hash32;

/// Encode `key` for on-disk storage, rejecting an encoding too long to fit
/// a block page slot.
fn encode_key_checked(key: &Value) -> Result<Vec<u8>> {
    let encoded = encode_key(key);
    if encoded.len() > KEY_WIDTH {
        return Err(Error::KeyTooLong(encoded.len()));
    }
    Ok(encoded)
}

#[derive(Clone)]
pub struct HashIndex {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    num_buckets: u32,
}

impl HashIndex {
    /// Allocate a header page and `num_buckets` block pages, and persist
    /// the (now-fixed) directory.
    pub fn create(bpm: Arc<BufferPoolManager>, num_buckets: u32) -> Result<Self> {
        assert!(num_buckets > 0, "hash index needs at least one bucket");

        let mut block_page_ids = Vec::with_capacity(num_buckets as usize);
        for _ in 0..num_buckets {
            let mut guard = bpm.new_page()?;
            let block = IndexBlockPage::empty();
            block.write_to(guard.as_mut_slice());
            guard.update_checksum();
            block_page_ids.push(guard.page_id());
        }

        let mut header_guard = bpm.new_page()?;
        let header_page_id = header_guard.page_id();
        let header = IndexHeaderPage::new(block_page_ids);
        header.write_to(header_guard.as_mut_slice());
        header_guard.update_checksum();

        Ok(Self {
            bpm,
            header_page_id,
            num_buckets,
        })
    }

    /// Reopen an existing index from its header page.
    pub fn open(bpm: Arc<BufferPoolManager>, header_page_id: PageId) -> Result<Self> {
        let guard = bpm.fetch_page_read(header_page_id)?;
        let header = IndexHeaderPage::from_bytes(guard.as_slice());
        Ok(Self {
            bpm,
            header_page_id,
            num_buckets: header.num_buckets,
        })
    }

    pub fn header_page_id(&self) -> PageId {
        self.header_page_id
    }

    fn block_page_ids(&self) -> Result<Vec<PageId>> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(IndexHeaderPage::from_bytes(guard.as_slice()).block_page_ids)
    }

    fn total_slots(&self) -> u64 {
        self.num_buckets as u64 * BLOCK_CAPACITY as u64
    }

    /// Split a linear slot index into `(bucket, slot within bucket)`.
    fn locate(slot: u64) -> (usize, usize) {
        (
            (slot / BLOCK_CAPACITY as u64) as usize,
            (slot % BLOCK_CAPACITY as u64) as usize,
        )
    }

    pub fn insert(&self, key: &Value, value: u32) -> Result<()> {
        let encoded = encode_key_checked(key)?;
        let hash = hash32(&encoded);
        let total = self.total_slots();
        let start = (hash as u64) % total;
        let block_ids = self.block_page_ids()?;

        for probe in 0..total {
            let slot = (start + probe) % total;
            let (bucket, slot_in_bucket) = Self::locate(slot);
            let mut guard = self.bpm.fetch_page_write(block_ids[bucket])?;
            let mut block = IndexBlockPage::from_bytes(guard.as_slice());

            if block.is_occupied(slot_in_bucket) {
                if block.is_readable(slot_in_bucket)
                    && block.matches_key(slot_in_bucket, &encoded)
                    && block.value_at(slot_in_bucket) == value
                {
                    return Err(Error::DuplicateEntry);
                }
                continue;
            }

            block.insert_at(slot_in_bucket, &encoded, value);
            block.write_to(guard.as_mut_slice());
            guard.update_checksum();
            return Ok(());
        }

        Err(Error::IndexFull)
    }

    pub fn lookup(&self, key: &Value) -> Result<Vec<u32>> {
        let encoded = encode_key_checked(key)?;
        let hash = hash32(&encoded);
        let total = self.total_slots();
        let start = (hash as u64) % total;
        let block_ids = self.block_page_ids()?;

        let mut results = Vec::new();
        for probe in 0..total {
            let slot = (start + probe) % total;
            let (bucket, slot_in_bucket) = Self::locate(slot);
            let guard = self.bpm.fetch_page_read(block_ids[bucket])?;
            let block = IndexBlockPage::from_bytes(guard.as_slice());

            if !block.is_occupied(slot_in_bucket) {
                break;
            }
            if block.is_readable(slot_in_bucket) && block.matches_key(slot_in_bucket, &encoded) {
                results.push(block.value_at(slot_in_bucket));
            }
        }
        Ok(results)
    }

    pub fn remove(&self, key: &Value, value: u32) -> Result<()> {
        let encoded = encode_key_checked(key)?;
        let hash = hash32(&encoded);
        let total = self.total_slots();
        let start = (hash as u64) % total;
        let block_ids = self.block_page_ids()?;

        for probe in 0..total {
            let slot = (start + probe) % total;
            let (bucket, slot_in_bucket) = Self::locate(slot);
            let mut guard = self.bpm.fetch_page_write(block_ids[bucket])?;
            let mut block = IndexBlockPage::from_bytes(guard.as_slice());

            if !block.is_occupied(slot_in_bucket) {
                break;
            }
            if block.is_readable(slot_in_bucket)
                && block.matches_key(slot_in_bucket, &encoded)
                && block.value_at(slot_in_bucket) == value
            {
                block.remove_at(slot_in_bucket);
                block.write_to(guard.as_mut_slice());
                guard.update_checksum();
                return Ok(());
            }
        }
        Ok(())
    }
}
