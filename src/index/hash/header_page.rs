//! The hash index's header page: the bucket directory.
//!
//! Fixed at creation time — this index is a static bucket array, not
//! extendible hashing, so the directory never grows after `create`.

use crate::common::PageId;

#[derive(Debug, Clone)]
pub struct IndexHeaderPage {
    pub num_buckets: u32,
    pub block_page_ids: Vec<PageId>,
}

impl IndexHeaderPage {
    pub fn new(block_page_ids: Vec<PageId>) -> Self {
        Self {
            num_buckets: block_page_ids.len() as u32,
            block_page_ids,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let num_buckets = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let mut block_page_ids = Vec::with_capacity(num_buckets as usize);
        for i in 0..num_buckets as usize {
            let off = 4 + i * 4;
            let id = u32::from_le_bytes(data[off..off + 4].try_into().unwrap());
            block_page_ids.push(PageId::new(id));
        }
        Self {
            num_buckets,
            block_page_ids,
        }
    }

    pub fn write_to(&self, data: &mut [u8]) {
        data[0..4].copy_from_slice(&self.num_buckets.to_le_bytes());
        for (i, id) in self.block_page_ids.iter().enumerate() {
            let off = 4 + i * 4;
            data[off..off + 4].copy_from_slice(&id.0.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PAGE_SIZE;

    #[test]
    fn test_roundtrip() {
        let header = IndexHeaderPage::new(vec![PageId::new(1), PageId::new(2), PageId::new(3)]);
        let mut buf = vec![0u8; PAGE_SIZE];
        header.write_to(&mut buf);
        let recovered = IndexHeaderPage::from_bytes(&buf);
        assert_eq!(recovered.num_buckets, 3);
        assert_eq!(recovered.block_page_ids, header.block_page_ids);
    }
}
