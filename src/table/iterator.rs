//! Snapshot-at-creation scan over a table heap's live tuples.

use crate::common::{PageId, Rid};
use crate::table::heap::TableHeap;

/// Walks a table heap's page chain in order, yielding `(Rid, bytes)` for
/// every tuple live at the moment the iterator reached that page. A
/// tombstoned slot is skipped; a slot tombstoned *after* the iterator has
/// already copied the page's slot directory still yields the image it
/// captured — this is a snapshot, not a live cursor.
pub struct TupleIterator<'a> {
    heap: &'a TableHeap,
    next_page: Option<PageId>,
    /// The page the buffered tuples below came from.
    loaded_page: Option<PageId>,
    page_tuples: std::vec::IntoIter<(u16, Vec<u8>)>,
}

impl<'a> TupleIterator<'a> {
    pub(crate) fn new(heap: &'a TableHeap) -> Self {
        Self {
            heap,
            next_page: Some(heap.first_page_id()),
            loaded_page: None,
            page_tuples: Vec::new().into_iter(),
        }
    }

    /// Load the next non-empty page's live tuples into the buffer.
    /// Returns `false` once the chain is exhausted.
    fn load_next_page(&mut self) -> bool {
        while let Some(page_id) = self.next_page {
            let guard = match self.heap.bpm().fetch_page_read(page_id) {
                Ok(g) => g,
                Err(_) => {
                    self.next_page = None;
                    return false;
                }
            };
            let header = guard.header();
            let tuples: Vec<(u16, Vec<u8>)> = header
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| !slot.is_tombstoned())
                .map(|(idx, _)| {
                    let bytes = guard.get_tuple(idx as u16).expect("checked not tombstoned");
                    (idx as u16, bytes.to_vec())
                })
                .collect();
            self.next_page = if header.next_page_id.is_valid() {
                Some(header.next_page_id)
            } else {
                None
            };
            drop(guard);

            if !tuples.is_empty() {
                self.loaded_page = Some(page_id);
                self.page_tuples = tuples.into_iter();
                return true;
            }
            // page was entirely tombstoned; keep walking the chain
        }
        false
    }
}

impl<'a> Iterator for TupleIterator<'a> {
    type Item = (Rid, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((slot, bytes)) = self.page_tuples.next() {
                let page_id = self.loaded_page.expect("tuples only buffered after a page load");
                return Some((Rid::new(page_id, slot), bytes));
            }
            if !self.load_next_page() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPoolManager;
    use crate::lock::{DeadlockStrategy, LockManager};
    use crate::log::LogManager;
    use crate::storage::{DiskStore, InMemoryDisk};
    use crate::transaction::{IsolationLevel, Transaction};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_heap() -> TableHeap {
        let disk: Arc<Mutex<Box<dyn DiskStore>>> =
            Arc::new(Mutex::new(Box::new(InMemoryDisk::new())));
        let bpm = Arc::new(BufferPoolManager::new(16, Arc::clone(&disk)));
        let log_manager = LogManager::new(Arc::clone(&disk), Duration::from_millis(20));
        let lock_manager = Arc::new(LockManager::new(DeadlockStrategy::WoundWait));
        TableHeap::create(bpm, log_manager, lock_manager, 1).unwrap()
    }

    #[test]
    fn test_iterate_skips_tombstones() {
        let heap = test_heap();
        let mut txn = Transaction::new(crate::common::TxnId::new(1), IsolationLevel::ReadCommitted);
        let r1 = heap.insert_tuple(b"keep-1", &mut txn).unwrap();
        let r2 = heap.insert_tuple(b"gone", &mut txn).unwrap();
        let r3 = heap.insert_tuple(b"keep-2", &mut txn).unwrap();
        heap.delete_tuple(r2, &mut txn).unwrap();

        let seen: Vec<(Rid, Vec<u8>)> = heap.iter().collect();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (r1, b"keep-1".to_vec()));
        assert_eq!(seen[1], (r3, b"keep-2".to_vec()));
    }

    #[test]
    fn test_iterate_across_pages() {
        let heap = test_heap();
        let mut txn = Transaction::new(crate::common::TxnId::new(1), IsolationLevel::ReadCommitted);
        let chunk = vec![0x11_u8; 500];
        for _ in 0..20 {
            heap.insert_tuple(&chunk, &mut txn).unwrap();
        }
        let count = heap.iter().count();
        assert_eq!(count, 20);
    }

    #[test]
    fn test_empty_heap_iterates_nothing() {
        let heap = test_heap();
        assert_eq!(heap.iter().count(), 0);
    }
}
