//! `TableHeap`: a linked list of slotted pages holding one table's tuples.
//!
//! Insertion always appends to the tail page, allocating and linking a
//! fresh page when the tail is full. Every mutation is logged before it is
//! applied to the page (the write-ahead rule), and records an [`UndoRecord`]
//! on the caller's transaction so abort can reverse it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::buffer::BufferPoolManager;
use crate::catalog::TableOid;
use crate::common::{Error, Lsn, PageId, Result, Rid};
use crate::lock::LockManager;
use crate::log::{LogManager, LogRecord};
use crate::storage::page::Page;
use crate::table::iterator::TupleIterator;
use crate::transaction::{IsolationLevel, Transaction, UndoRecord};

/// A table's physical storage: a page chain plus the manager handles
/// needed to lock, log, and page-fault its way through reads and writes.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    table_oid: TableOid,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Format a brand-new single-page heap.
    pub fn create(
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
        table_oid: TableOid,
    ) -> Result<Self> {
        let first_page_id = bpm.new_page()?.page_id();
        Ok(Self {
            bpm,
            log_manager,
            lock_manager,
            table_oid,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    /// Reopen an existing heap given its first page id, walking the chain
    /// to find the current tail (used by catalog reload and recovery).
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
        table_oid: TableOid,
        first_page_id: PageId,
    ) -> Result<Self> {
        let mut current = first_page_id;
        loop {
            let next = bpm.fetch_page_read(current)?.header().next_page_id;
            if next.is_valid() {
                current = next;
            } else {
                break;
            }
        }
        Ok(Self {
            bpm,
            log_manager,
            lock_manager,
            table_oid,
            first_page_id,
            last_page_id: Mutex::new(current),
        })
    }

    pub fn table_oid(&self) -> TableOid {
        self.table_oid
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    fn stamp_lsn(page: &mut Page, lsn: Lsn) {
        let mut header = page.header();
        header.lsn = lsn.0 as u32;
        page.set_header(&header);
        page.update_checksum();
    }

    /// Take an S lock unless the transaction is running read-uncommitted,
    /// which never acquires read locks.
    fn maybe_lock_shared(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        if txn.isolation() == IsolationLevel::ReadUncommitted {
            return Ok(());
        }
        self.lock_manager.lock_shared(txn, rid)
    }

    /// Insert `bytes` as a new tuple, appending a page to the chain if the
    /// tail is full. Returns the assigned RID.
    pub fn insert_tuple(&self, bytes: &[u8], txn: &mut Transaction) -> Result<Rid> {
        let mut last = self.last_page_id.lock();
        let mut guard = self.bpm.fetch_page_write(*last)?;

        if !guard.has_room_for(bytes.len()) {
            drop(guard);
            self.append_page(&mut last, txn)?;
            guard = self.bpm.fetch_page_write(*last)?;
        }

        // The slot this insert will occupy is the page's current tuple
        // count — we hold the only write guard on this page, so nothing
        // else can race the allocation between here and `insert_tuple`.
        let rid = Rid::new(guard.page_id(), guard.tuple_count() as u16);

        self.lock_manager.lock_exclusive(txn, rid)?;

        let txn_id = txn.txn_id();
        let prev_lsn = txn.prev_lsn();
        let tuple = bytes.to_vec();
        let lsn = self.log_manager.append_record(|lsn| LogRecord::Insert {
            lsn,
            prev_lsn,
            txn_id,
            rid,
            tuple,
        })?;
        txn.set_prev_lsn(lsn);

        guard.insert_tuple(bytes)?;
        Self::stamp_lsn(&mut guard, lsn);
        drop(guard);

        txn.record_write(UndoRecord::Insert {
            table_oid: self.table_oid,
            rid,
        });
        trace!(txn = txn_id.0, rid = %rid, "tuple inserted");
        Ok(rid)
    }

    /// Allocate a new tail page and link it after `*last`. Logged with
    /// `NewPage` before the forward link makes the page reachable from the
    /// chain, per the write-ahead rule.
    fn append_page(&self, last: &mut PageId, txn: &mut Transaction) -> Result<()> {
        let new_page_id = self.bpm.new_page()?.page_id();

        let txn_id = txn.txn_id();
        let prev_lsn = txn.prev_lsn();
        let old_last = *last;
        let lsn = self.log_manager.append_record(|lsn| LogRecord::NewPage {
            lsn,
            prev_lsn,
            txn_id,
            page_id: new_page_id,
            prev_page_id: old_last,
        })?;
        txn.set_prev_lsn(lsn);

        {
            let mut old_guard = self.bpm.fetch_page_write(old_last)?;
            let mut header = old_guard.header();
            header.next_page_id = new_page_id;
            header.lsn = lsn.0 as u32;
            old_guard.set_header(&header);
            old_guard.update_checksum();
        }
        {
            let mut new_guard = self.bpm.fetch_page_write(new_page_id)?;
            let mut header = new_guard.header();
            header.prev_page_id = old_last;
            header.lsn = lsn.0 as u32;
            new_guard.set_header(&header);
            new_guard.update_checksum();
        }

        *last = new_page_id;
        Ok(())
    }

    /// Fetch the tuple at `rid`, or `None` if it has been deleted.
    pub fn get_tuple(&self, rid: Rid, txn: &mut Transaction) -> Result<Option<Vec<u8>>> {
        self.maybe_lock_shared(txn, rid)?;
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        Ok(guard.get_tuple(rid.slot).map(|b| b.to_vec()))
    }

    /// Tombstone the tuple at `rid`.
    pub fn delete_tuple(&self, rid: Rid, txn: &mut Transaction) -> Result<()> {
        self.lock_manager.lock_exclusive(txn, rid)?;
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        let old_bytes = guard
            .get_tuple(rid.slot)
            .ok_or_else(|| Error::rid_not_found(rid))?
            .to_vec();
        let old_len = old_bytes.len() as u32;

        let txn_id = txn.txn_id();
        let prev_lsn = txn.prev_lsn();
        let lsn = self.log_manager.append_record(|lsn| LogRecord::Delete {
            lsn,
            prev_lsn,
            txn_id,
            rid,
            old_tuple: old_bytes.clone(),
        })?;
        txn.set_prev_lsn(lsn);

        guard.delete_tuple(rid.slot)?;
        Self::stamp_lsn(&mut guard, lsn);
        drop(guard);

        txn.record_write(UndoRecord::Delete {
            table_oid: self.table_oid,
            rid,
            old_len,
        });
        Ok(())
    }

    /// Update the tuple at `rid`. If `new_bytes` fits in the existing
    /// slot, it is overwritten in place; otherwise the old slot is
    /// tombstoned and the new bytes are inserted as a fresh tuple, and the
    /// returned RID differs from `rid`.
    pub fn update_tuple(
        &self,
        rid: Rid,
        new_bytes: &[u8],
        txn: &mut Transaction,
    ) -> Result<Rid> {
        self.lock_manager.lock_exclusive(txn, rid)?;
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        let old_len = guard
            .get_tuple(rid.slot)
            .ok_or_else(|| Error::rid_not_found(rid))?
            .len();
        drop(guard);

        if new_bytes.len() <= old_len {
            let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
            let old_bytes = guard
                .get_tuple(rid.slot)
                .ok_or_else(|| Error::rid_not_found(rid))?
                .to_vec();

            let txn_id = txn.txn_id();
            let prev_lsn = txn.prev_lsn();
            let new_tuple = new_bytes.to_vec();
            let lsn = self.log_manager.append_record(|lsn| LogRecord::Update {
                lsn,
                prev_lsn,
                txn_id,
                rid,
                old_tuple: old_bytes.clone(),
                new_tuple: new_tuple.clone(),
            })?;
            txn.set_prev_lsn(lsn);

            guard.overwrite_tuple(rid.slot, new_bytes)?;
            Self::stamp_lsn(&mut guard, lsn);
            drop(guard);

            txn.record_write(UndoRecord::UpdateInPlace {
                table_oid: self.table_oid,
                rid,
                old_tuple: old_bytes,
            });
            Ok(rid)
        } else {
            // Outgrows its slot: tombstone the old RID and insert fresh.
            // `delete_tuple`/`insert_tuple` each log and record their own
            // undo step, so undoing them in reverse order (as abort
            // always does) restores the original state without a
            // dedicated "moved update" log record.
            self.delete_tuple(rid, txn)?;
            self.insert_tuple(new_bytes, txn)
        }
    }

    /// A stable, snapshot-at-creation iterator over this heap's live
    /// tuples, in page/slot order.
    pub fn iter(&self) -> TupleIterator<'_> {
        TupleIterator::new(self)
    }

    pub(crate) fn bpm(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    // ------------------------------------------------------------------
    // Physical undo primitives, applied directly against the page without
    // going through the lock manager or the log — the caller (a live
    // abort, driven off the in-memory write-set) already holds the
    // exclusive lock that protected the original mutation, and doesn't
    // need a durability guarantee beyond the `Abort` record that follows.
    // Recovery's own undo pass (`crate::recovery`) replays from logged
    // images instead and writes compensation log records as it goes.
    // ------------------------------------------------------------------

    pub(crate) fn undo_insert_physical(&self, rid: Rid) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        guard.delete_tuple(rid.slot)
    }

    pub(crate) fn undo_delete_physical(&self, rid: Rid, old_len: u32) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        guard.restore_tombstone(rid.slot, old_len)
    }

    pub(crate) fn undo_update_in_place_physical(&self, rid: Rid, old_tuple: &[u8]) -> Result<()> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        guard.overwrite_tuple(rid.slot, old_tuple)
    }
}
