//! Crash recovery: ARIES-style Analysis, Redo, Undo.
//!
//! Runs once, before the catalog opens, over whatever the log already
//! contains: a single forward scan reconstructs which transactions never
//! reached a terminal record (Analysis), every logged page mutation is
//! replayed if the page doesn't already reflect it (Redo), and every
//! transaction left active after Redo is rolled back by walking its
//! `prev_lsn` chain backward, emitting compensation log records as it goes
//! (Undo). `Catalog::recover_from_root_page` runs after this and rebuilds
//! every index from the now-consistent heaps, since index mutations are
//! never write-ahead logged.
//!
//! Grounded in the advent-calendar `day20` recovery manager's
//! Analysis/Redo/Undo shape, adapted from its MVCC xmax-based delete
//! semantics to this crate's tombstone-based ones, and simplified: because
//! `DiskManager::allocate_page` allocates and `fsync`s synchronously, any
//! page a log record names is already physically present on disk, so Redo
//! never needs to grow the file to catch up before writing to a page.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::buffer::{BufferPoolManager, PageWriteGuard};
use crate::common::{Lsn, PageId, Result, Rid, TxnId};
use crate::log::{LogManager, LogRecord};
use crate::storage::DiskStore;

/// Counts produced by one recovery run, surfaced for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub records_scanned: usize,
    pub redone: usize,
    pub transactions_undone: usize,
    pub last_lsn: Lsn,
}

/// The result of [`RecoveryManager::recover`]: the summary, plus the log
/// manager the caller must use from this point on. Its LSN generator has
/// been resumed past every LSN the scan (and the undo pass's own CLRs)
/// produced, so freshly appended records never collide with replayed ones.
pub struct RecoveryOutcome {
    pub summary: RecoverySummary,
    pub log_manager: Arc<LogManager>,
}

/// Per-transaction last-seen LSN and per-page earliest-dirtying LSN,
/// reconstructed by [`RecoveryManager::analyze`].
struct AnalysisResult {
    active_txns: HashMap<TxnId, Lsn>,
    max_lsn: Lsn,
}

pub struct RecoveryManager;

impl RecoveryManager {
    /// Run Analysis, Redo and Undo over whatever `disk` already holds.
    ///
    /// Takes `flush_interval` rather than an already-constructed
    /// `LogManager`: Analysis must read the log before we know the LSN a
    /// resumed log manager needs to start past, so this builds a
    /// throwaway reader first and the real, resumed `LogManager` only once
    /// that's known. The returned `log_manager` supersedes any the caller
    /// might otherwise have built.
    #[instrument(skip(disk, bpm))]
    pub fn recover(
        disk: Arc<Mutex<Box<dyn DiskStore>>>,
        bpm: Arc<BufferPoolManager>,
        flush_interval: Duration,
    ) -> Result<RecoveryOutcome> {
        let scratch = LogManager::new(Arc::clone(&disk), flush_interval);
        let records = scratch.read_all()?;
        info!(records = records.len(), "recovery: log scanned");

        let analysis = Self::analyze(&records);

        let redone = Self::redo(&bpm, &records)?;
        info!(redone, "recovery: redo pass complete");

        let log_manager = LogManager::resume_after(disk, flush_interval, analysis.max_lsn);
        let transactions_undone =
            Self::undo(&bpm, &log_manager, &records, analysis.active_txns)?;
        info!(transactions_undone, "recovery: undo pass complete");

        bpm.flush_all_pages()?;
        log_manager.flush_all()?;

        Ok(RecoveryOutcome {
            summary: RecoverySummary {
                records_scanned: records.len(),
                redone,
                transactions_undone,
                last_lsn: log_manager.flushed_lsn(),
            },
            log_manager,
        })
    }

    /// Flush every dirty page, then append a fuzzy checkpoint record
    /// summarizing still-active transactions. Called on orderly shutdown.
    ///
    /// Doesn't truncate the physical log file — `DiskStore` has no
    /// truncation primitive, and adding one earns nothing here, since
    /// Analysis already does a cheap full forward scan rather than
    /// restarting from a checkpoint's position. The dirty-page table is
    /// always empty in this checkpoint record: every page is clean by the
    /// time it's written, `flush_all_pages` having just run.
    pub fn checkpoint(
        bpm: &BufferPoolManager,
        log_manager: &Arc<LogManager>,
        active_txns: &[(TxnId, Lsn)],
    ) -> Result<Lsn> {
        bpm.flush_all_pages()?;
        let lsn = log_manager.append_record(|lsn| LogRecord::Checkpoint {
            lsn,
            active_txns: active_txns.to_vec(),
            dirty_page_table: Vec::new(),
        })?;
        log_manager.flush_up_to(lsn)?;
        Ok(lsn)
    }

    /// Single forward scan: which transactions never reached a `Commit`/
    /// `Abort` (Undo must roll them back) and the highest LSN seen overall
    /// (where a freshly resumed `LogManager` must continue from).
    fn analyze(records: &[LogRecord]) -> AnalysisResult {
        let mut active_txns = HashMap::new();
        let mut max_lsn = Lsn::INVALID;

        for record in records {
            max_lsn = max_lsn.max(record.lsn());

            match record {
                LogRecord::Begin { txn_id, lsn } => {
                    active_txns.insert(*txn_id, *lsn);
                }
                LogRecord::Commit { txn_id, .. } | LogRecord::Abort { txn_id, .. } => {
                    active_txns.remove(txn_id);
                }
                LogRecord::Insert { txn_id, lsn, .. }
                | LogRecord::Delete { txn_id, lsn, .. }
                | LogRecord::Update { txn_id, lsn, .. }
                | LogRecord::NewPage { txn_id, lsn, .. }
                | LogRecord::CompensationInsert { txn_id, lsn, .. }
                | LogRecord::CompensationDelete { txn_id, lsn, .. } => {
                    active_txns.insert(*txn_id, *lsn);
                }
                LogRecord::Checkpoint { active_txns: ckpt, .. } => {
                    for (txn_id, last_lsn) in ckpt {
                        active_txns.insert(*txn_id, *last_lsn);
                    }
                }
            }
        }

        AnalysisResult { active_txns, max_lsn }
    }

    /// Replay every mutation whose LSN exceeds the affected page's
    /// on-disk LSN. Safe to run more than once: a record already
    /// reflected on the page (`page_lsn >= record_lsn`) is skipped.
    fn redo(bpm: &BufferPoolManager, records: &[LogRecord]) -> Result<usize> {
        let mut redone = 0;

        for record in records {
            let lsn = record.lsn();
            match record {
                LogRecord::Insert { rid, tuple, .. } => {
                    if Self::should_redo(bpm, rid.page_id, lsn)? {
                        Self::redo_insert(bpm, *rid, tuple, lsn)?;
                        redone += 1;
                    }
                }
                LogRecord::Delete { rid, .. } => {
                    if Self::should_redo(bpm, rid.page_id, lsn)? {
                        Self::redo_tombstone(bpm, *rid, lsn)?;
                        redone += 1;
                    }
                }
                LogRecord::Update { rid, new_tuple, .. } => {
                    if Self::should_redo(bpm, rid.page_id, lsn)? {
                        Self::redo_overwrite(bpm, *rid, new_tuple, lsn)?;
                        redone += 1;
                    }
                }
                LogRecord::NewPage {
                    page_id,
                    prev_page_id,
                    ..
                } => {
                    if Self::should_redo(bpm, *page_id, lsn)? {
                        Self::redo_set_prev(bpm, *page_id, *prev_page_id, lsn)?;
                        redone += 1;
                    }
                    if prev_page_id.is_valid() && Self::should_redo(bpm, *prev_page_id, lsn)? {
                        Self::redo_set_next(bpm, *prev_page_id, *page_id, lsn)?;
                        redone += 1;
                    }
                }
                LogRecord::CompensationInsert { rid, tuple, .. } => {
                    if Self::should_redo(bpm, rid.page_id, lsn)? {
                        Self::redo_insert(bpm, *rid, tuple, lsn)?;
                        redone += 1;
                    }
                }
                LogRecord::CompensationDelete { rid, .. } => {
                    if Self::should_redo(bpm, rid.page_id, lsn)? {
                        Self::redo_tombstone(bpm, *rid, lsn)?;
                        redone += 1;
                    }
                }
                LogRecord::Begin { .. }
                | LogRecord::Commit { .. }
                | LogRecord::Abort { .. }
                | LogRecord::Checkpoint { .. } => {}
            }
        }

        Ok(redone)
    }

    fn should_redo(bpm: &BufferPoolManager, page_id: PageId, lsn: Lsn) -> Result<bool> {
        let guard = bpm.fetch_page_read(page_id)?;
        Ok((guard.header().lsn as u64) < lsn.0)
    }

    fn stamp(guard: &mut PageWriteGuard, lsn: Lsn) {
        let mut header = guard.header();
        header.lsn = lsn.0 as u32;
        guard.set_header(&header);
        guard.update_checksum();
    }

    /// Reapply an insert (or a CLR restoring a tuple's content): overwrite
    /// the slot if it already exists — covers both "insert replayed twice"
    /// and "this is really a compensation-insert reviving a tombstone" —
    /// otherwise append a fresh slot.
    fn redo_insert(bpm: &BufferPoolManager, rid: Rid, tuple: &[u8], lsn: Lsn) -> Result<()> {
        let mut guard = bpm.fetch_page_write(rid.page_id)?;
        if (rid.slot as usize) < guard.tuple_count() {
            guard.overwrite_tuple(rid.slot, tuple)?;
        } else {
            guard.insert_tuple(tuple)?;
        }
        Self::stamp(&mut guard, lsn);
        Ok(())
    }

    fn redo_tombstone(bpm: &BufferPoolManager, rid: Rid, lsn: Lsn) -> Result<()> {
        let mut guard = bpm.fetch_page_write(rid.page_id)?;
        guard.delete_tuple(rid.slot)?;
        Self::stamp(&mut guard, lsn);
        Ok(())
    }

    fn redo_overwrite(bpm: &BufferPoolManager, rid: Rid, new_tuple: &[u8], lsn: Lsn) -> Result<()> {
        let mut guard = bpm.fetch_page_write(rid.page_id)?;
        guard.overwrite_tuple(rid.slot, new_tuple)?;
        Self::stamp(&mut guard, lsn);
        Ok(())
    }

    fn redo_set_prev(bpm: &BufferPoolManager, page_id: PageId, prev_page_id: PageId, lsn: Lsn) -> Result<()> {
        let mut guard = bpm.fetch_page_write(page_id)?;
        let mut header = guard.header();
        header.prev_page_id = prev_page_id;
        guard.set_header(&header);
        Self::stamp(&mut guard, lsn);
        Ok(())
    }

    fn redo_set_next(bpm: &BufferPoolManager, page_id: PageId, next_page_id: PageId, lsn: Lsn) -> Result<()> {
        let mut guard = bpm.fetch_page_write(page_id)?;
        let mut header = guard.header();
        header.next_page_id = next_page_id;
        guard.set_header(&header);
        Self::stamp(&mut guard, lsn);
        Ok(())
    }

    /// Roll back every transaction Analysis found still active, each by
    /// walking its `prev_lsn` chain backward and applying the compensating
    /// action for every step, writing a CLR as it goes.
    fn undo(
        bpm: &BufferPoolManager,
        log_manager: &Arc<LogManager>,
        records: &[LogRecord],
        active_txns: HashMap<TxnId, Lsn>,
    ) -> Result<usize> {
        let by_lsn: HashMap<u64, &LogRecord> = records.iter().map(|r| (r.lsn().0, r)).collect();
        let mut undone = 0;

        for (txn_id, last_lsn) in active_txns {
            Self::undo_transaction(bpm, log_manager, &by_lsn, txn_id, last_lsn)?;
            undone += 1;
        }

        Ok(undone)
    }

    fn undo_transaction(
        bpm: &BufferPoolManager,
        log_manager: &Arc<LogManager>,
        by_lsn: &HashMap<u64, &LogRecord>,
        txn_id: TxnId,
        last_lsn: Lsn,
    ) -> Result<()> {
        let mut cursor = Some(last_lsn);
        let mut last_applied = Lsn::INVALID;

        while let Some(lsn) = cursor {
            // A chain pointing past the last valid record is the one
            // `CorruptedLog` situation recovery treats as recoverable: stop
            // undoing rather than fail the whole recovery pass.
            let record = match by_lsn.get(&lsn.0) {
                Some(r) => *r,
                None => break,
            };

            cursor = match record {
                LogRecord::Begin { .. } => {
                    log_manager.append_record(|abort_lsn| LogRecord::Abort {
                        lsn: abort_lsn,
                        prev_lsn: last_applied,
                        txn_id,
                    })?;
                    None
                }
                LogRecord::Insert { rid, prev_lsn, .. } => {
                    last_applied =
                        Self::undo_insert_record(bpm, log_manager, txn_id, *rid, lsn, *prev_lsn)?;
                    Some(*prev_lsn)
                }
                LogRecord::Delete {
                    rid,
                    old_tuple,
                    prev_lsn,
                    ..
                } => {
                    last_applied = Self::undo_delete_record(
                        bpm, log_manager, txn_id, *rid, old_tuple, lsn, *prev_lsn,
                    )?;
                    Some(*prev_lsn)
                }
                LogRecord::Update {
                    rid,
                    old_tuple,
                    prev_lsn,
                    ..
                } => {
                    last_applied = Self::undo_update_record(
                        bpm, log_manager, txn_id, *rid, old_tuple, lsn, *prev_lsn,
                    )?;
                    Some(*prev_lsn)
                }
                // An extra linked page with no live tuples is harmless; no
                // compensating action needed for its allocation.
                LogRecord::NewPage { prev_lsn, .. } => Some(*prev_lsn),
                // Already compensated before an earlier crash mid-undo:
                // this record is itself part of the final chain.
                LogRecord::CompensationInsert { undo_next_lsn, .. }
                | LogRecord::CompensationDelete { undo_next_lsn, .. } => {
                    last_applied = lsn;
                    Some(*undo_next_lsn)
                }
                LogRecord::Commit { .. } | LogRecord::Abort { .. } | LogRecord::Checkpoint { .. } => {
                    None
                }
            };
        }

        Ok(())
    }

    /// Undo an insert: tombstone the slot, compensated by a CLR recording
    /// that the action taken was a delete.
    fn undo_insert_record(
        bpm: &BufferPoolManager,
        log_manager: &Arc<LogManager>,
        txn_id: TxnId,
        rid: Rid,
        compensates: Lsn,
        undo_next_lsn: Lsn,
    ) -> Result<Lsn> {
        {
            let mut guard = bpm.fetch_page_write(rid.page_id)?;
            guard.delete_tuple(rid.slot)?;
        }
        let clr_lsn = log_manager.append_record(|lsn| LogRecord::CompensationDelete {
            lsn,
            txn_id,
            compensates,
            undo_next_lsn,
            rid,
            old_tuple: Vec::new(),
        })?;
        let mut guard = bpm.fetch_page_write(rid.page_id)?;
        Self::stamp(&mut guard, clr_lsn);
        Ok(clr_lsn)
    }

    /// Undo a delete: restore the tombstoned slot's length, compensated by
    /// a CLR recording that the action taken was an insert/restore.
    fn undo_delete_record(
        bpm: &BufferPoolManager,
        log_manager: &Arc<LogManager>,
        txn_id: TxnId,
        rid: Rid,
        old_tuple: &[u8],
        compensates: Lsn,
        undo_next_lsn: Lsn,
    ) -> Result<Lsn> {
        {
            let mut guard = bpm.fetch_page_write(rid.page_id)?;
            guard.restore_tombstone(rid.slot, old_tuple.len() as u32)?;
        }
        let tuple = old_tuple.to_vec();
        let clr_lsn = log_manager.append_record(|lsn| LogRecord::CompensationInsert {
            lsn,
            txn_id,
            compensates,
            undo_next_lsn,
            rid,
            tuple: tuple.clone(),
        })?;
        let mut guard = bpm.fetch_page_write(rid.page_id)?;
        Self::stamp(&mut guard, clr_lsn);
        Ok(clr_lsn)
    }

    /// Undo an in-place update: write the previous image back, compensated
    /// by a CLR recording that the restored content is `old_tuple`.
    fn undo_update_record(
        bpm: &BufferPoolManager,
        log_manager: &Arc<LogManager>,
        txn_id: TxnId,
        rid: Rid,
        old_tuple: &[u8],
        compensates: Lsn,
        undo_next_lsn: Lsn,
    ) -> Result<Lsn> {
        {
            let mut guard = bpm.fetch_page_write(rid.page_id)?;
            guard.overwrite_tuple(rid.slot, old_tuple)?;
        }
        let tuple = old_tuple.to_vec();
        let clr_lsn = log_manager.append_record(|lsn| LogRecord::CompensationInsert {
            lsn,
            txn_id,
            compensates,
            undo_next_lsn,
            rid,
            tuple: tuple.clone(),
        })?;
        let mut guard = bpm.fetch_page_write(rid.page_id)?;
        Self::stamp(&mut guard, clr_lsn);
        Ok(clr_lsn)
    }
}
