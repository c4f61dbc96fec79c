//! Transaction lifecycle: begin/commit/abort.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument, warn};

use crate::catalog::Catalog;
use crate::common::{Error, Result, TxnId, TxnIdGenerator};
use crate::lock::LockManager;
use crate::log::{LogManager, LogRecord};
use crate::transaction::txn::{IsolationLevel, Transaction, TransactionState, UndoRecord};

/// Coordinates the [`LockManager`] and [`LogManager`] across a
/// transaction's lifetime. Owns the active-transaction table Recovery's
/// analysis pass reconstructs after a crash.
pub struct TransactionManager {
    txn_id_gen: TxnIdGenerator,
    lock_manager: Arc<LockManager>,
    log_manager: Arc<LogManager>,
    active: Mutex<HashMap<TxnId, ()>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Arc<LogManager>) -> Self {
        Self {
            txn_id_gen: TxnIdGenerator::new(),
            lock_manager,
            log_manager,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    /// Begin a new transaction at the given isolation level, logging
    /// `Begin` and registering it in the active-transaction table.
    #[instrument(skip(self))]
    pub fn begin(&self, isolation: IsolationLevel) -> Result<Transaction> {
        let txn_id = self.txn_id_gen.next();
        let mut txn = Transaction::new(txn_id, isolation);

        let lsn = self
            .log_manager
            .append_record(|lsn| LogRecord::Begin { lsn, txn_id })?;
        txn.set_prev_lsn(lsn);

        self.active.lock().insert(txn_id, ());
        info!(txn = txn_id.0, "transaction begun");
        Ok(txn)
    }

    /// Commit: append `Commit`, force the log durable up to it, release
    /// every lock, and drop the transaction from the active table.
    #[instrument(skip(self, txn))]
    pub fn commit(&self, txn: &mut Transaction) -> Result<()> {
        if matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ) {
            return Err(Error::TxnStateError(txn.txn_id()));
        }
        if txn.is_wounded() {
            return Err(Error::LockConflictAbort(txn.txn_id()));
        }

        let txn_id = txn.txn_id();
        let prev_lsn = txn.prev_lsn();
        let commit_lsn = self
            .log_manager
            .append_record(|lsn| LogRecord::Commit { lsn, prev_lsn, txn_id })?;
        self.log_manager.flush_up_to(commit_lsn)?;

        txn.set_state(TransactionState::Committed);
        self.lock_manager.unlock_all(txn);
        self.lock_manager.clear_wound_mark(txn_id);
        self.active.lock().remove(&txn_id);
        info!(txn = txn_id.0, "transaction committed");
        Ok(())
    }

    /// Abort: walk the write-set in reverse, applying compensating
    /// actions against the tables named in it, append `Abort`, release
    /// locks. This is the same compensating-action procedure ARIES uses
    /// for both a live abort and crash-recovery undo (see
    /// `crate::recovery`), just driven off the in-memory write-set
    /// instead of replayed log records.
    #[instrument(skip(self, txn, catalog))]
    pub fn abort(&self, txn: &mut Transaction, catalog: &Catalog) -> Result<()> {
        if txn.state() == TransactionState::Committed {
            return Err(Error::TxnStateError(txn.txn_id()));
        }

        let records = txn.take_write_set();
        for record in records.into_iter().rev() {
            if let Err(e) = undo_one(catalog, &record) {
                warn!(txn = txn.txn_id().0, error = %e, "undo step failed during abort");
            }
        }

        let txn_id = txn.txn_id();
        let prev_lsn = txn.prev_lsn();
        let lsn = self
            .log_manager
            .append_record(|lsn| LogRecord::Abort { lsn, prev_lsn, txn_id })?;
        self.log_manager.flush_up_to(lsn)?;

        txn.set_state(TransactionState::Aborted);
        self.lock_manager.unlock_all(txn);
        self.lock_manager.clear_wound_mark(txn_id);
        self.active.lock().remove(&txn_id);
        info!(txn = txn_id.0, "transaction aborted");
        Ok(())
    }

    /// Transaction ids with a `Begin` but no terminal record — used by
    /// tests and diagnostics; recovery rebuilds its own copy from the log.
    pub fn active_txn_ids(&self) -> Vec<TxnId> {
        self.active.lock().keys().copied().collect()
    }
}

/// Apply one compensating action. Shared logic with `crate::recovery`'s
/// undo pass would read this the same way if the corresponding log image
/// were available instead of the in-memory record; kept here because the
/// live-abort path never needs to go through the log to find the image.
fn undo_one(catalog: &Catalog, record: &UndoRecord) -> Result<()> {
    match record {
        UndoRecord::Insert { table_oid, rid } => {
            let table = catalog.get_table_by_oid(*table_oid)?;
            table.undo_insert(*rid)
        }
        UndoRecord::Delete {
            table_oid,
            rid,
            old_len,
        } => {
            let table = catalog.get_table_by_oid(*table_oid)?;
            table.undo_delete(*rid, *old_len)
        }
        UndoRecord::UpdateInPlace {
            table_oid,
            rid,
            old_tuple,
        } => {
            let table = catalog.get_table_by_oid(*table_oid)?;
            table.undo_update_in_place(*rid, old_tuple)
        }
    }
}
