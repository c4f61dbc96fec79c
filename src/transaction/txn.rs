//! The `Transaction` type: per-transaction state carried between calls.

use std::collections::HashSet;

use crate::catalog::TableOid;
use crate::common::{Lsn, Rid, TxnId};

/// Where a transaction sits in the strict-2PL state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Acquiring locks; no locks released yet.
    Growing,
    /// At least one lock released (strict 2PL: only happens at termination,
    /// so this is really just "about to terminate").
    Shrinking,
    Committed,
    Aborted,
}

/// Effective isolation level under strict 2PL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// No S-locks taken at all.
    ReadUncommitted,
    /// S-locks acquired and released at statement end; X-locks held to commit.
    ReadCommitted,
    /// All locks held to commit.
    RepeatableRead,
}

/// One entry in a transaction's write-set, consumed in reverse by abort to
/// undo the transaction's effects. Recovery's undo pass performs the same
/// kind of compensating actions, but driven off logged images rather than
/// this in-memory list (see `crate::recovery`).
#[derive(Debug, Clone)]
pub enum UndoRecord {
    /// Undo: physically remove the tuple and any index entries for it.
    Insert { table_oid: TableOid, rid: Rid },
    /// Undo: restore the tombstoned slot to its previous length. The bytes
    /// are still on the page (tombstoning never compacts), so only the
    /// slot's size needs restoring.
    Delete {
        table_oid: TableOid,
        rid: Rid,
        old_len: u32,
    },
    /// Undo: an in-place update overwrote the slot; the previous image
    /// must be written back explicitly.
    UpdateInPlace {
        table_oid: TableOid,
        rid: Rid,
        old_tuple: Vec<u8>,
    },
}

/// Per-transaction state: identity, 2PL phase, isolation level, held
/// locks, and the undo list consumed on abort.
#[derive(Debug)]
pub struct Transaction {
    txn_id: TxnId,
    state: TransactionState,
    isolation: IsolationLevel,
    prev_lsn: Lsn,
    shared_locks: HashSet<Rid>,
    exclusive_locks: HashSet<Rid>,
    write_set: Vec<UndoRecord>,
    /// Set by the deadlock resolver (wound-wait victim or detection-cycle
    /// victim). The transaction must observe this at its next lock or heap
    /// operation and unwind via `abort`.
    wounded: bool,
}

impl Transaction {
    pub(crate) fn new(txn_id: TxnId, isolation: IsolationLevel) -> Self {
        Self {
            txn_id,
            state: TransactionState::Growing,
            isolation,
            prev_lsn: Lsn::INVALID,
            shared_locks: HashSet::new(),
            exclusive_locks: HashSet::new(),
            write_set: Vec::new(),
            wounded: false,
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn
    }

    pub fn set_prev_lsn(&mut self, lsn: Lsn) {
        self.prev_lsn = lsn;
    }

    pub fn is_wounded(&self) -> bool {
        self.wounded
    }

    pub(crate) fn wound(&mut self) {
        self.wounded = true;
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    pub fn holds_shared(&self, rid: Rid) -> bool {
        self.shared_locks.contains(&rid)
    }

    pub fn holds_exclusive(&self, rid: Rid) -> bool {
        self.exclusive_locks.contains(&rid)
    }

    pub(crate) fn add_shared_lock(&mut self, rid: Rid) {
        self.shared_locks.insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&mut self, rid: Rid) {
        self.exclusive_locks.insert(rid);
    }

    pub(crate) fn remove_shared_lock(&mut self, rid: Rid) {
        self.shared_locks.remove(&rid);
    }

    pub(crate) fn remove_exclusive_lock(&mut self, rid: Rid) {
        self.exclusive_locks.remove(&rid);
    }

    pub fn shared_lock_set(&self) -> &HashSet<Rid> {
        &self.shared_locks
    }

    pub fn exclusive_lock_set(&self) -> &HashSet<Rid> {
        &self.exclusive_locks
    }

    /// Record an undo entry. Called by the table heap after a successful
    /// mutation, before the caller's lock on the RID could ever be released.
    pub fn record_write(&mut self, record: UndoRecord) {
        self.write_set.push(record);
    }

    /// Drain the write-set for undo, oldest-last (so the caller walks it
    /// in reverse application order).
    pub(crate) fn take_write_set(&mut self) -> Vec<UndoRecord> {
        std::mem::take(&mut self.write_set)
    }
}
