//! The lock table: one FIFO wait queue per RID, granted under strict 2PL.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::common::{Error, Result, Rid, TxnId};
use crate::lock::{DeadlockStrategy, LockMode};
use crate::transaction::{Transaction, TransactionState};

/// A single queued (or granted) request against one RID.
#[derive(Debug, Clone)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-RID lock state: the ordered request queue plus a condvar woken
/// whenever the queue's grant set changes.
#[derive(Default)]
struct LockQueue {
    requests: VecDeque<LockRequest>,
}

impl LockQueue {
    fn granted_modes(&self) -> impl Iterator<Item = &LockMode> {
        self.requests.iter().filter(|r| r.granted).map(|r| &r.mode)
    }

    fn holder_ids(&self, except: TxnId) -> Vec<TxnId> {
        self.requests
            .iter()
            .filter(|r| r.granted && r.txn_id != except)
            .map(|r| r.txn_id)
            .collect()
    }

    /// A request at position `idx` may be granted if every prior request
    /// in the queue is compatible with it (FIFO within a compatible
    /// prefix — no jumping the queue even if a later request is
    /// technically compatible with everything granted so far).
    fn can_grant(&self, idx: usize, mode: &LockMode) -> bool {
        self.requests
            .iter()
            .take(idx)
            .all(|r| r.mode.is_compatible(mode))
    }
}

/// Row-granularity shared/exclusive lock manager.
///
/// Strict 2PL: `unlock` always transitions the caller into the shrinking
/// phase, so in practice locks are only released by `TransactionManager`
/// at commit/abort. `lock_shared`/`lock_exclusive` reject a request from a
/// transaction already in the shrinking phase (or one the deadlock
/// resolver has wounded) with `Error::LockConflictAbort`.
pub struct LockManager {
    table: Mutex<HashMap<Rid, LockQueue>>,
    condvar: Condvar,
    strategy: DeadlockStrategy,
    /// Transactions marked as wound-wait victims, pending observation by
    /// their own next lock-manager call.
    wounded: Mutex<std::collections::HashSet<TxnId>>,
}

impl LockManager {
    pub fn new(strategy: DeadlockStrategy) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
            strategy,
            wounded: Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn strategy(&self) -> DeadlockStrategy {
        self.strategy
    }

    pub fn lock_shared(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        self.acquire(txn, rid, LockMode::Shared)
    }

    pub fn lock_exclusive(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        self.acquire(txn, rid, LockMode::Exclusive)
    }

    /// Upgrade a held S lock to X. Only legal if the caller holds S and no
    /// *other* transaction also holds S on this RID.
    pub fn lock_upgrade(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        self.check_can_lock(txn)?;
        if !txn.holds_shared(rid) {
            return Err(Error::TxnStateError(txn.txn_id()));
        }

        let mut table = self.table.lock();
        loop {
            let queue = table.entry(rid).or_default();
            let others_hold_shared = queue
                .requests
                .iter()
                .any(|r| r.granted && r.txn_id != txn.txn_id() && r.mode == LockMode::Shared);

            if !others_hold_shared {
                if let Some(req) = queue
                    .requests
                    .iter_mut()
                    .find(|r| r.txn_id == txn.txn_id())
                {
                    req.mode = LockMode::Exclusive;
                }
                txn.remove_shared_lock(rid);
                txn.add_exclusive_lock(rid);
                trace!(txn = txn.txn_id().0, rid = %rid, "lock upgraded to exclusive");
                return Ok(());
            }

            if self.strategy == DeadlockStrategy::WoundWait {
                self.wound_younger_holders(&mut table, rid, txn.txn_id());
            }
            self.condvar.wait(&mut table);
            self.check_can_lock(txn)?;
        }
    }

    /// Release every lock this transaction holds and enter the shrinking
    /// phase. Strict 2PL means this is only ever called by commit/abort.
    pub fn unlock_all(&self, txn: &mut Transaction) {
        if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let rids: Vec<Rid> = txn
            .shared_lock_set()
            .iter()
            .chain(txn.exclusive_lock_set().iter())
            .copied()
            .collect();

        let mut table = self.table.lock();
        for rid in &rids {
            if let Some(queue) = table.get_mut(rid) {
                queue.requests.retain(|r| r.txn_id != txn.txn_id());
                if queue.requests.is_empty() {
                    table.remove(rid);
                }
            }
        }
        for rid in rids {
            txn.remove_shared_lock(rid);
            txn.remove_exclusive_lock(rid);
        }
        self.condvar.notify_all();
    }

    /// Explicit single-RID unlock for read-committed's statement-boundary
    /// S-lock release. Still transitions the transaction to shrinking
    /// under strict 2PL (a lower isolation level just means fewer locks
    /// were taken in the first place, not that 2PL's phase rule is waived).
    pub fn unlock(&self, txn: &mut Transaction, rid: Rid) -> Result<()> {
        self.check_can_lock(txn)?;
        txn.set_state(TransactionState::Shrinking);

        let mut table = self.table.lock();
        if let Some(queue) = table.get_mut(&rid) {
            queue.requests.retain(|r| r.txn_id != txn.txn_id());
            if queue.requests.is_empty() {
                table.remove(&rid);
            }
        }
        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);
        self.condvar.notify_all();
        Ok(())
    }

    fn check_can_lock(&self, txn: &mut Transaction) -> Result<()> {
        if self.is_marked_wounded(txn.txn_id()) {
            txn.wound();
        }
        if txn.is_wounded() {
            return Err(Error::LockConflictAbort(txn.txn_id()));
        }
        if txn.state() == TransactionState::Shrinking {
            return Err(Error::LockConflictAbort(txn.txn_id()));
        }
        if matches!(
            txn.state(),
            TransactionState::Committed | TransactionState::Aborted
        ) {
            return Err(Error::TxnStateError(txn.txn_id()));
        }
        Ok(())
    }

    fn acquire(&self, txn: &mut Transaction, rid: Rid, mode: LockMode) -> Result<()> {
        self.check_can_lock(txn)?;

        if mode == LockMode::Shared && txn.holds_shared(rid) {
            return Ok(());
        }
        if mode == LockMode::Exclusive && txn.holds_exclusive(rid) {
            return Ok(());
        }
        if mode == LockMode::Shared && txn.holds_exclusive(rid) {
            return Ok(()); // already hold the stronger lock
        }

        let mut table = self.table.lock();
        let already_queued = table
            .entry(rid)
            .or_default()
            .requests
            .iter()
            .any(|r| r.txn_id == txn.txn_id());
        if !already_queued {
            table.entry(rid).or_default().requests.push_back(LockRequest {
                txn_id: txn.txn_id(),
                mode,
                granted: false,
            });
        }

        loop {
            self.check_can_lock(txn)?;

            let queue = table.get_mut(&rid).expect("queue entry present");
            let idx = queue
                .requests
                .iter()
                .position(|r| r.txn_id == txn.txn_id())
                .expect("request present");

            if queue.can_grant(idx, &mode) {
                queue.requests[idx].granted = true;
                match mode {
                    LockMode::Shared => txn.add_shared_lock(rid),
                    LockMode::Exclusive => txn.add_exclusive_lock(rid),
                }
                trace!(txn = txn.txn_id().0, rid = %rid, mode = ?mode, "lock granted");
                return Ok(());
            }

            match self.strategy {
                DeadlockStrategy::WoundWait => {
                    self.wound_younger_holders(&mut table, rid, txn.txn_id());
                }
                DeadlockStrategy::Detection => {
                    // No inline action: an external detector sweep wounds
                    // the cycle's victim asynchronously (see
                    // `LockManager::detect_cycle`).
                }
            }

            self.condvar.wait(&mut table);
        }
    }

    /// Wound-wait: `requester` (older or younger than the current
    /// holders) wounds every *younger* transaction holding a conflicting
    /// lock on `rid`. Nothing happens to holders older than the requester
    /// — the requester simply keeps waiting for them.
    fn wound_younger_holders(
        &self,
        table: &mut HashMap<Rid, LockQueue>,
        rid: Rid,
        requester: TxnId,
    ) {
        // NB: actually wounding requires mutable access to the holder's
        // `Transaction`, which this lock table doesn't own. We mark the
        // *request* itself so the holder observes it the next time it
        // touches the lock manager, and record which txn ids were
        // wounded so `TransactionManager` can look the flag up.
        if let Some(queue) = table.get(&rid) {
            let younger: Vec<TxnId> = queue
                .holder_ids(requester)
                .into_iter()
                .filter(|&holder| holder.0 > requester.0)
                .collect();
            for holder in younger {
                debug!(victim = holder.0, wounder = requester.0, rid = %rid, "wound-wait victim marked");
                self.wounded.lock().insert(holder);
            }
        }
    }

    /// Whether `txn_id` has been marked as a wound-wait victim by some
    /// other transaction's request. `TransactionManager` consults this at
    /// the start of every operation and forces an abort once set.
    pub fn is_marked_wounded(&self, txn_id: TxnId) -> bool {
        self.wounded.lock().contains(&txn_id)
    }

    pub fn clear_wound_mark(&self, txn_id: TxnId) {
        self.wounded.lock().remove(&txn_id);
    }

    /// Build the wait-for graph from currently blocked requests and return
    /// the transaction ids found in the youngest cycle, if any (detection
    /// mode only). Intended to be polled by a background sweep.
    pub fn detect_cycle(&self) -> Option<TxnId> {
        let table = self.table.lock();
        let mut wait_for: HashMap<TxnId, Vec<TxnId>> = HashMap::new();

        for queue in table.values() {
            let holders: Vec<TxnId> = queue
                .requests
                .iter()
                .filter(|r| r.granted)
                .map(|r| r.txn_id)
                .collect();
            for waiter in queue.requests.iter().filter(|r| !r.granted) {
                wait_for.entry(waiter.txn_id).or_default().extend(
                    holders.iter().copied().filter(|&h| h != waiter.txn_id),
                );
            }
        }

        let mut visited = std::collections::HashSet::new();
        for &start in wait_for.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut on_stack = Vec::new();
            if let Some(cycle) = Self::dfs_find_cycle(start, &wait_for, &mut visited, &mut on_stack)
            {
                // Youngest (highest txn-id) transaction in the cycle is the victim.
                return cycle.into_iter().max();
            }
        }
        None
    }

    /// Depth-first search for a cycle reachable from `node`. Returns the
    /// node ids making up the first cycle found, if any.
    fn dfs_find_cycle(
        node: TxnId,
        wait_for: &HashMap<TxnId, Vec<TxnId>>,
        visited: &mut std::collections::HashSet<TxnId>,
        on_stack: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        if let Some(pos) = on_stack.iter().position(|&n| n == node) {
            return Some(on_stack[pos..].to_vec());
        }
        if !visited.insert(node) {
            return None;
        }
        on_stack.push(node);
        if let Some(neighbors) = wait_for.get(&node) {
            for &next in neighbors {
                if let Some(cycle) = Self::dfs_find_cycle(next, wait_for, visited, on_stack) {
                    return Some(cycle);
                }
            }
        }
        on_stack.pop();
        None
    }
}
