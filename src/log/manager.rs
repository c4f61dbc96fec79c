//! Log Manager - durable append of write-ahead log records with group commit.
//!
//! Mirrors the condvar-driven worker pattern the pack's lock manager uses
//! for its wait queues: callers append records (cheap, in-process) and
//! either wait on a condvar for the next background flush, or force one
//! immediately when they need a durability guarantee right now (commit,
//! or the buffer pool evicting a dirty page).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::common::{Lsn, LsnGenerator, Result};
use crate::log::record::LogRecord;
use crate::storage::DiskStore;

/// Appends and flushes the write-ahead log.
///
/// # Durability protocol
/// `append_record` assigns an LSN and writes the record's bytes to the
/// underlying `DiskStore` immediately (so readers of the log file always
/// see a prefix of well-formed records), but does not `fsync`. A record is
/// durable only once `flush_up_to` (or the background flusher) has synced
/// the log past its LSN. The buffer pool must call `flush_up_to` with a
/// dirty page's LSN before writing that page back — the WAL invariant.
pub struct LogManager {
    disk: Arc<Mutex<Box<dyn DiskStore>>>,
    lsn_gen: LsnGenerator,
    /// Highest LSN known to be durable (fsynced).
    flushed_lsn: AtomicU64,
    flush_interval: Duration,
    running: AtomicBool,
    condvar: Condvar,
    condvar_lock: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LogManager {
    pub fn new(disk: Arc<Mutex<Box<dyn DiskStore>>>, flush_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            disk,
            lsn_gen: LsnGenerator::new(),
            flushed_lsn: AtomicU64::new(0),
            flush_interval,
            running: AtomicBool::new(false),
            condvar: Condvar::new(),
            condvar_lock: Mutex::new(()),
            worker: Mutex::new(None),
        })
    }

    /// Resume LSN generation after recovery replays the existing log, so
    /// freshly appended records continue the sequence rather than
    /// restarting it.
    pub fn resume_after(
        disk: Arc<Mutex<Box<dyn DiskStore>>>,
        flush_interval: Duration,
        last_lsn: Lsn,
    ) -> Arc<Self> {
        Arc::new(Self {
            disk,
            lsn_gen: LsnGenerator::resume_after(last_lsn),
            flushed_lsn: AtomicU64::new(last_lsn.0),
            flush_interval,
            running: AtomicBool::new(false),
            condvar: Condvar::new(),
            condvar_lock: Mutex::new(()),
            worker: Mutex::new(None),
        })
    }

    /// Append a record, assigning it the next LSN. Returns the assigned LSN.
    pub fn append_record(&self, mut build: impl FnMut(Lsn) -> LogRecord) -> Result<Lsn> {
        let lsn = self.lsn_gen.next();
        let record = build(lsn);
        debug_assert_eq!(record.lsn(), lsn);

        let bytes = record.encode();
        let mut disk = self.disk.lock();
        disk.append_log(&bytes)?;
        trace!(lsn = lsn.0, "appended log record");
        Ok(lsn)
    }

    /// Force every record up to and including `lsn` durable.
    pub fn flush_up_to(&self, lsn: Lsn) -> Result<()> {
        if lsn.0 <= self.flushed_lsn.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut disk = self.disk.lock();
        disk.flush_log()?;
        self.flushed_lsn.fetch_max(lsn.0, Ordering::AcqRel);
        Ok(())
    }

    /// Force everything appended so far durable.
    pub fn flush_all(&self) -> Result<()> {
        let highest_assigned = self.lsn_gen.peek().0.saturating_sub(1).max(1);
        self.flush_up_to(Lsn::new(highest_assigned))
    }

    pub fn flushed_lsn(&self) -> Lsn {
        Lsn::new(self.flushed_lsn.load(Ordering::Acquire))
    }

    /// Decode every record currently on the log, in append order.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        let mut disk = self.disk.lock();
        let frames = disk.read_log_from(0)?;
        Ok(frames
            .into_iter()
            .map(|(_offset, bytes)| LogRecord::decode(&bytes))
            .collect())
    }

    /// Start the background group-commit flush thread.
    pub fn activate_logging(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            return; // already running
        }

        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            while manager.running.load(Ordering::Acquire) {
                let mut guard = manager.condvar_lock.lock();
                manager
                    .condvar
                    .wait_for(&mut guard, manager.flush_interval);
                drop(guard);

                if !manager.running.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = manager.flush_all() {
                    debug!(error = %e, "background log flush failed");
                }
            }
        });

        *self.worker.lock() = Some(handle);
    }

    /// Stop the background flusher and join the thread, flushing whatever
    /// remains buffered.
    pub fn deactivate_logging(self: &Arc<Self>) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.condvar.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDisk;

    fn make_manager() -> Arc<LogManager> {
        let disk: Arc<Mutex<Box<dyn DiskStore>>> =
            Arc::new(Mutex::new(Box::new(InMemoryDisk::new())));
        LogManager::new(disk, Duration::from_millis(10))
    }

    #[test]
    fn test_append_and_read_back() {
        let manager = make_manager();
        let txn_id = crate::common::TxnId::new(1);

        let lsn = manager
            .append_record(|lsn| LogRecord::Begin { lsn, txn_id })
            .unwrap();
        manager.flush_up_to(lsn).unwrap();

        let records = manager.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lsn(), lsn);
    }

    #[test]
    fn test_flush_up_to_is_idempotent_and_monotonic() {
        let manager = make_manager();
        let txn_id = crate::common::TxnId::new(1);

        let lsn1 = manager
            .append_record(|lsn| LogRecord::Begin { lsn, txn_id })
            .unwrap();
        manager.flush_up_to(lsn1).unwrap();
        assert_eq!(manager.flushed_lsn(), lsn1);

        // Flushing an already-flushed LSN is a no-op, not an error.
        manager.flush_up_to(lsn1).unwrap();
        assert_eq!(manager.flushed_lsn(), lsn1);
    }

    #[test]
    fn test_sequential_lsns_increase() {
        let manager = make_manager();
        let txn_id = crate::common::TxnId::new(1);

        let lsn1 = manager
            .append_record(|lsn| LogRecord::Begin { lsn, txn_id })
            .unwrap();
        let lsn2 = manager
            .append_record(|lsn| LogRecord::Commit {
                lsn,
                prev_lsn: lsn1,
                txn_id,
            })
            .unwrap();

        assert!(lsn2.0 > lsn1.0);
    }

    #[test]
    fn test_background_flusher_starts_and_stops() {
        let manager = make_manager();
        manager.activate_logging();
        std::thread::sleep(Duration::from_millis(30));
        manager.deactivate_logging();
    }
}
