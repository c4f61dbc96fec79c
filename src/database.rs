//! Top-level handle: wires storage, the buffer pool, the write-ahead log,
//! the lock manager and the catalog together behind one open/close
//! lifecycle, running crash recovery when a database already exists.
//!
//! Bring-up order: disk manager, then buffer pool, then log manager and
//! recovery, then catalog.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, instrument};

use crate::buffer::BufferPoolManager;
use crate::catalog::Catalog;
use crate::common::config::DatabaseConfig;
use crate::common::Result;
use crate::lock::LockManager;
use crate::log::LogManager;
use crate::recovery::RecoveryManager;
use crate::storage::{DiskManager, DiskStore, InMemoryDisk};
use crate::transaction::TransactionManager;

/// An open database: the fully wired storage/transaction stack, ready to
/// hand out transactions and reach the catalog.
pub struct Database {
    bpm: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    txn_manager: TransactionManager,
    catalog: Catalog,
}

impl Database {
    /// Open the database at `config`'s path, creating it fresh if it
    /// doesn't exist yet, or running recovery first if it does.
    #[instrument(skip(config))]
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let exists = !config.is_in_memory()
            && config.data_file_path().exists()
            && config.log_file_path().exists();

        let disk: Arc<Mutex<Box<dyn DiskStore>>> = if config.is_in_memory() {
            Arc::new(Mutex::new(Box::new(InMemoryDisk::new())))
        } else {
            let dm = DiskManager::open_or_create(config.data_file_path(), config.log_file_path())?;
            Arc::new(Mutex::new(Box::new(dm) as Box<dyn DiskStore>))
        };

        let bpm = Arc::new(BufferPoolManager::new(config.buffer_pool_size(), Arc::clone(&disk)));
        let lock_manager = Arc::new(LockManager::new(config.deadlock_strategy()));

        let (log_manager, catalog) = if exists {
            info!("opening existing database, running recovery");
            let outcome = RecoveryManager::recover(Arc::clone(&disk), Arc::clone(&bpm), config.flush_interval())?;
            bpm.attach_log_manager(Arc::clone(&outcome.log_manager));
            let catalog = Catalog::recover_from_root_page(
                Arc::clone(&bpm),
                Arc::clone(&outcome.log_manager),
                Arc::clone(&lock_manager),
            )?;
            (outcome.log_manager, catalog)
        } else {
            info!("bootstrapping new database");
            let log_manager = LogManager::new(Arc::clone(&disk), config.flush_interval());
            bpm.attach_log_manager(Arc::clone(&log_manager));
            let catalog = Catalog::bootstrap(Arc::clone(&bpm), Arc::clone(&log_manager), Arc::clone(&lock_manager))?;
            (log_manager, catalog)
        };

        log_manager.activate_logging();

        let txn_manager = TransactionManager::new(Arc::clone(&lock_manager), Arc::clone(&log_manager));

        Ok(Self {
            bpm,
            log_manager,
            lock_manager,
            txn_manager,
            catalog,
        })
    }

    pub fn bpm(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    pub fn txn_manager(&self) -> &TransactionManager {
        &self.txn_manager
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Flush every dirty page and append a checkpoint record. Call before
    /// dropping a `Database` you want to shut down cleanly (not required
    /// for correctness — recovery handles an unclean shutdown too — but it
    /// shrinks the work the next `open` has to redo).
    pub fn checkpoint(&self) -> Result<()> {
        let active: Vec<_> = self
            .txn_manager
            .active_txn_ids()
            .into_iter()
            .map(|id| (id, self.log_manager.flushed_lsn()))
            .collect();
        RecoveryManager::checkpoint(&self.bpm, &self.log_manager, &active)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Column, Schema, TypeId, Value};

    fn memory_config() -> DatabaseConfig {
        DatabaseConfig::new("unused-path-in-memory-mode").with_in_memory_storage(true)
    }

    #[test]
    fn test_bootstrap_creates_empty_catalog() {
        let db = Database::open(memory_config()).unwrap();
        assert!(db.catalog().get_table_by_name("nonexistent").is_err());
    }

    #[test]
    fn test_create_table_and_insert_roundtrip() {
        let db = Database::open(memory_config()).unwrap();
        let schema = Schema::new(vec![Column::new("id", TypeId::Integer, crate::common::IndexKind::None)]);

        let mut txn = db.txn_manager().begin(crate::transaction::IsolationLevel::ReadCommitted).unwrap();
        let oid = db.catalog().create_table("widgets", schema, &mut txn).unwrap();
        let table = db.catalog().get_table_by_oid(oid).unwrap();
        let rid = table.insert(&[Value::integer(7)], &mut txn).unwrap();
        db.txn_manager().commit(&mut txn).unwrap();

        let mut txn2 = db.txn_manager().begin(crate::transaction::IsolationLevel::ReadCommitted).unwrap();
        let row = table.get(rid, &mut txn2).unwrap().unwrap();
        assert_eq!(row.get_value(table.schema(), 0).as_integer(), Some(7));
        db.txn_manager().commit(&mut txn2).unwrap();
    }
}
