//! Table and index metadata, keyed off a single well-known root page.
//!
//! - [`TableMetadata`] — one table's schema, heap, and per-column indexes,
//!   directly grounded on `original_source/catalog/table_metadata.go`.
//! - [`Catalog`] — owns page 0 (the root page), creates tables, and serves
//!   up already-open `TableMetadata` by oid or name.

mod root_page;
mod table_metadata;

pub use table_metadata::{TableMetadata, TableOid};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{info, instrument};

use crate::buffer::BufferPoolManager;
use crate::common::schema::Schema;
use crate::common::{Error, PageId, Result};
use crate::index::hash::HashIndex;
use crate::lock::LockManager;
use crate::log::LogManager;
use crate::table::TableHeap;
use crate::transaction::Transaction;

use root_page::{CatalogRootPage, TableEntry};
use table_metadata::DEFAULT_NUM_BUCKETS;

/// The catalog root page is always the very first page a fresh database
/// allocates; `Catalog::bootstrap` asserts that ordering holds.
pub const ROOT_PAGE_ID: PageId = PageId(0);

/// Owns the root metadata page and every open table's [`TableMetadata`].
/// `create_table` (the only DDL operation) is serialized under a single
/// catalog-wide latch, single-writer; reads of already-open tables only
/// take the lookup maps' `RwLock`.
pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    log_manager: Arc<LogManager>,
    lock_manager: Arc<LockManager>,
    ddl: Mutex<()>,
    tables_by_oid: RwLock<HashMap<TableOid, Arc<TableMetadata>>>,
    tables_by_name: RwLock<HashMap<String, TableOid>>,
    next_oid: Mutex<TableOid>,
}

impl Catalog {
    /// Format page 0 as an empty catalog root. Only valid immediately after
    /// a fresh `BufferPoolManager`/`DiskManager` pair is created, before
    /// any other page has been allocated.
    pub fn bootstrap(
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
    ) -> Result<Self> {
        let mut guard = bpm.new_page()?;
        assert_eq!(
            guard.page_id(),
            ROOT_PAGE_ID,
            "catalog root page must be the first page allocated in a fresh database"
        );
        CatalogRootPage::empty().write_to(guard.as_mut_slice())?;
        guard.update_checksum();
        drop(guard);

        Ok(Self {
            bpm,
            log_manager,
            lock_manager,
            ddl: Mutex::new(()),
            tables_by_oid: RwLock::new(HashMap::new()),
            tables_by_name: RwLock::new(HashMap::new()),
            // OIDs are dense starting at 1; the first table created gets
            // oid 1, never 0.
            next_oid: Mutex::new(1),
        })
    }

    /// Reopen an existing, cleanly-shut-down database: read page 0 and
    /// reopen every table's heap and indexes at their persisted page ids,
    /// trusting that they're consistent (no crash intervened).
    #[instrument(skip(bpm, log_manager, lock_manager))]
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
    ) -> Result<Self> {
        let root = {
            let guard = bpm.fetch_page_read(ROOT_PAGE_ID)?;
            CatalogRootPage::from_bytes(guard.as_slice())
        };

        let mut tables_by_oid = HashMap::new();
        let mut tables_by_name = HashMap::new();

        for entry in root.entries {
            let heap = TableHeap::open(
                Arc::clone(&bpm),
                Arc::clone(&log_manager),
                Arc::clone(&lock_manager),
                entry.oid,
                entry.first_page_id,
            )?;
            let mut indexes = Vec::with_capacity(entry.schema.column_count());
            for column in entry.schema.columns() {
                indexes.push(match column.index_header_page_id() {
                    Some(header_page_id) => {
                        Some(HashIndex::open(Arc::clone(&bpm), header_page_id)?)
                    }
                    None => None,
                });
            }
            let table = TableMetadata::new(entry.oid, entry.name.clone(), entry.schema, heap, indexes);
            tables_by_name.insert(entry.name, entry.oid);
            tables_by_oid.insert(entry.oid, Arc::new(table));
        }

        info!(tables = tables_by_oid.len(), "catalog reopened");
        Ok(Self {
            bpm,
            log_manager,
            lock_manager,
            ddl: Mutex::new(()),
            tables_by_oid: RwLock::new(tables_by_oid),
            tables_by_name: RwLock::new(tables_by_name),
            next_oid: Mutex::new(root.next_oid),
        })
    }

    /// Reopen after a crash, called by `crate::recovery` once Redo/Undo
    /// have finished: like `open`, but every indexed column's index is
    /// rebuilt from scratch by scanning the heap, since index mutations
    /// are never write-ahead logged (unlike table-heap mutations) and so
    /// can't be trusted to have survived intact. The Rust equivalent of
    /// the Go original's `ReconstructIndexDataOfAllCol`.
    #[instrument(skip(bpm, log_manager, lock_manager))]
    pub fn recover_from_root_page(
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
    ) -> Result<Self> {
        let root = {
            let guard = bpm.fetch_page_read(ROOT_PAGE_ID)?;
            CatalogRootPage::from_bytes(guard.as_slice())
        };

        let mut tables_by_oid = HashMap::new();
        let mut tables_by_name = HashMap::new();

        for entry in root.entries {
            let heap = TableHeap::open(
                Arc::clone(&bpm),
                Arc::clone(&log_manager),
                Arc::clone(&lock_manager),
                entry.oid,
                entry.first_page_id,
            )?;
            let indexes = vec![None; entry.schema.column_count()];
            let mut table =
                TableMetadata::new(entry.oid, entry.name.clone(), entry.schema, heap, indexes);
            table.rebuild_indexes(&bpm)?;
            info!(table = table.name(), "indexes rebuilt from heap scan");
            tables_by_name.insert(table.name().to_string(), table.oid());
            tables_by_oid.insert(table.oid(), Arc::new(table));
        }

        let catalog = Self {
            bpm,
            log_manager,
            lock_manager,
            ddl: Mutex::new(()),
            tables_by_oid: RwLock::new(tables_by_oid),
            tables_by_name: RwLock::new(tables_by_name),
            next_oid: Mutex::new(root.next_oid),
        };
        catalog.persist_root_locked()?;
        Ok(catalog)
    }

    pub fn bpm(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Assign the next dense OID, create the heap's first page and any
    /// indexed column's index, append a root-page entry, and persist page
    /// 0. Fails with `Error::CatalogFull` if the root page can't fit
    /// another entry, or `Error::TableAlreadyExists` for a name collision.
    #[instrument(skip(self, schema, _txn))]
    pub fn create_table(
        &self,
        name: &str,
        schema: Schema,
        _txn: &mut Transaction,
    ) -> Result<TableOid> {
        let _ddl = self.ddl.lock();

        if self.tables_by_name.read().contains_key(name) {
            return Err(Error::table_already_exists(name));
        }

        let oid = {
            let mut next = self.next_oid.lock();
            let oid = *next;
            *next += 1;
            oid
        };

        let heap = TableHeap::create(
            Arc::clone(&self.bpm),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.lock_manager),
            oid,
        )?;

        let mut schema = schema;
        let mut indexes = Vec::with_capacity(schema.column_count());
        for col_idx in 0..schema.column_count() {
            if schema.get_column(col_idx).has_index() {
                let index = HashIndex::create(Arc::clone(&self.bpm), DEFAULT_NUM_BUCKETS)?;
                schema
                    .get_column_mut(col_idx)
                    .set_index_header_page_id(index.header_page_id());
                indexes.push(Some(index));
            } else {
                indexes.push(None);
            }
        }

        let table = Arc::new(TableMetadata::new(oid, name.to_string(), schema, heap, indexes));
        self.tables_by_oid.write().insert(oid, table);
        self.tables_by_name.write().insert(name.to_string(), oid);

        if let Err(e) = self.persist_root_locked() {
            self.tables_by_oid.write().remove(&oid);
            self.tables_by_name.write().remove(name);
            return Err(e);
        }

        info!(table = name, oid, "table created");
        Ok(oid)
    }

    pub fn get_table_by_oid(&self, oid: TableOid) -> Result<Arc<TableMetadata>> {
        self.tables_by_oid
            .read()
            .get(&oid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("table oid {oid}")))
    }

    pub fn get_table_by_name(&self, name: &str) -> Result<Arc<TableMetadata>> {
        let oid = *self
            .tables_by_name
            .read()
            .get(name)
            .ok_or_else(|| Error::table_not_found(name))?;
        self.get_table_by_oid(oid)
    }

    /// Rewrite page 0 from the current in-memory table registry.
    fn persist_root_locked(&self) -> Result<()> {
        let tables = self.tables_by_oid.read();
        let mut entries: Vec<TableEntry> = tables
            .values()
            .map(|t| TableEntry {
                oid: t.oid(),
                name: t.name().to_string(),
                first_page_id: t.first_page_id(),
                schema: t.schema().clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.oid);
        drop(tables);

        let root = CatalogRootPage {
            next_oid: *self.next_oid.lock(),
            entries,
        };
        let mut guard = self.bpm.fetch_page_write(ROOT_PAGE_ID)?;
        root.write_to(guard.as_mut_slice())?;
        guard.update_checksum();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::schema::{Column, IndexKind};
    use crate::common::value::TypeId;
    use crate::common::Value;
    use crate::lock::DeadlockStrategy;
    use crate::storage::{DiskStore, InMemoryDisk};
    use crate::transaction::{IsolationLevel, TransactionManager};
    use std::time::Duration;

    struct Harness {
        bpm: Arc<BufferPoolManager>,
        log_manager: Arc<LogManager>,
        lock_manager: Arc<LockManager>,
        txn_manager: TransactionManager,
    }

    fn harness() -> Harness {
        let disk: Arc<Mutex<Box<dyn DiskStore>>> =
            Arc::new(Mutex::new(Box::new(InMemoryDisk::new())));
        let bpm = Arc::new(BufferPoolManager::new(64, Arc::clone(&disk)));
        let log_manager = LogManager::new(Arc::clone(&disk), Duration::from_millis(20));
        bpm.attach_log_manager(Arc::clone(&log_manager));
        let lock_manager = Arc::new(LockManager::new(DeadlockStrategy::WoundWait));
        let txn_manager = TransactionManager::new(Arc::clone(&lock_manager), Arc::clone(&log_manager));
        Harness {
            bpm,
            log_manager,
            lock_manager,
            txn_manager,
        }
    }

    fn users_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Integer, IndexKind::Hash),
            Column::new("name", TypeId::Varchar, IndexKind::None),
        ])
    }

    #[test]
    fn test_create_and_lookup_table() {
        let h = harness();
        let catalog = Catalog::bootstrap(
            Arc::clone(&h.bpm),
            Arc::clone(&h.log_manager),
            Arc::clone(&h.lock_manager),
        )
        .unwrap();
        let mut txn = h.txn_manager.begin(IsolationLevel::ReadCommitted).unwrap();

        let oid = catalog.create_table("users", users_schema(), &mut txn).unwrap();
        assert_eq!(catalog.get_table_by_oid(oid).unwrap().name(), "users");
        assert_eq!(catalog.get_table_by_name("users").unwrap().oid(), oid);
    }

    #[test]
    fn test_duplicate_table_name_rejected() {
        let h = harness();
        let catalog = Catalog::bootstrap(
            Arc::clone(&h.bpm),
            Arc::clone(&h.log_manager),
            Arc::clone(&h.lock_manager),
        )
        .unwrap();
        let mut txn = h.txn_manager.begin(IsolationLevel::ReadCommitted).unwrap();
        catalog.create_table("users", users_schema(), &mut txn).unwrap();
        assert!(matches!(
            catalog.create_table("users", users_schema(), &mut txn),
            Err(Error::TableAlreadyExists(_))
        ));
    }

    #[test]
    fn test_insert_get_and_index_lookup() {
        let h = harness();
        let catalog = Catalog::bootstrap(
            Arc::clone(&h.bpm),
            Arc::clone(&h.log_manager),
            Arc::clone(&h.lock_manager),
        )
        .unwrap();
        let mut txn = h.txn_manager.begin(IsolationLevel::ReadCommitted).unwrap();
        let oid = catalog.create_table("users", users_schema(), &mut txn).unwrap();
        let table = catalog.get_table_by_oid(oid).unwrap();

        let rid = table
            .insert(&[Value::integer(7), Value::varchar("ada")], &mut txn)
            .unwrap();
        let tuple = table.get(rid, &mut txn).unwrap().unwrap();
        assert_eq!(tuple.get_value(table.schema(), 1).as_varchar(), Some("ada"));

        let index = table.index_for(0).unwrap();
        assert_eq!(index.lookup(&Value::integer(7)).unwrap(), vec![rid.pack()]);
    }

    #[test]
    fn test_reopen_preserves_tables_and_indexes() {
        let h = harness();
        let oid;
        let rid;
        {
            let catalog = Catalog::bootstrap(
                Arc::clone(&h.bpm),
                Arc::clone(&h.log_manager),
                Arc::clone(&h.lock_manager),
            )
            .unwrap();
            let mut txn = h.txn_manager.begin(IsolationLevel::ReadCommitted).unwrap();
            oid = catalog.create_table("users", users_schema(), &mut txn).unwrap();
            let table = catalog.get_table_by_oid(oid).unwrap();
            rid = table
                .insert(&[Value::integer(3), Value::varchar("grace")], &mut txn)
                .unwrap();
        }

        let reopened = Catalog::open(
            Arc::clone(&h.bpm),
            Arc::clone(&h.log_manager),
            Arc::clone(&h.lock_manager),
        )
        .unwrap();
        let table = reopened.get_table_by_oid(oid).unwrap();
        assert_eq!(table.name(), "users");
        let index = table.index_for(0).unwrap();
        assert_eq!(index.lookup(&Value::integer(3)).unwrap(), vec![rid.pack()]);
    }

    #[test]
    fn test_abort_undoes_insert_and_its_index_entry() {
        let h = harness();
        let catalog = Catalog::bootstrap(
            Arc::clone(&h.bpm),
            Arc::clone(&h.log_manager),
            Arc::clone(&h.lock_manager),
        )
        .unwrap();
        let mut txn = h.txn_manager.begin(IsolationLevel::ReadCommitted).unwrap();
        let oid = catalog.create_table("users", users_schema(), &mut txn).unwrap();
        let table = catalog.get_table_by_oid(oid).unwrap();
        let rid = table
            .insert(&[Value::integer(9), Value::varchar("linus")], &mut txn)
            .unwrap();

        h.txn_manager.abort(&mut txn, &catalog).unwrap();

        let mut reader = h.txn_manager.begin(IsolationLevel::ReadCommitted).unwrap();
        assert_eq!(table.get(rid, &mut reader).unwrap(), None);
        assert!(table.index_for(0).unwrap().lookup(&Value::integer(9)).unwrap().is_empty());
    }

    #[test]
    fn test_recover_from_root_page_rebuilds_index() {
        let h = harness();
        let oid;
        let rid;
        {
            let catalog = Catalog::bootstrap(
                Arc::clone(&h.bpm),
                Arc::clone(&h.log_manager),
                Arc::clone(&h.lock_manager),
            )
            .unwrap();
            let mut txn = h.txn_manager.begin(IsolationLevel::ReadCommitted).unwrap();
            oid = catalog.create_table("users", users_schema(), &mut txn).unwrap();
            let table = catalog.get_table_by_oid(oid).unwrap();
            rid = table
                .insert(&[Value::integer(5), Value::varchar("margaret")], &mut txn)
                .unwrap();
        }

        let recovered = Catalog::recover_from_root_page(
            Arc::clone(&h.bpm),
            Arc::clone(&h.log_manager),
            Arc::clone(&h.lock_manager),
        )
        .unwrap();
        let table = recovered.get_table_by_oid(oid).unwrap();
        assert_eq!(
            table.index_for(0).unwrap().lookup(&Value::integer(5)).unwrap(),
            vec![rid.pack()]
        );
    }
}
