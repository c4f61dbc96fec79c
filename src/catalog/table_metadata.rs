//! A single table's metadata: schema, heap, and one optional index per
//! column. Directly grounded on `original_source/catalog/table_metadata.go`'s
//! `TableMetadata` (`indexes []index.Index` with `nil` entries for
//! unindexed columns becomes `Vec<Option<HashIndex>>` here).

use std::sync::Arc;

use crate::common::schema::Schema;
use crate::common::{Error, Result, Rid, Value};
use crate::index::hash::HashIndex;
use crate::table::{TableHeap, Tuple};
use crate::transaction::Transaction;

/// Dense table identifier, assigned by `Catalog::create_table`.
pub type TableOid = u32;

/// A table's schema, storage, and per-column indexes, bundled together so
/// row mutations can keep both in sync. Owned by the `Catalog`, shared out
/// as `Arc<TableMetadata>`.
pub struct TableMetadata {
    oid: TableOid,
    name: String,
    schema: Schema,
    heap: TableHeap,
    indexes: Vec<Option<HashIndex>>,
}

impl TableMetadata {
    pub(super) fn new(
        oid: TableOid,
        name: String,
        schema: Schema,
        heap: TableHeap,
        indexes: Vec<Option<HashIndex>>,
    ) -> Self {
        debug_assert_eq!(indexes.len(), schema.column_count());
        Self {
            oid,
            name,
            schema,
            heap,
            indexes,
        }
    }

    pub fn oid(&self) -> TableOid {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn first_page_id(&self) -> crate::common::PageId {
        self.heap.first_page_id()
    }

    pub fn heap(&self) -> &TableHeap {
        &self.heap
    }

    /// The index on column `col_idx`, if that column is indexed.
    pub fn index_for(&self, col_idx: usize) -> Option<&HashIndex> {
        self.indexes[col_idx].as_ref()
    }

    /// Encode `values` in schema order, insert into the heap, and add an
    /// entry to every indexed column's index.
    pub fn insert(&self, values: &[Value], txn: &mut Transaction) -> Result<Rid> {
        let tuple = Tuple::from_values(&self.schema, values);
        let rid = self.heap.insert_tuple(tuple.as_bytes(), txn)?;
        self.insert_index_entries(&tuple, rid)?;
        Ok(rid)
    }

    pub fn get(&self, rid: Rid, txn: &mut Transaction) -> Result<Option<Tuple>> {
        Ok(self.heap.get_tuple(rid, txn)?.map(Tuple::from_bytes))
    }

    /// Remove the old row's index entries, tombstone it, and re-encode
    /// `new_values` as a fresh tuple, returning its (possibly new) RID.
    pub fn update(&self, rid: Rid, new_values: &[Value], txn: &mut Transaction) -> Result<Rid> {
        let old_bytes = self
            .heap
            .get_tuple(rid, txn)?
            .ok_or_else(|| Error::rid_not_found(rid))?;
        let old_tuple = Tuple::from_bytes(old_bytes);
        let new_tuple = Tuple::from_values(&self.schema, new_values);

        let new_rid = self.heap.update_tuple(rid, new_tuple.as_bytes(), txn)?;
        self.remove_index_entries(&old_tuple, rid)?;
        self.insert_index_entries(&new_tuple, new_rid)?;
        Ok(new_rid)
    }

    pub fn delete(&self, rid: Rid, txn: &mut Transaction) -> Result<()> {
        let bytes = self
            .heap
            .get_tuple(rid, txn)?
            .ok_or_else(|| Error::rid_not_found(rid))?;
        let tuple = Tuple::from_bytes(bytes);
        self.heap.delete_tuple(rid, txn)?;
        self.remove_index_entries(&tuple, rid)
    }

    fn index_keys(&self, tuple: &Tuple) -> Vec<(usize, Value)> {
        (0..self.schema.column_count())
            .filter(|&i| self.indexes[i].is_some())
            .map(|i| (i, tuple.get_value(&self.schema, i)))
            .collect()
    }

    fn insert_index_entries(&self, tuple: &Tuple, rid: Rid) -> Result<()> {
        for (col_idx, value) in self.index_keys(tuple) {
            if value.is_null() {
                continue;
            }
            if let Some(index) = &self.indexes[col_idx] {
                index.insert(&value, rid.pack())?;
            }
        }
        Ok(())
    }

    fn remove_index_entries(&self, tuple: &Tuple, rid: Rid) -> Result<()> {
        for (col_idx, value) in self.index_keys(tuple) {
            if value.is_null() {
                continue;
            }
            if let Some(index) = &self.indexes[col_idx] {
                index.remove(&value, rid.pack())?;
            }
        }
        Ok(())
    }

    /// Read a slot's bytes directly off the page, bypassing the lock
    /// manager — used only by the undo primitives below, which run without
    /// a transaction context (a live abort, or recovery's undo pass).
    fn read_raw(&self, rid: Rid) -> Result<Option<Vec<u8>>> {
        let guard = self.heap.bpm().fetch_page_read(rid.page_id)?;
        Ok(guard.get_tuple(rid.slot).map(|b| b.to_vec()))
    }

    /// Undo an insert: drop the index entries for the tuple still sitting
    /// at `rid`, then tombstone it physically.
    pub fn undo_insert(&self, rid: Rid) -> Result<()> {
        if let Some(bytes) = self.read_raw(rid)? {
            let tuple = Tuple::from_bytes(bytes);
            self.remove_index_entries(&tuple, rid)?;
        }
        self.heap.undo_insert_physical(rid)
    }

    /// Undo a delete: restore the tombstoned slot's length, then reinsert
    /// index entries now that the tuple is readable again.
    pub fn undo_delete(&self, rid: Rid, old_len: u32) -> Result<()> {
        self.heap.undo_delete_physical(rid, old_len)?;
        if let Some(bytes) = self.read_raw(rid)? {
            let tuple = Tuple::from_bytes(bytes);
            self.insert_index_entries(&tuple, rid)?;
        }
        Ok(())
    }

    /// Undo an in-place update: drop index entries for the post-update
    /// tuple, write the previous image back, then reinsert index entries
    /// for the restored values.
    pub fn undo_update_in_place(&self, rid: Rid, old_tuple: &[u8]) -> Result<()> {
        if let Some(current_bytes) = self.read_raw(rid)? {
            let current_tuple = Tuple::from_bytes(current_bytes);
            self.remove_index_entries(&current_tuple, rid)?;
        }
        self.heap.undo_update_in_place_physical(rid, old_tuple)?;
        let restored = Tuple::from_bytes(old_tuple.to_vec());
        self.insert_index_entries(&restored, rid)
    }

    /// Reconstruct every indexed column's index from scratch by scanning
    /// the heap's live tuples and re-inserting each key → RID pair. The
    /// Rust equivalent of the Go original's `ReconstructIndexDataOfAllCol`,
    /// minus the executor/seq-scan-plan indirection (a direct `iter()` call
    /// instead, since planning is out of scope here).
    pub(super) fn rebuild_indexes(&mut self, bpm: &Arc<crate::buffer::BufferPoolManager>) -> Result<()> {
        let live: Vec<(Rid, Vec<u8>)> = self.heap.iter().collect();

        for col_idx in 0..self.schema.column_count() {
            if !self.schema.get_column(col_idx).has_index() {
                continue;
            }
            let index = HashIndex::create(Arc::clone(bpm), DEFAULT_NUM_BUCKETS)?;
            for (rid, bytes) in &live {
                let tuple = Tuple::from_bytes(bytes.clone());
                let value = tuple.get_value(&self.schema, col_idx);
                if !value.is_null() {
                    index.insert(&value, rid.pack())?;
                }
            }
            self.schema
                .get_column_mut(col_idx)
                .set_index_header_page_id(index.header_page_id());
            self.indexes[col_idx] = Some(index);
        }
        Ok(())
    }
}

/// Bucket count chosen for rebuilt indexes when the original bucket count
/// isn't recorded anywhere but the index's own (discarded) header page —
/// matches the bucket count `Catalog::create_table` uses for new indexes.
pub(super) const DEFAULT_NUM_BUCKETS: u32 = 4;
