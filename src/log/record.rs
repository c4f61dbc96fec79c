//! Log record format.
//!
//! Every record carries its own LSN and, for transaction-scoped records,
//! the previous LSN written by the same transaction (`prev_lsn`) — this
//! per-transaction chain is what the undo pass walks backward during
//! recovery, and what rollback walks during a live abort.
//!
//! # Wire format
//! ```text
//! [tag: u8][lsn: u64][prev_lsn: u64] ...tag-specific fields...
//! ```
//! Checkpoint records omit `prev_lsn` (they aren't part of any
//! transaction's chain).

use crate::common::{Lsn, PageId, Rid, TxnId};

/// Before/after image kept inline in an Insert/Delete/Update record.
/// Opaque to the log: the table heap is responsible for encoding and
/// decoding tuple bytes.
pub type TupleImage = Vec<u8>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Begin {
        lsn: Lsn,
        txn_id: TxnId,
    },
    Commit {
        lsn: Lsn,
        prev_lsn: Lsn,
        txn_id: TxnId,
    },
    Abort {
        lsn: Lsn,
        prev_lsn: Lsn,
        txn_id: TxnId,
    },
    Insert {
        lsn: Lsn,
        prev_lsn: Lsn,
        txn_id: TxnId,
        rid: Rid,
        tuple: TupleImage,
    },
    Delete {
        lsn: Lsn,
        prev_lsn: Lsn,
        txn_id: TxnId,
        rid: Rid,
        old_tuple: TupleImage,
    },
    Update {
        lsn: Lsn,
        prev_lsn: Lsn,
        txn_id: TxnId,
        rid: Rid,
        old_tuple: TupleImage,
        new_tuple: TupleImage,
    },
    /// A table heap allocated a fresh page and linked it into the heap's
    /// page chain.
    NewPage {
        lsn: Lsn,
        prev_lsn: Lsn,
        txn_id: TxnId,
        page_id: PageId,
        prev_page_id: PageId,
    },
    /// Compensation log record: written during rollback (live abort or
    /// recovery's undo pass) to record that an operation's undo has been
    /// applied. `undo_next_lsn` is the LSN to continue undoing from next,
    /// skipping the record this CLR compensates for.
    CompensationInsert {
        lsn: Lsn,
        txn_id: TxnId,
        compensates: Lsn,
        undo_next_lsn: Lsn,
        rid: Rid,
        tuple: TupleImage,
    },
    CompensationDelete {
        lsn: Lsn,
        txn_id: TxnId,
        compensates: Lsn,
        undo_next_lsn: Lsn,
        rid: Rid,
        old_tuple: TupleImage,
    },
    /// Fuzzy checkpoint: the set of transactions active and the earliest
    /// LSN each dirty page needs redone from, at the moment the checkpoint
    /// was taken.
    Checkpoint {
        lsn: Lsn,
        active_txns: Vec<(TxnId, Lsn)>,
        dirty_page_table: Vec<(PageId, Lsn)>,
    },
}

const TAG_BEGIN: u8 = 1;
const TAG_COMMIT: u8 = 2;
const TAG_ABORT: u8 = 3;
const TAG_INSERT: u8 = 4;
const TAG_DELETE: u8 = 5;
const TAG_UPDATE: u8 = 6;
const TAG_NEW_PAGE: u8 = 7;
const TAG_CLR_INSERT: u8 = 8;
const TAG_CLR_DELETE: u8 = 9;
const TAG_CHECKPOINT: u8 = 10;

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn put_rid(buf: &mut Vec<u8>, rid: Rid) {
    put_u32(buf, rid.page_id.0);
    buf.extend_from_slice(&rid.slot.to_le_bytes());
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take_u8(&mut self) -> u8 {
        let v = self.data[self.pos];
        self.pos += 1;
        v
    }

    fn take_u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn take_u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn take_u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.data[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    fn take_bytes(&mut self) -> Vec<u8> {
        let len = self.take_u32() as usize;
        let v = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        v
    }

    fn take_rid(&mut self) -> Rid {
        let page_id = PageId::new(self.take_u32());
        let slot = self.take_u16();
        Rid::new(page_id, slot)
    }
}

impl LogRecord {
    pub fn lsn(&self) -> Lsn {
        match self {
            LogRecord::Begin { lsn, .. }
            | LogRecord::Commit { lsn, .. }
            | LogRecord::Abort { lsn, .. }
            | LogRecord::Insert { lsn, .. }
            | LogRecord::Delete { lsn, .. }
            | LogRecord::Update { lsn, .. }
            | LogRecord::NewPage { lsn, .. }
            | LogRecord::CompensationInsert { lsn, .. }
            | LogRecord::CompensationDelete { lsn, .. }
            | LogRecord::Checkpoint { lsn, .. } => *lsn,
        }
    }

    pub fn txn_id(&self) -> Option<TxnId> {
        match self {
            LogRecord::Begin { txn_id, .. }
            | LogRecord::Commit { txn_id, .. }
            | LogRecord::Abort { txn_id, .. }
            | LogRecord::Insert { txn_id, .. }
            | LogRecord::Delete { txn_id, .. }
            | LogRecord::Update { txn_id, .. }
            | LogRecord::NewPage { txn_id, .. }
            | LogRecord::CompensationInsert { txn_id, .. }
            | LogRecord::CompensationDelete { txn_id, .. } => Some(*txn_id),
            LogRecord::Checkpoint { .. } => None,
        }
    }

    /// Previous LSN in this record's transaction's chain, if any.
    pub fn prev_lsn(&self) -> Option<Lsn> {
        match self {
            LogRecord::Begin { .. } | LogRecord::Checkpoint { .. } => None,
            LogRecord::Commit { prev_lsn, .. }
            | LogRecord::Abort { prev_lsn, .. }
            | LogRecord::Insert { prev_lsn, .. }
            | LogRecord::Delete { prev_lsn, .. }
            | LogRecord::Update { prev_lsn, .. }
            | LogRecord::NewPage { prev_lsn, .. } => Some(*prev_lsn),
            LogRecord::CompensationInsert { undo_next_lsn, .. }
            | LogRecord::CompensationDelete { undo_next_lsn, .. } => Some(*undo_next_lsn),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            LogRecord::Begin { lsn, txn_id } => {
                buf.push(TAG_BEGIN);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, txn_id.0);
            }
            LogRecord::Commit {
                lsn,
                prev_lsn,
                txn_id,
            } => {
                buf.push(TAG_COMMIT);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, prev_lsn.0);
                put_u64(&mut buf, txn_id.0);
            }
            LogRecord::Abort {
                lsn,
                prev_lsn,
                txn_id,
            } => {
                buf.push(TAG_ABORT);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, prev_lsn.0);
                put_u64(&mut buf, txn_id.0);
            }
            LogRecord::Insert {
                lsn,
                prev_lsn,
                txn_id,
                rid,
                tuple,
            } => {
                buf.push(TAG_INSERT);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, prev_lsn.0);
                put_u64(&mut buf, txn_id.0);
                put_rid(&mut buf, *rid);
                put_bytes(&mut buf, tuple);
            }
            LogRecord::Delete {
                lsn,
                prev_lsn,
                txn_id,
                rid,
                old_tuple,
            } => {
                buf.push(TAG_DELETE);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, prev_lsn.0);
                put_u64(&mut buf, txn_id.0);
                put_rid(&mut buf, *rid);
                put_bytes(&mut buf, old_tuple);
            }
            LogRecord::Update {
                lsn,
                prev_lsn,
                txn_id,
                rid,
                old_tuple,
                new_tuple,
            } => {
                buf.push(TAG_UPDATE);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, prev_lsn.0);
                put_u64(&mut buf, txn_id.0);
                put_rid(&mut buf, *rid);
                put_bytes(&mut buf, old_tuple);
                put_bytes(&mut buf, new_tuple);
            }
            LogRecord::NewPage {
                lsn,
                prev_lsn,
                txn_id,
                page_id,
                prev_page_id,
            } => {
                buf.push(TAG_NEW_PAGE);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, prev_lsn.0);
                put_u64(&mut buf, txn_id.0);
                put_u32(&mut buf, page_id.0);
                put_u32(&mut buf, prev_page_id.0);
            }
            LogRecord::CompensationInsert {
                lsn,
                txn_id,
                compensates,
                undo_next_lsn,
                rid,
                tuple,
            } => {
                buf.push(TAG_CLR_INSERT);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, txn_id.0);
                put_u64(&mut buf, compensates.0);
                put_u64(&mut buf, undo_next_lsn.0);
                put_rid(&mut buf, *rid);
                put_bytes(&mut buf, tuple);
            }
            LogRecord::CompensationDelete {
                lsn,
                txn_id,
                compensates,
                undo_next_lsn,
                rid,
                old_tuple,
            } => {
                buf.push(TAG_CLR_DELETE);
                put_u64(&mut buf, lsn.0);
                put_u64(&mut buf, txn_id.0);
                put_u64(&mut buf, compensates.0);
                put_u64(&mut buf, undo_next_lsn.0);
                put_rid(&mut buf, *rid);
                put_bytes(&mut buf, old_tuple);
            }
            LogRecord::Checkpoint {
                lsn,
                active_txns,
                dirty_page_table,
            } => {
                buf.push(TAG_CHECKPOINT);
                put_u64(&mut buf, lsn.0);
                put_u32(&mut buf, active_txns.len() as u32);
                for (txn_id, last_lsn) in active_txns {
                    put_u64(&mut buf, txn_id.0);
                    put_u64(&mut buf, last_lsn.0);
                }
                put_u32(&mut buf, dirty_page_table.len() as u32);
                for (page_id, rec_lsn) in dirty_page_table {
                    put_u32(&mut buf, page_id.0);
                    put_u64(&mut buf, rec_lsn.0);
                }
            }
        }

        buf
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut cur = Cursor::new(bytes);
        let tag = cur.take_u8();

        match tag {
            TAG_BEGIN => LogRecord::Begin {
                lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
            },
            TAG_COMMIT => LogRecord::Commit {
                lsn: Lsn::new(cur.take_u64()),
                prev_lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
            },
            TAG_ABORT => LogRecord::Abort {
                lsn: Lsn::new(cur.take_u64()),
                prev_lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
            },
            TAG_INSERT => LogRecord::Insert {
                lsn: Lsn::new(cur.take_u64()),
                prev_lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
                rid: cur.take_rid(),
                tuple: cur.take_bytes(),
            },
            TAG_DELETE => LogRecord::Delete {
                lsn: Lsn::new(cur.take_u64()),
                prev_lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
                rid: cur.take_rid(),
                old_tuple: cur.take_bytes(),
            },
            TAG_UPDATE => LogRecord::Update {
                lsn: Lsn::new(cur.take_u64()),
                prev_lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
                rid: cur.take_rid(),
                old_tuple: cur.take_bytes(),
                new_tuple: cur.take_bytes(),
            },
            TAG_NEW_PAGE => LogRecord::NewPage {
                lsn: Lsn::new(cur.take_u64()),
                prev_lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
                page_id: PageId::new(cur.take_u32()),
                prev_page_id: PageId::new(cur.take_u32()),
            },
            TAG_CLR_INSERT => LogRecord::CompensationInsert {
                lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
                compensates: Lsn::new(cur.take_u64()),
                undo_next_lsn: Lsn::new(cur.take_u64()),
                rid: cur.take_rid(),
                tuple: cur.take_bytes(),
            },
            TAG_CLR_DELETE => LogRecord::CompensationDelete {
                lsn: Lsn::new(cur.take_u64()),
                txn_id: TxnId::new(cur.take_u64()),
                compensates: Lsn::new(cur.take_u64()),
                undo_next_lsn: Lsn::new(cur.take_u64()),
                rid: cur.take_rid(),
                old_tuple: cur.take_bytes(),
            },
            TAG_CHECKPOINT => {
                let lsn = Lsn::new(cur.take_u64());
                let n_txns = cur.take_u32();
                let mut active_txns = Vec::with_capacity(n_txns as usize);
                for _ in 0..n_txns {
                    active_txns.push((TxnId::new(cur.take_u64()), Lsn::new(cur.take_u64())));
                }
                let n_pages = cur.take_u32();
                let mut dirty_page_table = Vec::with_capacity(n_pages as usize);
                for _ in 0..n_pages {
                    dirty_page_table.push((PageId::new(cur.take_u32()), Lsn::new(cur.take_u64())));
                }
                LogRecord::Checkpoint {
                    lsn,
                    active_txns,
                    dirty_page_table,
                }
            }
            other => panic!("unknown log record tag {other}"),
        }
    }
}
