//! The catalog root page (always page id 0): a length-prefixed list of
//! table entries, rewritten in full every time `create_table` runs.
//!
//! ```text
//! [next_oid: u32][table_count: u32]
//! repeated table_count times:
//!     [oid: u32][name_len: u32][name bytes][first_page_id: u32]
//!     [column_count: u32]
//!     repeated column_count times:
//!         [name_len: u32][name bytes][type_tag: u8][index_kind: u8]
//!         [index_header_page_id: u32] (PageId::INVALID.0 when unindexed)
//! ```
//! One page's worth of tables only — `write_to` returns `Error::CatalogFull`
//! rather than spilling to a second page (see `DESIGN.md`).

use crate::catalog::TableOid;
use crate::common::schema::{Column, IndexKind, Schema};
use crate::common::value::TypeId;
use crate::common::{Error, PageId, Result};

const HEADER_SIZE: usize = 8;

const TYPE_INTEGER: u8 = 0;
const TYPE_FLOAT: u8 = 1;
const TYPE_VARCHAR: u8 = 2;
const TYPE_BOOLEAN: u8 = 3;

const INDEX_NONE: u8 = 0;
const INDEX_HASH: u8 = 1;

fn encode_type_id(type_id: TypeId) -> u8 {
    match type_id {
        TypeId::Integer => TYPE_INTEGER,
        TypeId::Float => TYPE_FLOAT,
        TypeId::Varchar => TYPE_VARCHAR,
        TypeId::Boolean => TYPE_BOOLEAN,
    }
}

fn decode_type_id(tag: u8) -> TypeId {
    match tag {
        TYPE_FLOAT => TypeId::Float,
        TYPE_VARCHAR => TypeId::Varchar,
        TYPE_BOOLEAN => TypeId::Boolean,
        _ => TypeId::Integer,
    }
}

fn encode_index_kind(kind: IndexKind) -> u8 {
    match kind {
        IndexKind::None => INDEX_NONE,
        IndexKind::Hash => INDEX_HASH,
    }
}

fn decode_index_kind(tag: u8) -> IndexKind {
    match tag {
        INDEX_HASH => IndexKind::Hash,
        _ => IndexKind::None,
    }
}

fn read_u32(data: &[u8], cursor: &mut usize) -> u32 {
    let v = u32::from_le_bytes(data[*cursor..*cursor + 4].try_into().unwrap());
    *cursor += 4;
    v
}

fn write_u32(data: &mut [u8], cursor: &mut usize, value: u32) {
    data[*cursor..*cursor + 4].copy_from_slice(&value.to_le_bytes());
    *cursor += 4;
}

fn read_string(data: &[u8], cursor: &mut usize) -> String {
    let len = read_u32(data, cursor) as usize;
    let s = std::str::from_utf8(&data[*cursor..*cursor + len])
        .expect("catalog table/column name must be valid utf8")
        .to_string();
    *cursor += len;
    s
}

fn write_string(data: &mut [u8], cursor: &mut usize, s: &str) {
    write_u32(data, cursor, s.len() as u32);
    data[*cursor..*cursor + s.len()].copy_from_slice(s.as_bytes());
    *cursor += s.len();
}

/// One table's persisted metadata: identity, schema, and the head of its
/// heap page chain. Index header pages live inline on `schema`'s columns.
pub(super) struct TableEntry {
    pub oid: TableOid,
    pub name: String,
    pub first_page_id: PageId,
    pub schema: Schema,
}

pub(super) struct CatalogRootPage {
    pub next_oid: TableOid,
    pub entries: Vec<TableEntry>,
}

impl CatalogRootPage {
    pub fn empty() -> Self {
        Self {
            next_oid: 1,
            entries: Vec::new(),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        let mut cursor = 0usize;
        let next_oid = read_u32(data, &mut cursor);
        let table_count = read_u32(data, &mut cursor);

        let mut entries = Vec::with_capacity(table_count as usize);
        for _ in 0..table_count {
            let oid = read_u32(data, &mut cursor);
            let name = read_string(data, &mut cursor);
            let first_page_id = PageId::new(read_u32(data, &mut cursor));
            let column_count = read_u32(data, &mut cursor);

            let mut columns = Vec::with_capacity(column_count as usize);
            for _ in 0..column_count {
                let col_name = read_string(data, &mut cursor);
                let type_id = decode_type_id(data[cursor]);
                cursor += 1;
                let index_kind = decode_index_kind(data[cursor]);
                cursor += 1;
                let index_header_page_id = PageId::new(read_u32(data, &mut cursor));

                let mut column = Column::new(col_name, type_id, index_kind);
                if index_header_page_id.is_valid() {
                    column.set_index_header_page_id(index_header_page_id);
                }
                columns.push(column);
            }

            entries.push(TableEntry {
                oid,
                name,
                first_page_id,
                schema: Schema::new(columns),
            });
        }

        Self { next_oid, entries }
    }

    pub fn encoded_len(&self) -> usize {
        let mut len = HEADER_SIZE;
        for entry in &self.entries {
            len += 4 + 4 + entry.name.len() + 4 + 4;
            for column in entry.schema.columns() {
                len += 4 + column.name().len() + 1 + 1 + 4;
            }
        }
        len
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        if self.encoded_len() > data.len() {
            return Err(Error::CatalogFull);
        }

        let mut cursor = 0usize;
        write_u32(data, &mut cursor, self.next_oid);
        write_u32(data, &mut cursor, self.entries.len() as u32);

        for entry in &self.entries {
            write_u32(data, &mut cursor, entry.oid);
            write_string(data, &mut cursor, &entry.name);
            write_u32(data, &mut cursor, entry.first_page_id.0);
            write_u32(data, &mut cursor, entry.schema.column_count() as u32);

            for column in entry.schema.columns() {
                write_string(data, &mut cursor, column.name());
                data[cursor] = encode_type_id(column.type_id());
                cursor += 1;
                data[cursor] = encode_index_kind(column.index_kind());
                cursor += 1;
                let index_page = column
                    .index_header_page_id()
                    .unwrap_or(PageId::INVALID);
                write_u32(data, &mut cursor, index_page.0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::PAGE_SIZE;

    #[test]
    fn test_roundtrip_empty() {
        let root = CatalogRootPage::empty();
        let mut buf = vec![0u8; PAGE_SIZE];
        root.write_to(&mut buf).unwrap();
        let recovered = CatalogRootPage::from_bytes(&buf);
        assert_eq!(recovered.next_oid, 1);
        assert!(recovered.entries.is_empty());
    }

    #[test]
    fn test_roundtrip_with_tables() {
        let schema = Schema::new(vec![
            Column::new("id", TypeId::Integer, IndexKind::Hash),
            Column::new("name", TypeId::Varchar, IndexKind::None),
        ]);
        let mut root = CatalogRootPage::empty();
        root.next_oid = 1;
        root.entries.push(TableEntry {
            oid: 0,
            name: "users".to_string(),
            first_page_id: PageId::new(3),
            schema,
        });
        root.entries[0]
            .schema
            .get_column_mut(0)
            .set_index_header_page_id(PageId::new(9));

        let mut buf = vec![0u8; PAGE_SIZE];
        root.write_to(&mut buf).unwrap();
        let recovered = CatalogRootPage::from_bytes(&buf);

        assert_eq!(recovered.next_oid, 1);
        assert_eq!(recovered.entries.len(), 1);
        let entry = &recovered.entries[0];
        assert_eq!(entry.oid, 0);
        assert_eq!(entry.name, "users");
        assert_eq!(entry.first_page_id, PageId::new(3));
        assert_eq!(entry.schema.column_count(), 2);
        assert_eq!(
            entry.schema.get_column(0).index_header_page_id(),
            Some(PageId::new(9))
        );
        assert_eq!(entry.schema.get_column(1).index_header_page_id(), None);
    }

    #[test]
    fn test_catalog_full_when_oversized() {
        let schema = Schema::new(vec![Column::new("a", TypeId::Integer, IndexKind::None)]);
        let mut root = CatalogRootPage::empty();
        for i in 0..5000u32 {
            root.entries.push(TableEntry {
                oid: i,
                name: format!("table_{i}"),
                first_page_id: PageId::new(i),
                schema: schema.clone(),
            });
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(matches!(root.write_to(&mut buf), Err(Error::CatalogFull)));
    }
}
