//! Schema-driven tuple encoding.
//!
//! ```text
//! [null bitmap: ceil(ncols/8) bytes]
//! [inline region: schema.inline_size() bytes]
//!     fixed-width columns store their value directly;
//!     varchar columns store an (offset: u32, length: u32) descriptor
//!     pointing into the payload region below.
//! [varchar payload: concatenated bytes, one run per varchar column, in
//!     column order]
//! ```
//! A tuple's bytes are schema-agnostic once encoded — `Tuple` is just a
//! byte buffer; every accessor takes the `Schema` it was encoded against.

use crate::common::schema::Schema;
use crate::common::value::TypeId;
use crate::common::Value;

/// A single schema-driven record, stored as a flat byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    /// Encode `values` (must be in schema column order and length) into a
    /// tuple's wire format.
    pub fn from_values(schema: &Schema, values: &[Value]) -> Self {
        assert_eq!(
            values.len(),
            schema.column_count(),
            "value count must match schema column count"
        );

        let bitmap_bytes = schema.null_bitmap_bytes();
        let inline_size = schema.inline_size();
        let mut bitmap = vec![0u8; bitmap_bytes];
        let mut inline = vec![0u8; inline_size];
        let mut payload: Vec<u8> = Vec::new();

        for (idx, (column, value)) in schema.columns().iter().zip(values).enumerate() {
            if value.is_null() {
                bitmap[idx / 8] |= 1 << (idx % 8);
                continue;
            }

            let off = schema.column_offset(idx);
            match column.type_id() {
                TypeId::Integer => {
                    let v = value.as_integer().expect("schema/value type mismatch");
                    inline[off..off + 4].copy_from_slice(&v.to_le_bytes());
                }
                TypeId::Float => {
                    let v = value.as_float().expect("schema/value type mismatch");
                    inline[off..off + 4].copy_from_slice(&v.to_le_bytes());
                }
                TypeId::Boolean => {
                    let v = value.as_boolean().expect("schema/value type mismatch");
                    inline[off] = v as u8;
                }
                TypeId::Varchar => {
                    let s = value.as_varchar().expect("schema/value type mismatch");
                    let payload_offset =
                        (bitmap_bytes + inline_size + payload.len()) as u32;
                    inline[off..off + 4].copy_from_slice(&payload_offset.to_le_bytes());
                    inline[off + 4..off + 8].copy_from_slice(&(s.len() as u32).to_le_bytes());
                    payload.extend_from_slice(s.as_bytes());
                }
            }
        }

        let mut data = Vec::with_capacity(bitmap_bytes + inline_size + payload.len());
        data.extend_from_slice(&bitmap);
        data.extend_from_slice(&inline);
        data.extend_from_slice(&payload);
        Self { data }
    }

    /// Wrap already-encoded bytes (as read back from a page) as a `Tuple`.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_null(&self, schema: &Schema, col_idx: usize) -> bool {
        let byte = self.data[col_idx / 8];
        byte & (1 << (col_idx % 8)) != 0
    }

    /// Decode the value of column `col_idx` against `schema`.
    pub fn get_value(&self, schema: &Schema, col_idx: usize) -> Value {
        let column = schema.get_column(col_idx);
        if self.is_null(schema, col_idx) {
            return Value::null(column.type_id());
        }

        let bitmap_bytes = schema.null_bitmap_bytes();
        let off = bitmap_bytes + schema.column_offset(col_idx);

        match column.type_id() {
            TypeId::Integer => {
                let bytes: [u8; 4] = self.data[off..off + 4].try_into().unwrap();
                Value::integer(i32::from_le_bytes(bytes))
            }
            TypeId::Float => {
                let bytes: [u8; 4] = self.data[off..off + 4].try_into().unwrap();
                Value::float(f32::from_le_bytes(bytes))
            }
            TypeId::Boolean => Value::boolean(self.data[off] != 0),
            TypeId::Varchar => {
                let offset =
                    u32::from_le_bytes(self.data[off..off + 4].try_into().unwrap()) as usize;
                let length =
                    u32::from_le_bytes(self.data[off + 4..off + 8].try_into().unwrap()) as usize;
                let s = std::str::from_utf8(&self.data[offset..offset + length])
                    .expect("varchar payload must be valid utf8");
                Value::varchar(s)
            }
        }
    }
}
