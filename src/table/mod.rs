//! Table heap: a linked list of slotted pages storing schema-driven tuples.
//!
//! - [`tuple`] — schema-driven tuple encode/decode (nullability bitmap,
//!   inline fixed-width columns, `(offset, length)` varchar descriptors).
//! - [`TableHeap`] — insert/get/update/delete/iterate over the page chain.
//! - [`TupleIterator`] — a stable snapshot-at-creation scan over live tuples.

pub mod tuple;
mod heap;
mod iterator;

pub use heap::TableHeap;
pub use iterator::TupleIterator;
pub use tuple::Tuple;
