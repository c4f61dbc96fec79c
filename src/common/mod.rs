//! Common types and utilities shared across SamehadaDB.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants ([`config`])
//! - The unified [`Error`]/[`Result`] type
//! - Identifiers ([`PageId`], [`FrameId`], [`TxnId`], [`Lsn`], [`Rid`])
//! - The tagged [`value::Value`] model and [`schema::Schema`]/[`schema::Column`]

pub mod config;
pub mod error;
mod frame_id;
mod lsn;
mod page_id;
mod rid;
pub mod schema;
mod txn_id;
pub mod value;

pub use error::{Error, Result};
pub use frame_id::FrameId;
pub use lsn::{Lsn, LsnGenerator};
pub use page_id::PageId;
pub use rid::Rid;
pub use schema::{Column, IndexKind, Schema};
pub use txn_id::{TxnId, TxnIdGenerator};
pub use value::{TypeId, Value};
