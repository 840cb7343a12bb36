//! # TideSync Storage
//!
//! Durable table store abstraction for TideSync.
//!
//! The sync engine does not own a persistence engine. It talks to named
//! tables through the [`Store`] and [`Table`] traits, which any local
//! database can implement. Rows are JSON documents keyed by a store-assigned
//! [`RowId`].
//!
//! ## Design Principles
//!
//! - Tables are opaque document stores (add, update, delete, iterate)
//! - Secondary indexes only affect iteration order
//! - Must be `Send + Sync` so sync tasks can run on any worker thread
//! - Visitors drive iteration one row at a time and may stop early
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and ephemeral use
//!
//! ## Example
//!
//! ```rust
//! use tidesync_storage::{InMemoryStore, Store, TableSchema};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! let table = store.open_table(&TableSchema::new("updates").with_index("queued_at")).unwrap();
//! let id = table.add(json!({"queued_at": 1, "payload": "x"})).unwrap();
//! assert_eq!(table.get(id).unwrap().unwrap().value["payload"], "x");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod index;
mod memory;
mod table;

pub use error::{StorageError, StorageResult};
pub use index::IndexKey;
pub use memory::{InMemoryStore, MemoryTable};
pub use table::{Row, RowId, Store, Table, TableSchema};
