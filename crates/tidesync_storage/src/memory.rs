//! In-memory store for testing.

use crate::error::{StorageError, StorageResult};
use crate::index::IndexKey;
use crate::table::{Row, RowId, Store, Table, TableSchema};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// An in-memory store.
///
/// Suitable for unit tests, integration tests and ephemeral sessions that
/// don't need rows to survive a restart.
///
/// # Thread Safety
///
/// The store and its tables are thread-safe and can be shared across tasks.
///
/// # Example
///
/// ```rust
/// use tidesync_storage::{InMemoryStore, Store, TableSchema};
/// use serde_json::json;
///
/// let store = InMemoryStore::new();
/// let table = store.open_table(&TableSchema::new("pushlogs")).unwrap();
/// table.add(json!({"until": 0})).unwrap();
/// assert_eq!(table.len().unwrap(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Arc<MemoryTable>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the concrete table handle, if the table was opened.
    ///
    /// Useful for inspecting rows in tests.
    pub fn table(&self, name: &str) -> Option<Arc<MemoryTable>> {
        self.tables.read().get(name).cloned()
    }

    /// Closes the store. Every subsequent table operation fails with
    /// [`StorageError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Reopens a closed store.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

impl Store for InMemoryStore {
    fn open_table(&self, schema: &TableSchema) -> StorageResult<Arc<dyn Table>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }

        let mut tables = self.tables.write();
        if let Some(existing) = tables.get(&schema.name) {
            if existing.schema != *schema {
                return Err(StorageError::SchemaMismatch(schema.name.clone()));
            }
            return Ok(Arc::clone(existing) as Arc<dyn Table>);
        }

        let table = Arc::new(MemoryTable {
            schema: schema.clone(),
            rows: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            closed: Arc::clone(&self.closed),
        });
        tables.insert(schema.name.clone(), Arc::clone(&table));
        Ok(table as Arc<dyn Table>)
    }
}

/// A table held by [`InMemoryStore`].
#[derive(Debug)]
pub struct MemoryTable {
    schema: TableSchema,
    rows: RwLock<BTreeMap<RowId, Value>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl MemoryTable {
    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    /// Returns a copy of all rows in id order.
    pub fn rows(&self) -> Vec<Row> {
        self.rows
            .read()
            .iter()
            .map(|(id, value)| Row {
                id: *id,
                value: value.clone(),
            })
            .collect()
    }

    // Rows are copied out before visiting so the visitor may call back into
    // the table without deadlocking.
    fn visit(rows: Vec<Row>, visitor: &mut dyn FnMut(Row) -> ControlFlow<()>) {
        for row in rows {
            if visitor(row).is_break() {
                break;
            }
        }
    }
}

impl Table for MemoryTable {
    fn name(&self) -> &str {
        &self.schema.name
    }

    fn add(&self, value: Value) -> StorageResult<RowId> {
        self.check_open()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.write().insert(id, value);
        Ok(id)
    }

    fn update(&self, id: RowId, value: Value) -> StorageResult<()> {
        self.check_open()?;
        let mut rows = self.rows.write();
        match rows.get_mut(&id) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StorageError::RowNotFound {
                table: self.schema.name.clone(),
                id,
            }),
        }
    }

    fn delete(&self, id: RowId) -> StorageResult<()> {
        self.check_open()?;
        self.rows.write().remove(&id);
        Ok(())
    }

    fn get(&self, id: RowId) -> StorageResult<Option<Row>> {
        self.check_open()?;
        Ok(self.rows.read().get(&id).map(|value| Row {
            id,
            value: value.clone(),
        }))
    }

    fn all(&self, visitor: &mut dyn FnMut(Row) -> ControlFlow<()>) -> StorageResult<()> {
        self.check_open()?;
        Self::visit(self.rows(), visitor);
        Ok(())
    }

    fn all_by(
        &self,
        index: &str,
        visitor: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> StorageResult<()> {
        self.check_open()?;
        if !self.schema.has_index(index) {
            return Err(StorageError::UnknownIndex {
                table: self.schema.name.clone(),
                index: index.to_string(),
            });
        }

        let mut rows = self.rows();
        rows.sort_by(|a, b| {
            IndexKey::extract(&a.value, index)
                .cmp(&IndexKey::extract(&b.value, index))
                .then(a.id.cmp(&b.id))
        });
        Self::visit(rows, visitor);
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        self.check_open()?;
        Ok(self.rows.read().len())
    }
}
