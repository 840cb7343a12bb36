//! Store and table trait definitions.

use crate::error::StorageResult;
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Store-assigned row identifier.
///
/// Ids are allocated in increasing order, so primary-key order is insertion
/// order.
pub type RowId = u64;

/// A single stored row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Row id assigned by the store.
    pub id: RowId,
    /// Row document.
    pub value: Value,
}

/// Declaration of a named table and its secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Names of top-level document fields to index.
    pub indexes: Vec<String>,
}

impl TableSchema {
    /// Creates a schema with no secondary indexes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    /// Declares an index over the named top-level field.
    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        self.indexes.push(field.into());
        self
    }

    /// Returns true if the schema declares the given index.
    pub fn has_index(&self, field: &str) -> bool {
        self.indexes.iter().any(|i| i == field)
    }
}

/// A keyed document table.
///
/// # Invariants
///
/// - `add` returns an id never handed out before by this table
/// - `all` visits rows in ascending id order
/// - `all_by` visits rows ordered by the index field, ties broken by id
/// - Iteration is finite: rows added by the visitor are not visited
///
/// Visitors receive one row at a time and return [`ControlFlow::Continue`]
/// to step to the next row or [`ControlFlow::Break`] to stop. Every call to
/// `all` starts a fresh iteration.
pub trait Table: Send + Sync {
    /// Returns the table name.
    fn name(&self) -> &str;

    /// Inserts a new row and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be persisted.
    fn add(&self, value: Value) -> StorageResult<RowId>;

    /// Replaces the document stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::RowNotFound`] if the row does not exist.
    fn update(&self, id: RowId, value: Value) -> StorageResult<()>;

    /// Deletes the row stored under `id`.
    ///
    /// Deleting a missing row is not an error.
    fn delete(&self, id: RowId) -> StorageResult<()>;

    /// Fetches a single row.
    fn get(&self, id: RowId) -> StorageResult<Option<Row>>;

    /// Visits all rows in id order.
    fn all(&self, visitor: &mut dyn FnMut(Row) -> ControlFlow<()>) -> StorageResult<()>;

    /// Visits all rows ordered by a declared index.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::UnknownIndex`] if `index` was not
    /// declared in the table schema.
    fn all_by(
        &self,
        index: &str,
        visitor: &mut dyn FnMut(Row) -> ControlFlow<()>,
    ) -> StorageResult<()>;

    /// Returns the number of rows.
    fn len(&self) -> StorageResult<usize>;

    /// Returns true if the table holds no rows.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the first row in id order, if any.
    fn first(&self) -> StorageResult<Option<Row>> {
        let mut found = None;
        self.all(&mut |row| {
            found = Some(row);
            ControlFlow::Break(())
        })?;
        Ok(found)
    }

    /// Collects every row in id order.
    fn collect_all(&self) -> StorageResult<Vec<Row>> {
        let mut rows = Vec::new();
        self.all(&mut |row| {
            rows.push(row);
            ControlFlow::Continue(())
        })?;
        Ok(rows)
    }

    /// Collects every row ordered by a declared index.
    fn collect_by(&self, index: &str) -> StorageResult<Vec<Row>> {
        let mut rows = Vec::new();
        self.all_by(index, &mut |row| {
            rows.push(row);
            ControlFlow::Continue(())
        })?;
        Ok(rows)
    }
}

/// A collection of named tables.
pub trait Store: Send + Sync {
    /// Opens (creating if needed) the table described by `schema`.
    ///
    /// Opening the same table twice returns handles to the same rows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::SchemaMismatch`] if the table already
    /// exists with different indexes.
    fn open_table(&self, schema: &TableSchema) -> StorageResult<Arc<dyn Table>>;
}
