//! Local application of fetched updates.

use crate::error::ApplyError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;

/// Materializes remote mutations into the local database.
///
/// Conflict resolution and merge logic live behind this trait.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Applies `items` and returns one result per item, in order.
    async fn publish(&self, items: &[Value]) -> Vec<Result<(), ApplyError>>;
}

/// Returns the first per-item failure, if any.
pub fn first_error(results: Vec<Result<(), ApplyError>>) -> Option<ApplyError> {
    results.into_iter().find_map(Result::err)
}

/// An in-memory publisher for testing.
///
/// Records every applied item. Scripted failures are consumed one batch at a
/// time.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    applied: RwLock<Vec<Value>>,
    batches: Mutex<usize>,
    failures: Mutex<VecDeque<ApplyError>>,
}

impl MemoryPublisher {
    /// Creates a new memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next publish call fail with `error`.
    pub fn fail_next(&self, error: ApplyError) {
        self.failures.lock().push_back(error);
    }

    /// Gets all applied items.
    pub fn applied(&self) -> Vec<Value> {
        self.applied.read().clone()
    }

    /// Number of publish calls, failed ones included.
    pub fn batches(&self) -> usize {
        *self.batches.lock()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, items: &[Value]) -> Vec<Result<(), ApplyError>> {
        *self.batches.lock() += 1;
        if let Some(error) = self.failures.lock().pop_front() {
            return items
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    if i == error.index {
                        Err(error.clone())
                    } else {
                        Ok(())
                    }
                })
                .collect();
        }

        self.applied.write().extend(items.iter().cloned());
        items.iter().map(|_| Ok(())).collect()
    }
}
