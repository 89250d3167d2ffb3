//! State store contract and backends
//!
//! The store is the only serialization point between callers: every write is
//! a compare-and-swap on the record version, so two callers that read the same
//! snapshot cannot both apply a decision based on it.
//!
//! This module provides:
//! - `StateStore`: the load / compare-and-swap contract a backend must honour
//! - `MemoryStore`: in-process backend keeping encoded records in a `DashMap`

use crate::{BreakerId, BreakerState, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// Versioned storage for breaker records
///
/// Backends can be anything with an atomic conditional write keyed by id
/// (a key-value store, a relational row, a distributed cache).
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Load the record for `id`, `None` if it was never written
    async fn load(&self, id: &BreakerId) -> Result<Option<BreakerState>, StoreError>;

    /// Atomically replace the record if its version still equals `expected`
    ///
    /// `expected = None` inserts only if no record exists. On success the
    /// stored record is returned with its new version (`expected + 1`, or 1 on
    /// insert). Stale writes fail with [`StoreError::VersionConflict`]; a
    /// versioned write to a missing record fails with [`StoreError::NotFound`].
    async fn compare_and_swap(
        &self,
        id: &BreakerId,
        expected: Option<u64>,
        state: BreakerState,
    ) -> Result<BreakerState, StoreError>;
}

#[async_trait]
impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    async fn load(&self, id: &BreakerId) -> Result<Option<BreakerState>, StoreError> {
        (**self).load(id).await
    }

    async fn compare_and_swap(
        &self,
        id: &BreakerId,
        expected: Option<u64>,
        state: BreakerState,
    ) -> Result<BreakerState, StoreError> {
        (**self).compare_and_swap(id, expected, state).await
    }
}

/// In-process state store
///
/// Records are kept JSON-encoded, so callers only ever see copies, the same
/// as with an external store. Per-key entry locking makes the version check
/// and the write a single atomic step.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of breaker records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop the record for one breaker
    pub fn remove(&self, id: &BreakerId) -> bool {
        self.records.remove(id.as_str()).is_some()
    }

    /// Drop all records
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, id: &BreakerId) -> Result<Option<BreakerState>, StoreError> {
        self.records
            .get(id.as_str())
            .map(|raw| BreakerState::from_json(raw.value()))
            .transpose()
    }

    async fn compare_and_swap(
        &self,
        id: &BreakerId,
        expected: Option<u64>,
        mut state: BreakerState,
    ) -> Result<BreakerState, StoreError> {
        match self.records.entry(id.as_str().to_string()) {
            Entry::Vacant(slot) => {
                if expected.is_some() {
                    return Err(StoreError::NotFound {
                        breaker: id.to_string(),
                    });
                }
                state.version = 1;
                slot.insert(state.to_json()?);
                Ok(state)
            }
            Entry::Occupied(mut slot) => {
                let actual = BreakerState::from_json(slot.get())?.version;
                if expected != Some(actual) {
                    return Err(StoreError::VersionConflict {
                        breaker: id.to_string(),
                        expected,
                        actual: Some(actual),
                    });
                }
                state.version = actual + 1;
                slot.insert(state.to_json()?);
                Ok(state)
            }
        }
    }
}
