//! Persistence store interface.
//!
//! The runtime treats the store as an object-addressed upsert sink: bytes in,
//! bytes out, keyed by the component's registered name plus the durable state
//! id. The real backend lives outside this crate; `MemoryStateStore` ships
//! here for tests and local development.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;

#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Insert-or-replace the serialized state.
    async fn upsert(&self, kind: &str, state_id: u64, bytes: &[u8]) -> Result<(), StoreError>;

    /// Load the serialized state, `None` when never persisted.
    async fn load(&self, kind: &str, state_id: u64) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-memory store double.
///
/// The failure toggles simulate a down backend so lifecycle tests can
/// exercise the save-retry and activation-retry paths.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: DashMap<(String, u64), Vec<u8>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, kind: &str, state_id: u64) -> bool {
        self.entries.contains_key(&(kind.to_string(), state_id))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn upsert(&self, kind: &str, state_id: u64, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::upsert_failed(kind, state_id, "writes disabled"));
        }
        self.entries
            .insert((kind.to_string(), state_id), bytes.to_vec());
        Ok(())
    }

    async fn load(&self, kind: &str, state_id: u64) -> Result<Option<Vec<u8>>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::load_failed(kind, state_id, "reads disabled"));
        }
        Ok(self
            .entries
            .get(&(kind.to_string(), state_id))
            .map(|v| v.value().clone()))
    }
}
