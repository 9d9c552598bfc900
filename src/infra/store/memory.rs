//! In-memory cache store.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::CacheEntry;
use crate::core::EngineResult;
use crate::infra::store::CacheStore;

/// Keeps the latest snapshot in memory. Clones share the snapshot, so a
/// second cache built over a clone starts with the first cache's entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    snapshot: Arc<Mutex<Vec<CacheEntry>>>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in the latest snapshot.
    pub fn len(&self) -> usize {
        self.snapshot.lock().len()
    }

    /// True when the latest snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshot.lock().is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&mut self) -> EngineResult<Vec<CacheEntry>> {
        Ok(self.snapshot.lock().clone())
    }

    fn persist(&mut self, entries: &[&CacheEntry]) -> EngineResult<()> {
        *self.snapshot.lock() = entries.iter().map(|e| (*e).clone()).collect();
        Ok(())
    }
}
