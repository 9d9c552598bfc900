//! Cache entry persistence backends.
//!
//! Stores hold a snapshot of the live cache entries. The cache rewrites the
//! snapshot after every mutation and loads it once at start-up.

pub mod file;
pub mod memory;

pub use file::JsonlCacheStore;
pub use memory::MemoryCacheStore;

use crate::cache::CacheEntry;
use crate::core::EngineResult;

/// Snapshot persistence for [`LatentCache`](crate::cache::LatentCache).
pub trait CacheStore: Send {
    /// Load the last persisted snapshot.
    fn load(&mut self) -> EngineResult<Vec<CacheEntry>>;
    /// Replace the persisted snapshot with `entries`.
    fn persist(&mut self, entries: &[&CacheEntry]) -> EngineResult<()>;
}
