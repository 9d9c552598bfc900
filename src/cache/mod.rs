//! Offline-first latent cache.
//!
//! Reads and writes always apply to the local cache immediately. While the
//! cache is offline, writes and deletes are additionally queued and replayed
//! against a [`SyncBackend`] once connectivity returns. Operations that keep
//! failing past their attempt budget are moved to a dead-letter list and
//! reported in the [`SyncReport`] rather than silently dropped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::CacheConfig;
use crate::core::audit::{ChainStatus, HashChainLog};
use crate::core::EngineResult;
use crate::infra::store::{CacheStore, MemoryCacheStore};
use crate::util::clock::SharedClock;

/// A cached value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Lookup key.
    pub key: String,
    /// Stored value.
    pub value: Value,
    /// Insertion time.
    pub created_at_ms: u64,
    /// Expiry time.
    pub expires_at_ms: u64,
    /// Hits served.
    pub access_count: u64,
    /// Time of the latest hit.
    pub last_accessed_ms: u64,
}

impl CacheEntry {
    /// True once `now_ms` reaches the expiry.
    pub const fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Kind of queued operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Fetch a key that missed while offline.
    Read,
    /// Push a value.
    Write,
    /// Remove a key.
    Delete,
    /// Full reconciliation marker.
    Sync,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Sync => "sync",
        })
    }
}

/// Operation buffered while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    /// Unique operation id.
    pub id: String,
    /// What to replay.
    pub kind: OperationKind,
    /// Affected key.
    pub key: String,
    /// Value for writes.
    pub value: Option<Value>,
    /// When the operation was queued.
    pub timestamp_ms: u64,
    /// Replay attempts so far.
    pub attempts: u32,
    /// Attempts allowed before dead-lettering.
    pub max_attempts: u32,
}

/// Replay target for queued operations.
pub trait SyncBackend: Send {
    /// Apply one write or delete remotely.
    fn apply(&mut self, op: &QueuedOperation) -> EngineResult<()>;

    /// Fetch `key` for a read that missed while offline.
    ///
    /// `Ok(None)` means the remote side has no value either.
    fn fetch(&mut self, key: &str) -> EngineResult<Option<Value>> {
        tracing::debug!(key, "no remote read path");
        Ok(None)
    }
}

/// Backend that acknowledges every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyncBackend;

impl SyncBackend for NoopSyncBackend {
    fn apply(&mut self, op: &QueuedOperation) -> EngineResult<()> {
        tracing::debug!(op = %op.id, kind = %op.kind, key = %op.key, "replayed");
        Ok(())
    }
}

impl<F> SyncBackend for F
where
    F: FnMut(&QueuedOperation) -> EngineResult<()> + Send,
{
    fn apply(&mut self, op: &QueuedOperation) -> EngineResult<()> {
        self(op)
    }
}

/// Result of one [`LatentCache::sync`] pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// True when the cache was offline and nothing was attempted.
    pub skipped: bool,
    /// Operations attempted.
    pub attempted: usize,
    /// Operations applied.
    pub synced: usize,
    /// Failed operations kept for another pass.
    pub retained: usize,
    /// Operations that exhausted their attempts.
    pub dead_lettered: Vec<QueuedOperation>,
}

/// Cache counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Live entries, expired ones included until touched.
    pub entries: usize,
    /// Hits.
    pub hits: u64,
    /// Misses.
    pub misses: u64,
    /// Hits per lookup in percent; 0 without lookups.
    pub hit_rate: f64,
    /// Operations waiting for sync.
    pub queued: usize,
    /// Operations given up on.
    pub dead_letters: usize,
    /// Connectivity flag.
    pub online: bool,
    /// Time of the last sync pass.
    pub last_sync_ms: Option<u64>,
}

/// Local key/value cache with TTL expiry and an offline operation queue.
pub struct LatentCache<B = NoopSyncBackend> {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    store: Box<dyn CacheStore>,
    backend: B,
    online: bool,
    queue: VecDeque<QueuedOperation>,
    dead_letters: VecDeque<QueuedOperation>,
    hits: u64,
    misses: u64,
    last_sync_ms: Option<u64>,
    log: HashChainLog,
    clock: SharedClock,
}

impl<B> fmt::Debug for LatentCache<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatentCache")
            .field("entries", &self.entries.len())
            .field("online", &self.online)
            .field("queued", &self.queue.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish_non_exhaustive()
    }
}

impl LatentCache<NoopSyncBackend> {
    /// In-memory cache that acknowledges every sync.
    pub fn new(config: CacheConfig, log: HashChainLog, clock: SharedClock) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            store: Box::new(MemoryCacheStore::new()),
            backend: NoopSyncBackend,
            online: true,
            queue: VecDeque::new(),
            dead_letters: VecDeque::new(),
            hits: 0,
            misses: 0,
            last_sync_ms: None,
            log,
            clock,
        }
    }
}

impl<B: SyncBackend> LatentCache<B> {
    /// Cache over a persistent store and sync backend, loading the stored
    /// snapshot and dropping entries that expired meanwhile.
    pub fn open(
        config: CacheConfig,
        mut store: impl CacheStore + 'static,
        backend: B,
        log: HashChainLog,
        clock: SharedClock,
    ) -> EngineResult<Self> {
        let now = clock.now_ms();
        let entries: HashMap<String, CacheEntry> = store
            .load()?
            .into_iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| (e.key.clone(), e))
            .collect();
        tracing::debug!(entries = entries.len(), "cache snapshot loaded");
        Ok(Self {
            config,
            entries,
            store: Box::new(store),
            backend,
            online: true,
            queue: VecDeque::new(),
            dead_letters: VecDeque::new(),
            hits: 0,
            misses: 0,
            last_sync_ms: None,
            log,
            clock,
        })
    }

    /// Look up `key`. Expired entries are removed and count as misses.
    ///
    /// A miss while offline queues one `Read` per key so the value can be
    /// fetched on sync.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = self.clock.now_ms();
        match self.entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.access_count += 1;
                entry.last_accessed_ms = now;
                self.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {
                self.entries.remove(key);
                self.log.record("cache_expired", json!({ "key": key }));
                self.persist();
            }
            None => {}
        }
        self.misses += 1;
        if !self.online && !self.read_pending(key) {
            self.enqueue(OperationKind::Read, key, None);
        }
        None
    }

    /// True if `key` holds an unexpired value. Does not touch counters.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }

    /// Store `value` under `key` for `ttl`, or the configured default.
    pub fn set(&mut self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = self.clock.now_ms();
        let ttl_ms = ttl.map_or(self.config.default_ttl_secs * 1000, |d| {
            u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
        });
        let entry = CacheEntry {
            key: key.to_owned(),
            value: value.clone(),
            created_at_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms),
            access_count: 0,
            last_accessed_ms: now,
        };
        self.entries.insert(key.to_owned(), entry);
        self.log.record(
            "cache_set",
            json!({ "key": key, "ttl_ms": ttl_ms, "offline": !self.online }),
        );
        self.persist();
        if !self.online {
            self.enqueue(OperationKind::Write, key, Some(value));
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        let existed = self.entries.remove(key).is_some();
        self.log.record(
            "cache_delete",
            json!({ "key": key, "existed": existed, "offline": !self.online }),
        );
        self.persist();
        if !self.online {
            self.enqueue(OperationKind::Delete, key, None);
        }
        existed
    }

    /// Remove every expired entry and return how many went.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.log.record("cache_cleanup", json!({ "removed": removed }));
            self.persist();
        }
        removed
    }

    /// Switch connectivity. Going online triggers a sync.
    pub fn set_online(&mut self, online: bool) -> Option<SyncReport> {
        let was_online = self.online;
        self.online = online;
        if was_online != online {
            tracing::info!(online, queued = self.queue.len(), "cache connectivity changed");
            self.log.record("connectivity_changed", json!({ "online": online }));
        }
        (!was_online && online).then(|| self.sync())
    }

    /// Replay every queued operation once.
    pub fn sync(&mut self) -> SyncReport {
        if !self.online {
            return SyncReport {
                skipped: true,
                ..SyncReport::default()
            };
        }

        let mut report = SyncReport::default();
        let mut filled = 0usize;
        let pending: Vec<QueuedOperation> = self.queue.drain(..).collect();
        for mut op in pending {
            report.attempted += 1;
            op.attempts += 1;
            let outcome = match op.kind {
                OperationKind::Read => self.backend.fetch(&op.key),
                _ => self.backend.apply(&op).map(|()| None),
            };
            match outcome {
                Ok(fetched) => {
                    report.synced += 1;
                    if let Some(value) = fetched {
                        filled += usize::from(self.fill(&op.key, value));
                    }
                }
                Err(e) if op.attempts < op.max_attempts => {
                    tracing::debug!(op = %op.id, attempts = op.attempts, "sync failed, retained: {}", e);
                    report.retained += 1;
                    self.queue.push_back(op);
                }
                Err(e) => {
                    tracing::warn!(op = %op.id, key = %op.key, attempts = op.attempts, "sync gave up: {}", e);
                    self.log.record(
                        "sync_dead_lettered",
                        json!({
                            "operation_id": op.id,
                            "kind": op.kind,
                            "key": op.key,
                            "attempts": op.attempts,
                            "error": e.to_string(),
                        }),
                    );
                    if self.dead_letters.len() >= self.config.dead_letter_capacity {
                        self.dead_letters.pop_front();
                    }
                    self.dead_letters.push_back(op.clone());
                    report.dead_lettered.push(op);
                }
            }
        }

        if filled > 0 {
            self.persist();
        }
        self.last_sync_ms = Some(self.clock.now_ms());
        self.log.record(
            "sync_completed",
            json!({
                "attempted": report.attempted,
                "synced": report.synced,
                "filled": filled,
                "retained": report.retained,
                "dead_lettered": report.dead_lettered.len(),
            }),
        );
        report
    }

    fn read_pending(&self, key: &str) -> bool {
        self.queue
            .iter()
            .any(|op| op.kind == OperationKind::Read && op.key == key)
    }

    /// Insert a fetched value unless a live local value already exists.
    fn fill(&mut self, key: &str, value: Value) -> bool {
        if self.contains(key) {
            return false;
        }
        let now = self.clock.now_ms();
        let ttl_ms = self.config.default_ttl_secs * 1000;
        self.entries.insert(
            key.to_owned(),
            CacheEntry {
                key: key.to_owned(),
                value,
                created_at_ms: now,
                expires_at_ms: now.saturating_add(ttl_ms),
                access_count: 0,
                last_accessed_ms: now,
            },
        );
        self.log.record("cache_filled", json!({ "key": key, "ttl_ms": ttl_ms }));
        true
    }

    fn enqueue(&mut self, kind: OperationKind, key: &str, value: Option<Value>) {
        let op = QueuedOperation {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            key: key.to_owned(),
            value,
            timestamp_ms: self.clock.now_ms(),
            attempts: 0,
            max_attempts: self.config.max_sync_attempts,
        };
        self.log.record(
            "operation_queued",
            json!({ "operation_id": op.id, "kind": kind, "key": key }),
        );
        self.queue.push_back(op);
    }

    fn persist(&mut self) {
        let entries: Vec<&CacheEntry> = self.entries.values().collect();
        if let Err(e) = self.store.persist(&entries) {
            tracing::error!("failed to persist cache snapshot: {}", e);
        }
    }

    /// Connectivity flag.
    pub const fn is_online(&self) -> bool {
        self.online
    }

    /// Operations waiting for sync, oldest first.
    pub const fn queue(&self) -> &VecDeque<QueuedOperation> {
        &self.queue
    }

    /// Operations given up on, oldest first.
    pub const fn dead_letters(&self) -> &VecDeque<QueuedOperation> {
        &self.dead_letters
    }

    /// Hits per lookup in percent.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        match self.hits + self.misses {
            0 => 0.0,
            total => self.hits as f64 / total as f64 * 100.0,
        }
    }

    /// Counters snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: self.hit_rate(),
            queued: self.queue.len(),
            dead_letters: self.dead_letters.len(),
            online: self.online,
            last_sync_ms: self.last_sync_ms,
        }
    }

    /// The cache's hash-chained log.
    pub const fn log(&self) -> &HashChainLog {
        &self.log
    }

    /// Verify the cache log.
    pub fn verify_hash_chain(&self) -> EngineResult<ChainStatus> {
        self.log.verify_hash_chain()
    }
}
