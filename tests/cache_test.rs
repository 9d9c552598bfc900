//! Latent cache integration tests.
//!
//! Covers:
//! 1. TTL expiry counted as a miss
//! 2. A 24 hour offline window where every operation succeeds locally
//! 3. Sync on reconnect, retries and dead letters
//! 4. Offline read misses fetched from the backend on reconnect
//! 5. Snapshot persistence through the JSONL store

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::clock;
use parking_lot::Mutex;
use serde_json::{json, Value};
use threshold_engine::cache::{LatentCache, OperationKind, QueuedOperation, SyncBackend};
use threshold_engine::config::CacheConfig;
use threshold_engine::core::{EngineError, EngineResult, HashChainLog};
use threshold_engine::infra::store::{JsonlCacheStore, MemoryCacheStore};
use threshold_engine::util::ManualClock;

fn cache(clock: &ManualClock) -> LatentCache {
    LatentCache::new(
        CacheConfig::default(),
        HashChainLog::in_memory("cache", clock.shared()),
        clock.shared(),
    )
}

#[test]
fn test_ttl_expiry_counts_as_miss() {
    let clock = clock();
    let mut cache = cache(&clock);

    cache.set("k", json!("v"), Some(Duration::from_secs(1)));
    assert_eq!(cache.get("k"), Some(json!("v")));

    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.get("k"), None);
    assert!(!cache.contains("k"));

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 0);
    assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
}

#[test]
fn test_default_ttl_and_cleanup() {
    let clock = clock();
    let mut cache = cache(&clock);
    cache.set("short", json!(1), Some(Duration::from_secs(10)));
    cache.set("long", json!(2), None);

    clock.advance(Duration::from_secs(11));
    assert_eq!(cache.cleanup_expired(), 1);
    assert!(cache.contains("long"));

    clock.advance(Duration::from_secs(3_600));
    assert_eq!(cache.cleanup_expired(), 1);
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_offline_day_every_operation_succeeds() {
    let clock = clock();
    let mut cache = cache(&clock);
    assert!(cache.set_online(false).is_none());

    let mut operations = 0;
    for hour in 0..24 {
        let key = format!("reading-{hour}");
        cache.set(&key, json!({ "hour": hour }), Some(Duration::from_secs(86_400)));
        assert_eq!(cache.get(&key), Some(json!({ "hour": hour })));
        operations += 2;
        if hour % 6 == 5 {
            assert!(cache.delete(&key));
            operations += 1;
        }
        clock.advance(Duration::from_secs(3_600));
    }

    assert_eq!(operations, 52);
    assert_eq!(cache.stats().misses, 0);
    // 24 writes and 4 deletes wait for the backend
    assert_eq!(cache.queue().len(), 28);
    assert!(cache.queue().iter().all(|op| op.attempts == 0));

    let report = cache.set_online(true).unwrap();
    assert_eq!(report.attempted, 28);
    assert_eq!(report.synced, 28);
    assert!(report.dead_lettered.is_empty());
    assert!(cache.queue().is_empty());
    assert!(cache.stats().last_sync_ms.is_some());
}

#[test]
fn test_sync_retries_then_dead_letters() {
    let clock = clock();
    let applied = Arc::new(Mutex::new(Vec::<String>::new()));
    let seen = Arc::clone(&applied);
    let backend = move |op: &QueuedOperation| -> EngineResult<()> {
        if op.key.starts_with("poison") {
            return Err(EngineError::SyncFailed(format!("backend rejected {}", op.key)));
        }
        seen.lock().push(op.key.clone());
        Ok(())
    };
    let mut cache = LatentCache::open(
        CacheConfig::default(),
        MemoryCacheStore::new(),
        backend,
        HashChainLog::in_memory("cache", clock.shared()),
        clock.shared(),
    )
    .unwrap();

    cache.set_online(false);
    cache.set("good", json!(true), None);
    cache.set("poison", json!(false), None);

    let first = cache.set_online(true).unwrap();
    assert_eq!(first.synced, 1);
    assert_eq!(first.retained, 1);
    assert_eq!(cache.queue()[0].attempts, 1);

    let second = cache.sync();
    assert_eq!(second.retained, 1);

    let third = cache.sync();
    assert_eq!(third.dead_lettered.len(), 1);
    assert_eq!(third.dead_lettered[0].key, "poison");
    assert_eq!(third.dead_lettered[0].kind, OperationKind::Write);
    assert_eq!(third.dead_lettered[0].attempts, 3);
    assert!(cache.queue().is_empty());
    assert_eq!(cache.dead_letters().len(), 1);
    assert_eq!(*applied.lock(), vec!["good".to_owned()]);

    // the local value is untouched
    assert_eq!(cache.get("poison"), Some(json!(false)));

    let events: Vec<String> = cache
        .log()
        .entries()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap().to_owned())
        .collect();
    assert!(events.contains(&"sync_dead_lettered".to_owned()));
    assert!(cache.verify_hash_chain().unwrap().is_intact());
}

#[test]
fn test_sync_is_skipped_while_offline() {
    let clock = clock();
    let mut cache = cache(&clock);
    cache.set_online(false);
    cache.set("k", json!(1), None);
    let report = cache.sync();
    assert!(report.skipped);
    assert_eq!(report.attempted, 0);
    assert_eq!(cache.queue().len(), 1);
}

/// Remote side holding values the local cache never saw.
struct RemoteStore {
    values: HashMap<String, Value>,
}

impl SyncBackend for RemoteStore {
    fn apply(&mut self, op: &QueuedOperation) -> EngineResult<()> {
        match op.kind {
            OperationKind::Write => {
                if let Some(value) = &op.value {
                    self.values.insert(op.key.clone(), value.clone());
                }
            }
            OperationKind::Delete => {
                self.values.remove(&op.key);
            }
            OperationKind::Read | OperationKind::Sync => {}
        }
        Ok(())
    }

    fn fetch(&mut self, key: &str) -> EngineResult<Option<Value>> {
        Ok(self.values.get(key).cloned())
    }
}

fn remote_cache(clock: &ManualClock, values: &[(&str, Value)]) -> LatentCache<RemoteStore> {
    let remote = RemoteStore {
        values: values
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect(),
    };
    LatentCache::open(
        CacheConfig::default(),
        MemoryCacheStore::new(),
        remote,
        HashChainLog::in_memory("cache", clock.shared()),
        clock.shared(),
    )
    .unwrap()
}

#[test]
fn test_offline_misses_queue_one_read_per_key() {
    let clock = clock();
    let mut cache = cache(&clock);
    cache.set_online(false);
    for _ in 0..1000 {
        assert_eq!(cache.get("remote-only"), None);
    }
    assert_eq!(cache.get("other"), None);

    assert_eq!(cache.stats().misses, 1001);
    assert_eq!(cache.queue().len(), 2);
    assert!(cache.queue().iter().all(|op| op.kind == OperationKind::Read));
}

#[test]
fn test_queued_read_fills_cache_after_reconnect() {
    let clock = clock();
    let mut cache = remote_cache(&clock, &[("remote", json!({ "from": "backend" }))]);
    cache.set_online(false);
    for _ in 0..50 {
        assert_eq!(cache.get("remote"), None);
    }
    assert_eq!(cache.get("absent"), None);

    let report = cache.set_online(true).unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.synced, 2);
    assert!(cache.queue().is_empty());

    assert_eq!(cache.get("remote"), Some(json!({ "from": "backend" })));
    assert_eq!(cache.get("absent"), None);
    // online misses are not queued
    assert!(cache.queue().is_empty());
    assert!(cache.verify_hash_chain().unwrap().is_intact());
}

#[test]
fn test_fetched_value_does_not_clobber_local_write() {
    let clock = clock();
    let mut cache = remote_cache(&clock, &[("k", json!("stale"))]);
    cache.set_online(false);
    assert_eq!(cache.get("k"), None);
    cache.set("k", json!("fresh"), None);

    let report = cache.set_online(true).unwrap();
    assert_eq!(report.synced, 2);
    assert_eq!(cache.get("k"), Some(json!("fresh")));
}

#[test]
fn test_jsonl_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache_store.jsonl");
    let clock = clock();

    {
        let mut cache = LatentCache::open(
            CacheConfig::default(),
            JsonlCacheStore::open(&path).unwrap(),
            threshold_engine::cache::NoopSyncBackend,
            HashChainLog::in_memory("cache", clock.shared()),
            clock.shared(),
        )
        .unwrap();
        cache.set("keep", json!({ "n": 1 }), None);
        cache.set("brief", json!("x"), Some(Duration::from_secs(5)));
    }

    clock.advance(Duration::from_secs(10));
    let mut reopened = LatentCache::open(
        CacheConfig::default(),
        JsonlCacheStore::open(&path).unwrap(),
        threshold_engine::cache::NoopSyncBackend,
        HashChainLog::in_memory("cache", clock.shared()),
        clock.shared(),
    )
    .unwrap();
    assert_eq!(reopened.get("keep"), Some(json!({ "n": 1 })));
    assert!(!reopened.contains("brief"));
    assert_eq!(reopened.stats().entries, 1);
}
