//! Wire configuration, clock, log stores, executor and sync backend into an
//! [`Engine`].

use std::fs;
use std::path::Path;

use crate::cache::{LatentCache, NoopSyncBackend, SyncBackend};
use crate::config::EngineConfig;
use crate::core::audit::{HashChainLog, JsonlLogStore};
use crate::core::executor::{SimulatedExecutor, TaskExecutor};
use crate::core::scheduler::TaskScheduler;
use crate::core::EngineResult;
use crate::entity::EntityManager;
use crate::infra::store::{JsonlCacheStore, MemoryCacheStore};
use crate::mesh::{NavigationMesh, TokenSecret};
use crate::metrics::MetricsCollector;
use crate::runtime::api::Engine;
use crate::util::clock::{system_clock, SharedClock};

/// File name of the cache snapshot inside `log_dir`.
pub const CACHE_STORE_FILE: &str = "cache_store.jsonl";

/// Component names, also the log file stems.
pub const COMPONENTS: [&str; 5] = ["scheduler", "mesh", "cache", "entity", "metrics"];

/// Builder for [`Engine`].
///
/// ```rust
/// use threshold_engine::builders::EngineBuilder;
/// use threshold_engine::mesh::TokenSecret;
///
/// let engine = EngineBuilder::new()
///     .with_secret(TokenSecret::new(vec![7u8; 32]).unwrap())
///     .build()
///     .unwrap();
/// assert!(engine.status().scheduler.health.healthy);
/// ```
#[derive(Debug)]
pub struct EngineBuilder<E = SimulatedExecutor, B = NoopSyncBackend> {
    config: EngineConfig,
    clock: Option<SharedClock>,
    secret: Option<TokenSecret>,
    executor: E,
    backend: B,
}

impl EngineBuilder {
    /// Builder with default configuration, simulated execution and a no-op sync backend.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            clock: None,
            secret: None,
            executor: SimulatedExecutor,
            backend: NoopSyncBackend,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: TaskExecutor, B: SyncBackend> EngineBuilder<E, B> {
    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use `secret` instead of reading `mesh.secret_env`.
    #[must_use]
    pub fn with_secret(mut self, secret: TokenSecret) -> Self {
        self.secret = Some(secret);
        self
    }

    /// Run tasks with `executor`.
    pub fn with_executor<E2: TaskExecutor>(self, executor: E2) -> EngineBuilder<E2, B> {
        EngineBuilder {
            config: self.config,
            clock: self.clock,
            secret: self.secret,
            executor,
            backend: self.backend,
        }
    }

    /// Replay offline cache operations against `backend`.
    pub fn with_sync_backend<B2: SyncBackend>(self, backend: B2) -> EngineBuilder<E, B2> {
        EngineBuilder {
            config: self.config,
            clock: self.clock,
            secret: self.secret,
            executor: self.executor,
            backend,
        }
    }

    /// Validate configuration, open stores and assemble the engine.
    pub fn build(self) -> EngineResult<Engine<E, B>> {
        let Self {
            config,
            clock,
            secret,
            executor,
            backend,
        } = self;
        config.validate()?;
        let clock = clock.unwrap_or_else(system_clock);
        let secret = match secret {
            Some(secret) => secret,
            None => TokenSecret::from_env(&config.mesh.secret_env)?,
        };

        let [scheduler_log, mesh_log, cache_log, entity_log, metrics_log] = match &config.log_dir {
            Some(dir) => open_logs(dir, &clock)?,
            None => COMPONENTS.map(|name| HashChainLog::in_memory(name, clock.clone())),
        };

        let cache = match &config.log_dir {
            Some(dir) => LatentCache::open(
                config.cache.clone(),
                JsonlCacheStore::open(dir.join(CACHE_STORE_FILE))?,
                backend,
                cache_log,
                clock.clone(),
            )?,
            None => LatentCache::open(
                config.cache.clone(),
                MemoryCacheStore::new(),
                backend,
                cache_log,
                clock.clone(),
            )?,
        };
        let scheduler =
            TaskScheduler::new(config.scheduler.clone(), executor, scheduler_log, clock.clone());
        let mesh = NavigationMesh::new(config.mesh.clone(), secret, mesh_log, clock.clone());
        let entities = EntityManager::new(config.entity.clone(), entity_log, clock.clone());
        let metrics = MetricsCollector::new(&config.metrics, metrics_log, clock.clone());

        tracing::info!(
            persistent = config.log_dir.is_some(),
            "engine assembled"
        );
        Ok(Engine::from_parts(
            config, scheduler, mesh, cache, entities, metrics, clock,
        ))
    }
}

fn open_logs(dir: &Path, clock: &SharedClock) -> EngineResult<[HashChainLog; 5]> {
    fs::create_dir_all(dir)?;
    let open = |name: &str| -> EngineResult<HashChainLog> {
        let store = JsonlLogStore::open(dir.join(format!("{name}.jsonl")))?;
        HashChainLog::open(name, store, clock.clone())
    };
    Ok([
        open(COMPONENTS[0])?,
        open(COMPONENTS[1])?,
        open(COMPONENTS[2])?,
        open(COMPONENTS[3])?,
        open(COMPONENTS[4])?,
    ])
}
