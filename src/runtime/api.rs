//! Engine facade exposed to the embedding application.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheStats, LatentCache, NoopSyncBackend, SyncBackend, SyncReport};
use crate::config::EngineConfig;
use crate::core::audit::ChainStatus;
use crate::core::executor::{SimulatedExecutor, TaskExecutor};
use crate::core::scheduler::{CycleReport, SchedulerStats, Task, TaskScheduler};
use crate::core::EngineResult;
use crate::entity::{Correction, Entity, EntityManager, EntityStats, ResourceRequirement};
use crate::mesh::{Navigation, NavigationMesh, MeshStats};
use crate::metrics::{MetricsCollector, MetricsReport, MetricsSources};
use crate::util::clock::SharedClock;
use crate::util::serde::{TaskId, ThresholdDomain};

/// Snapshot of every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Scheduler statistics.
    pub scheduler: SchedulerStats,
    /// Mesh statistics.
    pub mesh: MeshStats,
    /// Cache statistics.
    pub cache: CacheStats,
    /// Entity statistics.
    pub entities: EntityStats,
    /// Latest metrics refresh.
    pub metrics: MetricsReport,
}

/// Output of [`Engine::tick`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Scheduler cycle.
    pub cycle: CycleReport,
    /// Entities corrected by the health monitor.
    pub corrections: Vec<Correction>,
    /// Metrics after the tick.
    pub metrics: MetricsReport,
}

/// The five engine components behind one owner.
///
/// Not internally synchronized. Share it across tasks through
/// [`EngineActor`](crate::runtime::EngineActor) or an external mutex.
#[derive(Debug)]
pub struct Engine<E = SimulatedExecutor, B = NoopSyncBackend> {
    config: EngineConfig,
    scheduler: TaskScheduler<E>,
    mesh: NavigationMesh,
    cache: LatentCache<B>,
    entities: EntityManager,
    metrics: MetricsCollector,
    clock: SharedClock,
}

impl<E: TaskExecutor, B: SyncBackend> Engine<E, B> {
    /// Assemble an engine from already-built components.
    pub const fn from_parts(
        config: EngineConfig,
        scheduler: TaskScheduler<E>,
        mesh: NavigationMesh,
        cache: LatentCache<B>,
        entities: EntityManager,
        metrics: MetricsCollector,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            scheduler,
            mesh,
            cache,
            entities,
            metrics,
            clock,
        }
    }

    /// Queue a task.
    pub fn submit_task(&mut self, task: Task) -> TaskId {
        self.scheduler.submit_task(task)
    }

    /// Run one scheduler cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.scheduler.run_cycle()
    }

    /// One embedding-loop step: scheduler cycle, entity health monitor, metrics refresh.
    pub fn tick(&mut self) -> TickReport {
        let cycle = self.scheduler.run_cycle();
        let corrections = self.entities.monitor_health(Some(&mut self.scheduler));
        let metrics = self.update_metrics();
        TickReport {
            cycle,
            corrections,
            metrics,
        }
    }

    /// Register an entity.
    pub fn spawn(
        &mut self,
        id: &str,
        entity_type: &str,
        requirement: Option<ResourceRequirement>,
    ) -> EngineResult<Entity> {
        self.entities.spawn(id, entity_type, requirement)
    }

    /// Wake an entity, drawing its requirement from the scheduler's pools.
    pub fn awaken(&mut self, id: &str) -> EngineResult<()> {
        self.entities.awaken(id, Some(&mut self.scheduler))
    }

    /// Hibernate an entity, returning its capacity to the pools.
    pub fn hibernate(&mut self, id: &str) -> EngineResult<()> {
        self.entities.hibernate(id, Some(&mut self.scheduler))
    }

    /// Deactivate an entity for good.
    pub fn deactivate(&mut self, id: &str) -> EngineResult<()> {
        self.entities.deactivate(id, Some(&mut self.scheduler))
    }

    /// Run error correction on an entity.
    pub fn error_correction(&mut self, id: &str) -> EngineResult<Correction> {
        self.entities.error_correction(id, Some(&mut self.scheduler))
    }

    /// Correct every unhealthy active entity.
    pub fn monitor_health(&mut self) -> Vec<Correction> {
        self.entities.monitor_health(Some(&mut self.scheduler))
    }

    /// Issue a navigation token.
    pub fn issue_token(&mut self, domain: ThresholdDomain, user_id: &str) -> EngineResult<String> {
        self.mesh.issue_token(domain, user_id)
    }

    /// Navigate into a domain.
    pub fn navigate(
        &mut self,
        domain: ThresholdDomain,
        token: &str,
        user_id: &str,
        offline_mode: bool,
    ) -> EngineResult<Navigation> {
        self.mesh.navigate(domain, token, user_id, offline_mode)
    }

    /// Cache lookup.
    pub fn cache_get(&mut self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    /// Cache write.
    pub fn cache_set(&mut self, key: &str, value: Value, ttl: Option<Duration>) {
        self.cache.set(key, value, ttl);
    }

    /// Cache delete.
    pub fn cache_delete(&mut self, key: &str) -> bool {
        self.cache.delete(key)
    }

    /// Switch cache connectivity; going online replays the offline queue.
    pub fn set_online(&mut self, online: bool) -> Option<SyncReport> {
        self.cache.set_online(online)
    }

    /// Refresh metrics from the current component statistics.
    pub fn update_metrics(&mut self) -> MetricsReport {
        let scheduler = self.scheduler.stats();
        let mesh = self.mesh.stats();
        let cache = self.cache.stats();
        let entities = self.entities.stats();
        self.metrics.update(MetricsSources {
            scheduler: &scheduler,
            mesh: &mesh,
            cache: &cache,
            entities: &entities,
        })
    }

    /// Snapshot of every component.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            scheduler: self.scheduler.stats(),
            mesh: self.mesh.stats(),
            cache: self.cache.stats(),
            entities: self.entities.stats(),
            metrics: self.metrics.status(),
        }
    }

    /// Verify all five logs, keyed by component name.
    pub fn verify_all_chains(&self) -> EngineResult<BTreeMap<&'static str, ChainStatus>> {
        let mut chains = BTreeMap::new();
        chains.insert("scheduler", self.scheduler.verify_hash_chain()?);
        chains.insert("mesh", self.mesh.verify_hash_chain()?);
        chains.insert("cache", self.cache.verify_hash_chain()?);
        chains.insert("entity", self.entities.verify_hash_chain()?);
        chains.insert("metrics", self.metrics.verify_hash_chain()?);
        for (name, status) in &chains {
            if let ChainStatus::Broken { index, reason } = status {
                tracing::error!(log = name, index, reason = %reason, "hash chain broken");
            }
        }
        Ok(chains)
    }

    /// Active configuration.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine clock.
    pub const fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Scheduler.
    pub const fn scheduler(&self) -> &TaskScheduler<E> {
        &self.scheduler
    }

    /// Scheduler, mutably.
    pub fn scheduler_mut(&mut self) -> &mut TaskScheduler<E> {
        &mut self.scheduler
    }

    /// Navigation mesh.
    pub const fn mesh(&self) -> &NavigationMesh {
        &self.mesh
    }

    /// Navigation mesh, mutably.
    pub fn mesh_mut(&mut self) -> &mut NavigationMesh {
        &mut self.mesh
    }

    /// Cache.
    pub const fn cache(&self) -> &LatentCache<B> {
        &self.cache
    }

    /// Cache, mutably.
    pub fn cache_mut(&mut self) -> &mut LatentCache<B> {
        &mut self.cache
    }

    /// Entity manager.
    pub const fn entities(&self) -> &EntityManager {
        &self.entities
    }

    /// Entity manager, mutably.
    pub fn entities_mut(&mut self) -> &mut EntityManager {
        &mut self.entities
    }

    /// Metrics collector.
    pub const fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}
