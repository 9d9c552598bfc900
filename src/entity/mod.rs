//! Entity lifecycle state machine.
//!
//! ```text
//! Hibernating -> Awakening -> Active -> {ErrorCorrection, OfflineAdapting} -> {Active | Hibernating}
//! any non-terminal state -> Deactivated
//! ```
//!
//! Entities may hold pool capacity while awake. The manager does not own the
//! pools; lifecycle calls take an optional [`ResourceProvider`] and draw on it
//! directly, with no two-phase commit between state and capacity.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::EntityConfig;
use crate::core::audit::{ChainStatus, HashChainLog};
use crate::core::resource_pool::ResourceProvider;
use crate::core::{EngineError, EngineResult};
use crate::util::clock::SharedClock;
use crate::util::serde::ResourceKind;

/// Health ceiling.
pub const MAX_HEALTH: u8 = 100;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Idle, holding no capacity.
    Hibernating,
    /// Transient state while capacity is acquired.
    Awakening,
    /// Doing work; expected to heartbeat.
    Active,
    /// Recovering from an error.
    ErrorCorrection,
    /// Running degraded while connectivity is lost.
    OfflineAdapting,
    /// Terminal. Kept for reporting only.
    Deactivated,
}

impl EntityState {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hibernating => "hibernating",
            Self::Awakening => "awakening",
            Self::Active => "active",
            Self::ErrorCorrection => "error_correction",
            Self::OfflineAdapting => "offline_adapting",
            Self::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capacity an entity holds while awake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    /// Pool to draw on.
    pub kind: ResourceKind,
    /// Units held.
    pub amount: u32,
}

impl ResourceRequirement {
    /// Requirement of `amount` units from `kind`.
    pub const fn new(kind: ResourceKind, amount: u32) -> Self {
        Self { kind, amount }
    }
}

/// A managed worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id.
    pub id: String,
    /// Caller-defined kind of worker.
    pub entity_type: String,
    /// Current lifecycle state.
    pub state: EntityState,
    /// Capacity held while awake.
    pub resource_requirement: Option<ResourceRequirement>,
    /// Health in `0..=100`.
    pub health: u8,
    /// Error corrections started.
    pub error_count: u32,
    /// Recovery attempts made.
    pub recovery_attempts: u32,
    /// Tasks reported as completed.
    pub tasks_completed: u64,
    /// Tasks reported as failed.
    pub tasks_failed: u64,
    /// Time of the latest heartbeat.
    pub last_heartbeat_ms: u64,
    /// Time of creation.
    pub spawned_at_ms: u64,
    /// Start of the current awake period.
    pub awakened_at_ms: Option<u64>,
    /// Awake time accumulated by finished periods.
    pub uptime_ms: u64,
    /// Whether the requirement is currently allocated.
    pub holds_resources: bool,
}

impl Entity {
    fn new(id: String, entity_type: String, requirement: Option<ResourceRequirement>, now: u64) -> Self {
        Self {
            id,
            entity_type,
            state: EntityState::Hibernating,
            resource_requirement: requirement,
            health: MAX_HEALTH,
            error_count: 0,
            recovery_attempts: 0,
            tasks_completed: 0,
            tasks_failed: 0,
            last_heartbeat_ms: now,
            spawned_at_ms: now,
            awakened_at_ms: None,
            uptime_ms: 0,
            holds_resources: false,
        }
    }

    /// True once deactivated.
    pub fn is_terminal(&self) -> bool {
        self.state == EntityState::Deactivated
    }

    /// Uptime including the current awake period.
    pub fn total_uptime_ms(&self, now_ms: u64) -> u64 {
        self.uptime_ms + self.awakened_at_ms.map_or(0, |at| now_ms.saturating_sub(at))
    }
}

/// Result of one error correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    /// Entity corrected.
    pub id: String,
    /// Health after recovery.
    pub health: u8,
    /// State after recovery: `Active` or `Hibernating`.
    pub state: EntityState,
}

/// Aggregate entity statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStats {
    /// Entities ever spawned.
    pub total: usize,
    /// Count per state.
    pub by_state: BTreeMap<EntityState, usize>,
    /// Mean health of non-deactivated entities; 0 when there are none.
    pub avg_health: f64,
    /// Error corrections across entities.
    pub total_errors: u64,
    /// Tasks completed across entities.
    pub tasks_completed: u64,
    /// Tasks failed across entities.
    pub tasks_failed: u64,
}

impl EntityStats {
    /// Entities in `state`.
    pub fn count(&self, state: EntityState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

/// Registry and state machine for entities.
#[derive(Debug)]
pub struct EntityManager {
    config: EntityConfig,
    entities: BTreeMap<String, Entity>,
    log: HashChainLog,
    clock: SharedClock,
}

impl EntityManager {
    /// Empty manager.
    pub fn new(config: EntityConfig, log: HashChainLog, clock: SharedClock) -> Self {
        Self {
            config,
            entities: BTreeMap::new(),
            log,
            clock,
        }
    }

    /// Register a new entity in `Hibernating`.
    pub fn spawn(
        &mut self,
        id: &str,
        entity_type: &str,
        requirement: Option<ResourceRequirement>,
    ) -> EngineResult<Entity> {
        if self.entities.contains_key(id) {
            return Err(EngineError::DuplicateEntity(id.to_owned()));
        }
        let entity = Entity::new(id.to_owned(), entity_type.to_owned(), requirement, self.clock.now_ms());
        self.log.record(
            "entity_spawned",
            json!({
                "entity_id": id,
                "entity_type": entity_type,
                "resource_requirement": requirement,
            }),
        );
        tracing::debug!(entity = id, entity_type, "entity spawned");
        self.entities.insert(id.to_owned(), entity.clone());
        Ok(entity)
    }

    /// Wake a hibernating entity, allocating its requirement if a provider is given.
    ///
    /// If allocation is refused the entity stays `Hibernating` and the
    /// refusal is returned.
    pub fn awaken(&mut self, id: &str, provider: Option<&mut dyn ResourceProvider>) -> EngineResult<()> {
        let now = self.clock.now_ms();
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        require(entity, &[EntityState::Hibernating], "awaken")?;

        entity.state = EntityState::Awakening;
        self.log.record("entity_awakening", json!({ "entity_id": id }));

        if let Err(e) = acquire(entity, provider) {
            entity.state = EntityState::Hibernating;
            tracing::warn!(entity = id, "awaken refused: {}", e);
            self.log.record(
                "entity_awaken_failed",
                json!({ "entity_id": id, "reason": e.to_string() }),
            );
            return Err(e);
        }

        entity.state = EntityState::Active;
        entity.last_heartbeat_ms = now;
        entity.awakened_at_ms = Some(now);
        tracing::info!(entity = id, "entity active");
        self.log.record(
            "entity_awakened",
            json!({ "entity_id": id, "holds_resources": entity.holds_resources }),
        );
        Ok(())
    }

    /// Put an active entity to sleep, returning its capacity.
    pub fn hibernate(&mut self, id: &str, provider: Option<&mut dyn ResourceProvider>) -> EngineResult<()> {
        let now = self.clock.now_ms();
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        require(entity, &[EntityState::Active], "hibernate")?;

        settle(entity, provider, now);
        entity.state = EntityState::Hibernating;
        tracing::info!(entity = id, uptime_ms = entity.uptime_ms, "entity hibernating");
        self.log.record(
            "entity_hibernated",
            json!({ "entity_id": id, "uptime_ms": entity.uptime_ms }),
        );
        Ok(())
    }

    /// Mark an active entity as running without connectivity.
    pub fn adapt_offline(&mut self, id: &str) -> EngineResult<()> {
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        require(entity, &[EntityState::Active], "adapt offline")?;
        entity.state = EntityState::OfflineAdapting;
        self.log.record("entity_offline_adapting", json!({ "entity_id": id }));
        Ok(())
    }

    /// Return an offline-adapting entity to `Active` with a fresh heartbeat.
    pub fn resume(&mut self, id: &str) -> EngineResult<()> {
        let now = self.clock.now_ms();
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        require(entity, &[EntityState::OfflineAdapting], "resume")?;
        entity.state = EntityState::Active;
        entity.last_heartbeat_ms = now;
        self.log.record("entity_resumed", json!({ "entity_id": id }));
        Ok(())
    }

    /// Run error correction on `id`: apply the error penalty, then attempt recovery.
    pub fn error_correction(
        &mut self,
        id: &str,
        provider: Option<&mut dyn ResourceProvider>,
    ) -> EngineResult<Correction> {
        let penalty = self.config.error_penalty;
        self.correct(id, penalty, provider)
    }

    /// Correct every `Active` entity that fails the health predicate.
    ///
    /// The entity is already degraded, so no error penalty is applied before
    /// the recovery attempt.
    pub fn monitor_health(&mut self, mut provider: Option<&mut dyn ResourceProvider>) -> Vec<Correction> {
        let now = self.clock.now_ms();
        let unhealthy: Vec<String> = self
            .entities
            .values()
            .filter(|e| e.state == EntityState::Active && !self.is_healthy_at(e, e.state, now))
            .map(|e| e.id.clone())
            .collect();

        let mut corrections = Vec::with_capacity(unhealthy.len());
        for id in unhealthy {
            match self.correct(&id, 0, reborrow(&mut provider)) {
                Ok(correction) => corrections.push(correction),
                Err(e) => tracing::error!(entity = %id, "health correction failed: {}", e),
            }
        }
        corrections
    }

    fn correct(
        &mut self,
        id: &str,
        penalty: u8,
        mut provider: Option<&mut dyn ResourceProvider>,
    ) -> EngineResult<Correction> {
        let now = self.clock.now_ms();
        let timeout_ms = self.config.heartbeat_timeout_secs * 1000;
        let min_healthy = self.config.min_healthy;
        let boost = self.config.recovery_boost;

        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        if entity.is_terminal() {
            return Err(transition(entity, "run error correction"));
        }

        let previous = entity.state;
        entity.state = EntityState::ErrorCorrection;
        entity.health = entity.health.saturating_sub(penalty);
        entity.error_count += 1;
        tracing::warn!(entity = id, health = entity.health, from = %previous, "error correction");
        self.log.record(
            "error_correction_started",
            json!({
                "entity_id": id,
                "from": previous,
                "health": entity.health,
                "error_count": entity.error_count,
            }),
        );

        entity.recovery_attempts += 1;
        entity.health = entity.health.saturating_add(boost).min(MAX_HEALTH);
        let heartbeat_fresh = now.saturating_sub(entity.last_heartbeat_ms) <= timeout_ms;
        let mut recovered =
            entity.health >= min_healthy && (previous != EntityState::Active || heartbeat_fresh);

        if recovered && !entity.holds_resources {
            if let Err(e) = acquire(entity, reborrow(&mut provider)) {
                tracing::warn!(entity = id, "recovery could not reacquire capacity: {}", e);
                recovered = false;
            }
        }

        if recovered {
            entity.state = EntityState::Active;
            entity.last_heartbeat_ms = now;
            entity.awakened_at_ms.get_or_insert(now);
            self.log.record(
                "entity_recovered",
                json!({ "entity_id": id, "health": entity.health }),
            );
        } else {
            settle(entity, provider, now);
            entity.state = EntityState::Hibernating;
            tracing::info!(entity = id, health = entity.health, "recovery failed, hibernating");
            self.log.record(
                "entity_recovery_failed",
                json!({ "entity_id": id, "health": entity.health }),
            );
        }

        Ok(Correction {
            id: id.to_owned(),
            health: entity.health,
            state: entity.state,
        })
    }

    /// Retire `id` for good, returning any capacity it holds.
    pub fn deactivate(&mut self, id: &str, provider: Option<&mut dyn ResourceProvider>) -> EngineResult<()> {
        let now = self.clock.now_ms();
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        if entity.is_terminal() {
            return Err(transition(entity, "deactivate"));
        }
        let from = entity.state;
        settle(entity, provider, now);
        entity.state = EntityState::Deactivated;
        tracing::info!(entity = id, %from, "entity deactivated");
        self.log.record(
            "entity_deactivated",
            json!({ "entity_id": id, "from": from, "uptime_ms": entity.uptime_ms }),
        );
        Ok(())
    }

    /// Record a heartbeat from an awake entity.
    pub fn heartbeat(&mut self, id: &str) -> EngineResult<()> {
        let now = self.clock.now_ms();
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        require(entity, &[EntityState::Active, EntityState::OfflineAdapting], "heartbeat")?;
        entity.last_heartbeat_ms = now;
        Ok(())
    }

    /// Count a finished task against `id`.
    pub fn record_task_outcome(&mut self, id: &str, success: bool) -> EngineResult<()> {
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        if entity.is_terminal() {
            return Err(transition(entity, "record a task"));
        }
        if success {
            entity.tasks_completed += 1;
        } else {
            entity.tasks_failed += 1;
        }
        self.log.record(
            "entity_task_recorded",
            json!({ "entity_id": id, "success": success }),
        );
        Ok(())
    }

    /// Operator override of health, clamped to `0..=100`.
    pub fn set_health(&mut self, id: &str, health: u8) -> EngineResult<()> {
        let entity = self.entities.get_mut(id).ok_or_else(|| unknown(id))?;
        if entity.is_terminal() {
            return Err(transition(entity, "set health"));
        }
        entity.health = health.min(MAX_HEALTH);
        self.log.record(
            "entity_health_set",
            json!({ "entity_id": id, "health": entity.health }),
        );
        Ok(())
    }

    /// Health predicate at the current time.
    pub fn is_healthy(&self, id: &str) -> EngineResult<bool> {
        let entity = self.entities.get(id).ok_or_else(|| unknown(id))?;
        Ok(self.is_healthy_at(entity, entity.state, self.clock.now_ms()))
    }

    fn is_healthy_at(&self, entity: &Entity, state: EntityState, now: u64) -> bool {
        let timeout_ms = self.config.heartbeat_timeout_secs * 1000;
        entity.health >= self.config.min_healthy
            && (state != EntityState::Active
                || now.saturating_sub(entity.last_heartbeat_ms) <= timeout_ms)
    }

    /// Entity by id.
    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Every entity, ordered by id.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> EntityStats {
        let mut stats = EntityStats {
            total: self.entities.len(),
            ..EntityStats::default()
        };
        let mut health_sum = 0u64;
        let mut live = 0u32;
        for entity in self.entities.values() {
            *stats.by_state.entry(entity.state).or_default() += 1;
            stats.total_errors += u64::from(entity.error_count);
            stats.tasks_completed += entity.tasks_completed;
            stats.tasks_failed += entity.tasks_failed;
            if !entity.is_terminal() {
                health_sum += u64::from(entity.health);
                live += 1;
            }
        }
        if live > 0 {
            stats.avg_health = to_f64(health_sum) / f64::from(live);
        }
        stats
    }

    /// The entity log.
    pub const fn log(&self) -> &HashChainLog {
        &self.log
    }

    /// Verify the entity log.
    pub fn verify_hash_chain(&self) -> EngineResult<ChainStatus> {
        self.log.verify_hash_chain()
    }
}

fn unknown(id: &str) -> EngineError {
    EngineError::UnknownEntity(id.to_owned())
}

fn transition(entity: &Entity, action: &'static str) -> EngineError {
    EngineError::InvalidTransition {
        id: entity.id.clone(),
        from: entity.state.to_string(),
        action,
    }
}

fn require(entity: &Entity, allowed: &[EntityState], action: &'static str) -> EngineResult<()> {
    if allowed.contains(&entity.state) {
        Ok(())
    } else {
        Err(transition(entity, action))
    }
}

fn reborrow<'a>(
    provider: &'a mut Option<&mut dyn ResourceProvider>,
) -> Option<&'a mut dyn ResourceProvider> {
    match provider {
        Some(p) => Some(&mut **p),
        None => None,
    }
}

fn acquire(entity: &mut Entity, provider: Option<&mut dyn ResourceProvider>) -> EngineResult<()> {
    if let (Some(req), Some(provider)) = (entity.resource_requirement, provider) {
        provider.allocate(req.kind, req.amount)?;
        entity.holds_resources = true;
    }
    Ok(())
}

/// Close the awake period and return held capacity.
fn settle(entity: &mut Entity, provider: Option<&mut dyn ResourceProvider>, now: u64) {
    if let Some(at) = entity.awakened_at_ms.take() {
        entity.uptime_ms += now.saturating_sub(at);
    }
    if !entity.holds_resources {
        return;
    }
    match (entity.resource_requirement, provider) {
        (Some(req), Some(provider)) => {
            provider.release(req.kind, req.amount);
            entity.holds_resources = false;
        }
        _ => tracing::warn!(entity = %entity.id, "entity holds capacity but no provider was given"),
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(value: u64) -> f64 {
    value as f64
}
