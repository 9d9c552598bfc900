//! Engine configuration structures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{AppResult, EngineError, EngineResult};
use crate::util::serde::{ResourceKind, ThresholdDomain};

/// Environment variable holding the token signing secret unless overridden.
pub const DEFAULT_SECRET_ENV: &str = "THRESHOLD_ENGINE_SECRET";

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidConfig(msg.into())
}

/// Scheduler and pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Initial capacity per pool. Kinds left out get [`Self::DEFAULT_CAPACITY`].
    pub pools: BTreeMap<ResourceKind, u32>,
    /// Seconds between auto-scaling checks.
    pub scale_check_interval_secs: u64,
    /// Utilization percent above which a pool with waiters grows.
    pub scale_up_utilization: f64,
    /// Utilization percent below which a pool shrinks.
    pub scale_down_utilization: f64,
    /// Units added or removed per scaling step.
    pub scale_step: u32,
    /// Capacity a pool never shrinks below.
    pub min_capacity: u32,
    /// Upper bound on retry backoff.
    pub max_backoff_secs: u64,
    /// Attempts granted to tasks that do not set their own.
    pub default_max_attempts: u32,
    /// Completed tasks retained for inspection.
    pub completed_history: usize,
    /// Permanently failed tasks retained for inspection.
    pub failed_history: usize,
    /// Executions slower than this are logged as slow.
    pub slow_task_warn_ms: u64,
}

impl SchedulerConfig {
    /// Capacity for pools not listed in `pools`.
    pub const DEFAULT_CAPACITY: u32 = 10;

    /// Initial capacity for `kind`.
    pub fn capacity_for(&self, kind: ResourceKind) -> u32 {
        self.pools.get(&kind).copied().unwrap_or(Self::DEFAULT_CAPACITY)
    }

    /// Validate scheduler values.
    pub fn validate(&self) -> EngineResult<()> {
        if let Some((kind, _)) = self.pools.iter().find(|(_, cap)| **cap == 0) {
            return Err(invalid(format!("pool `{kind}` capacity must be greater than 0")));
        }
        if self.scale_check_interval_secs == 0 {
            return Err(invalid("scale_check_interval_secs must be greater than 0"));
        }
        if !(0.0..=100.0).contains(&self.scale_down_utilization)
            || !(0.0..=100.0).contains(&self.scale_up_utilization)
            || self.scale_down_utilization >= self.scale_up_utilization
        {
            return Err(invalid(
                "scale thresholds must satisfy 0 <= scale_down < scale_up <= 100",
            ));
        }
        if self.scale_step == 0 {
            return Err(invalid("scale_step must be greater than 0"));
        }
        if self.default_max_attempts == 0 {
            return Err(invalid("default_max_attempts must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pools: ResourceKind::ALL
                .into_iter()
                .map(|kind| (kind, Self::DEFAULT_CAPACITY))
                .collect(),
            scale_check_interval_secs: 60,
            scale_up_utilization: 80.0,
            scale_down_utilization: 30.0,
            scale_step: 5,
            min_capacity: 5,
            max_backoff_secs: 300,
            default_max_attempts: 3,
            completed_history: 1000,
            failed_history: 1000,
            slow_task_warn_ms: 1000,
        }
    }
}

/// Navigation mesh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Requests per minute per user for each domain.
    pub rate_limits: BTreeMap<ThresholdDomain, u32>,
    /// Token lifetime.
    pub token_ttl_secs: u64,
    /// Access records kept per gate.
    pub access_log_capacity: usize,
    /// Environment variable holding the signing secret.
    pub secret_env: String,
    /// Fraction of the rate limit that flags a rate spike.
    pub rate_spike_ratio: f64,
    /// Window for breach pattern detection.
    pub breach_window_secs: u64,
    /// Breaches inside the window that flag a breach pattern.
    pub breach_threshold: usize,
}

impl MeshConfig {
    /// Rate limit for domains not listed in `rate_limits`.
    pub const DEFAULT_RATE_LIMIT: u32 = 60;

    /// Rate limit for `domain`.
    pub fn rate_limit_for(&self, domain: ThresholdDomain) -> u32 {
        self.rate_limits
            .get(&domain)
            .copied()
            .unwrap_or(Self::DEFAULT_RATE_LIMIT)
    }

    /// Validate mesh values.
    pub fn validate(&self) -> EngineResult<()> {
        if let Some((domain, _)) = self.rate_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(invalid(format!("rate limit for `{domain}` must be greater than 0")));
        }
        if self.token_ttl_secs == 0 {
            return Err(invalid("token_ttl_secs must be greater than 0"));
        }
        if self.access_log_capacity == 0 {
            return Err(invalid("access_log_capacity must be greater than 0"));
        }
        if self.secret_env.trim().is_empty() {
            return Err(invalid("secret_env must name an environment variable"));
        }
        if !(0.0..=1.0).contains(&self.rate_spike_ratio) {
            return Err(invalid("rate_spike_ratio must be within 0..=1"));
        }
        Ok(())
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            rate_limits: ThresholdDomain::ALL
                .into_iter()
                .map(|domain| (domain, Self::DEFAULT_RATE_LIMIT))
                .collect(),
            token_ttl_secs: 3600,
            access_log_capacity: 1000,
            secret_env: DEFAULT_SECRET_ENV.into(),
            rate_spike_ratio: 0.8,
            breach_window_secs: 300,
            breach_threshold: 10,
        }
    }
}

/// Latent cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied by `set` callers that pass `None`.
    pub default_ttl_secs: u64,
    /// Replay attempts before a queued operation is dead-lettered.
    pub max_sync_attempts: u32,
    /// Dead-lettered operations retained.
    pub dead_letter_capacity: usize,
}

impl CacheConfig {
    /// Validate cache values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.default_ttl_secs == 0 {
            return Err(invalid("default_ttl_secs must be greater than 0"));
        }
        if self.max_sync_attempts == 0 {
            return Err(invalid("max_sync_attempts must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            max_sync_attempts: 3,
            dead_letter_capacity: 1000,
        }
    }
}

/// Entity lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityConfig {
    /// Active entities without a heartbeat for this long are unhealthy.
    pub heartbeat_timeout_secs: u64,
    /// Lowest health still considered healthy.
    pub min_healthy: u8,
    /// Health lost when error correction starts.
    pub error_penalty: u8,
    /// Health regained by a recovery attempt.
    pub recovery_boost: u8,
}

impl EntityConfig {
    /// Validate entity values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.heartbeat_timeout_secs == 0 {
            return Err(invalid("heartbeat_timeout_secs must be greater than 0"));
        }
        if self.min_healthy > 100 {
            return Err(invalid("min_healthy must be within 0..=100"));
        }
        Ok(())
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 300,
            min_healthy: 30,
            error_penalty: 10,
            recovery_boost: 20,
        }
    }
}

/// Metrics collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Target for the latency tolerance gauge.
    pub latency_tolerance_target: f64,
    /// Target for the threshold lock gauge.
    pub threshold_lock_target: f64,
    /// Target for the resource flow gauge.
    pub resource_flow_target: f64,
    /// Samples kept per gauge and meter.
    pub history_capacity: usize,
    /// Rate window for meters.
    pub meter_interval_secs: u64,
}

impl MetricsConfig {
    /// Validate metrics values.
    pub fn validate(&self) -> EngineResult<()> {
        if self.history_capacity == 0 {
            return Err(invalid("history_capacity must be greater than 0"));
        }
        if self.meter_interval_secs == 0 {
            return Err(invalid("meter_interval_secs must be greater than 0"));
        }
        Ok(())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_tolerance_target: 100.0,
            threshold_lock_target: 95.0,
            resource_flow_target: 80.0,
            history_capacity: 100,
            meter_interval_secs: 60,
        }
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler section.
    pub scheduler: SchedulerConfig,
    /// Navigation mesh section.
    pub mesh: MeshConfig,
    /// Cache section.
    pub cache: CacheConfig,
    /// Entity section.
    pub entity: EntityConfig,
    /// Metrics section.
    pub metrics: MetricsConfig,
    /// Directory for JSONL logs; in-memory logs when absent.
    pub log_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Validate every section.
    pub fn validate(&self) -> EngineResult<()> {
        self.scheduler.validate()?;
        self.mesh.validate()?;
        self.cache.validate()?;
        self.entity.validate()?;
        self.metrics.validate()
    }

    /// Parse engine configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> EngineResult<Self> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| invalid(format!("parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON configuration file.
    ///
    /// Errors carry the file path as context for the embedding application.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        let cfg = Self::from_json_str(&input)
            .with_context(|| format!("loading engine config {}", path.display()))?;
        tracing::info!(path = %path.display(), "engine config loaded");
        Ok(cfg)
    }
}
