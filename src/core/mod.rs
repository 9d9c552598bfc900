//! Core scheduling abstractions, capacity accounting and the audit log.

pub mod audit;
pub mod error;
pub mod executor;
pub mod resource_pool;
pub mod scheduler;

pub use audit::{
    canonical_json, hash_entry, ChainStatus, HashChainLog, JsonlLogStore, LogStore,
    MemoryLogStore, EVENT_HASH, PARENT_HASH,
};
pub use error::{AppResult, EngineError, EngineResult};
pub use executor::{SimulatedExecutor, TaskExecutor};
pub use resource_pool::{ResourcePool, ResourceProvider};
pub use scheduler::{
    backoff_secs, CycleReport, HealthMetrics, ScalingEvent, SchedulerStats, Task, TaskScheduler,
};
