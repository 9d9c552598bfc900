//! Configuration models for the engine components.

pub mod engine;

pub use engine::{
    CacheConfig, EngineConfig, EntityConfig, MeshConfig, MetricsConfig, SchedulerConfig,
    DEFAULT_SECRET_ENV,
};
