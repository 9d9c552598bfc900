//! # Threshold Engine
//!
//! Background resource management for an agent-orchestration application.
//!
//! The engine is five cooperating components, each writing a tamper-evident
//! hash-chained JSON Lines log:
//!
//! - **Task scheduler** ([`core::TaskScheduler`]): priority queue over typed
//!   resource pools with exponential retry backoff and auto-scaling.
//! - **Navigation mesh** ([`mesh::NavigationMesh`]): HMAC-signed tokens,
//!   per-user rate limits and anomaly detection in front of three threshold
//!   domains, each with primary, failover and offline routes.
//! - **Latent cache** ([`cache::LatentCache`]): offline-first TTL cache that
//!   queues writes while disconnected and replays them on reconnect.
//! - **Entity manager** ([`entity::EntityManager`]): lifecycle state machine
//!   for managed workers with health-driven error correction.
//! - **Metrics collector** ([`metrics::MetricsCollector`]): gauges and meters
//!   derived from the other components' statistics.
//!
//! ## Execution model
//!
//! Nothing runs on its own. The embedding application drives the engine by
//! calling [`runtime::Engine::run_cycle`] (or [`runtime::Engine::tick`]) on its
//! own cadence; every other operation completes synchronously. Components
//! are not internally locked. With the default `tokio-runtime` feature,
//! [`runtime::EngineActor`] serializes access from many async tasks.
//!
//! ```rust
//! use threshold_engine::builders::EngineBuilder;
//! use threshold_engine::core::Task;
//! use threshold_engine::mesh::TokenSecret;
//! use threshold_engine::util::{Priority, ResourceKind, ThresholdDomain};
//!
//! let mut engine = EngineBuilder::new()
//!     .with_secret(TokenSecret::new(b"an-example-secret-of-32-bytes!!!".to_vec()).unwrap())
//!     .build()
//!     .unwrap();
//!
//! engine.submit_task(Task::with_random_id(Priority::High, ResourceKind::Compute, 2, 0));
//! let report = engine.run_cycle();
//! assert_eq!(report.completed.len(), 1);
//!
//! let token = engine.issue_token(ThresholdDomain::Info, "alice").unwrap();
//! let nav = engine.navigate(ThresholdDomain::Info, &token, "alice", false).unwrap();
//! assert!(!nav.switched);
//!
//! for status in engine.verify_all_chains().unwrap().values() {
//!     assert!(status.is_intact());
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, capacity accounting and the audit log.
pub mod core;
/// Configuration models for every component.
pub mod config;
/// Builders to construct the engine from configuration.
pub mod builders;
/// Infrastructure adapters for task queues and cache persistence.
pub mod infra;
/// Zero-trust navigation mesh.
pub mod mesh;
/// Offline-first latent cache.
pub mod cache;
/// Entity lifecycle management.
pub mod entity;
/// Derived gauges and meters.
pub mod metrics;
/// Engine facade and actor runtime.
pub mod runtime;
/// Shared utilities.
pub mod util;
