//! Error types for engine operations.

use thiserror::Error;

use crate::mesh::GateDecision;
use crate::util::serde::{ResourceKind, ThresholdDomain};

/// Errors produced by engine components.
///
/// Transient conditions (allocation denied inside a cycle, rate limiting,
/// sync retries still within budget) are reported as values, not errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Pool has no room for the requested amount.
    #[error("resource exhausted: {kind} requested {requested}, available {available}")]
    ResourceExhausted {
        /// Pool kind.
        kind: ResourceKind,
        /// Units requested.
        requested: u32,
        /// Units free at the time of the request.
        available: u32,
    },
    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Signing secret absent or too weak.
    #[error("missing signing secret: {0}")]
    MissingSecret(String),
    /// Token failed to decode, verify or was expired.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// Gate refused navigation.
    #[error("access to {domain} refused: {decision}")]
    AccessDenied {
        /// Target domain.
        domain: ThresholdDomain,
        /// Gate verdict.
        decision: GateDecision,
    },
    /// Entity id already registered.
    #[error("entity already exists: {0}")]
    DuplicateEntity(String),
    /// Entity id not registered.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),
    /// Lifecycle call not valid from the current state.
    #[error("entity {id}: cannot {action} from {from}")]
    InvalidTransition {
        /// Entity id.
        id: String,
        /// State at the time of the call.
        from: String,
        /// Attempted operation.
        action: &'static str,
    },
    /// Task execution failed.
    #[error("task failed: {0}")]
    TaskFailed(String),
    /// Replay of a queued cache operation failed.
    #[error("sync failed: {0}")]
    SyncFailed(String),
    /// Hash chain verification found a break.
    #[error("hash chain corrupted at entry {index}: {reason}")]
    HashChainCorruption {
        /// Zero-based entry index.
        index: usize,
        /// What did not match.
        reason: String,
    },
    /// Actor task is gone.
    #[error("engine actor closed")]
    ActorClosed,
    /// Filesystem failure in a persistent store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encoding or decoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
