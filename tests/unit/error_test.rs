//! Tests for error types

use threshold_engine::core::EngineError;
use threshold_engine::mesh::GateDecision;
use threshold_engine::util::{ResourceKind, ThresholdDomain};

#[test]
fn test_resource_exhausted_error() {
    let err = EngineError::ResourceExhausted {
        kind: ResourceKind::Compute,
        requested: 12,
        available: 3,
    };
    assert_eq!(
        format!("{err}"),
        "resource exhausted: compute requested 12, available 3"
    );
}

#[test]
fn test_invalid_transition_error() {
    let err = EngineError::InvalidTransition {
        id: "e1".to_string(),
        from: "hibernating".to_string(),
        action: "hibernate",
    };
    assert_eq!(format!("{err}"), "entity e1: cannot hibernate from hibernating");
}

#[test]
fn test_access_denied_error_names_domain() {
    let err = EngineError::AccessDenied {
        domain: ThresholdDomain::Myth,
        decision: GateDecision::RateLimited,
    };
    assert!(format!("{err}").starts_with("access to myth refused"));
}

#[test]
fn test_hash_chain_corruption_error() {
    let err = EngineError::HashChainCorruption {
        index: 4,
        reason: "eventHash mismatch".to_string(),
    };
    assert_eq!(
        format!("{err}"),
        "hash chain corrupted at entry 4: eventHash mismatch"
    );
}

#[test]
fn test_io_error_converts() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err: EngineError = io.into();
    assert!(matches!(err, EngineError::Io(_)));
}

#[test]
fn test_actor_closed_error() {
    assert_eq!(format!("{}", EngineError::ActorClosed), "engine actor closed");
}
