//! Entity lifecycle integration tests.
//!
//! Covers:
//! 1. Health-driven recovery back to `Active`
//! 2. Valid and invalid transitions
//! 3. Capacity drawn from and returned to the scheduler's pools
//! 4. Deactivation as a terminal state

mod common;

use std::time::Duration;

use common::{clock, scheduler};
use threshold_engine::config::EntityConfig;
use threshold_engine::core::{EngineError, HashChainLog};
use threshold_engine::entity::{EntityManager, EntityState, ResourceRequirement};
use threshold_engine::util::{ManualClock, ResourceKind};

fn manager(clock: &ManualClock) -> EntityManager {
    EntityManager::new(
        EntityConfig::default(),
        HashChainLog::in_memory("entity", clock.shared()),
        clock.shared(),
    )
}

#[test]
fn test_monitor_recovers_unhealthy_entity() {
    let clock = clock();
    let mut entities = manager(&clock);

    entities.spawn("e1", "indexer", None).unwrap();
    entities.awaken("e1", None).unwrap();
    assert_eq!(entities.get("e1").unwrap().state, EntityState::Active);

    clock.advance(Duration::from_secs(30));
    entities.set_health("e1", 20).unwrap();
    assert!(!entities.is_healthy("e1").unwrap());

    let corrections = entities.monitor_health(None);
    assert_eq!(corrections.len(), 1);

    let e1 = entities.get("e1").unwrap();
    assert_eq!(e1.health, 40);
    assert_eq!(e1.state, EntityState::Active);
    assert_eq!(e1.last_heartbeat_ms, common::START_MS + 30_000);
    assert_eq!(e1.error_count, 1);
    assert_eq!(e1.recovery_attempts, 1);
    assert!(entities.is_healthy("e1").unwrap());

    // healthy entities are left alone
    assert!(entities.monitor_health(None).is_empty());
}

#[test]
fn test_recovery_below_threshold_hibernates() {
    let clock = clock();
    let mut entities = manager(&clock);
    entities.spawn("e1", "indexer", None).unwrap();
    entities.awaken("e1", None).unwrap();
    entities.set_health("e1", 5).unwrap();

    let correction = entities.error_correction("e1", None).unwrap();
    assert_eq!(correction.health, 20);
    assert_eq!(correction.state, EntityState::Hibernating);
}

#[test]
fn test_transitions_are_enforced() {
    let clock = clock();
    let mut entities = manager(&clock);
    entities.spawn("e1", "indexer", None).unwrap();

    assert!(matches!(
        entities.spawn("e1", "other", None),
        Err(EngineError::DuplicateEntity(id)) if id == "e1"
    ));
    assert!(matches!(
        entities.awaken("ghost", None),
        Err(EngineError::UnknownEntity(_))
    ));
    assert!(entities.heartbeat("e1").is_err());

    entities.awaken("e1", None).unwrap();
    assert!(matches!(
        entities.awaken("e1", None),
        Err(EngineError::InvalidTransition { action: "awaken", .. })
    ));

    entities.adapt_offline("e1").unwrap();
    assert_eq!(entities.get("e1").unwrap().state, EntityState::OfflineAdapting);
    assert!(entities.hibernate("e1", None).is_err());
    entities.resume("e1").unwrap();

    clock.advance(Duration::from_secs(90));
    entities.hibernate("e1", None).unwrap();
    let e1 = entities.get("e1").unwrap();
    assert_eq!(e1.state, EntityState::Hibernating);
    assert_eq!(e1.uptime_ms, 90_000);
}

#[test]
fn test_entities_hold_scheduler_capacity_while_awake() {
    let clock = clock();
    let mut scheduler = scheduler(&clock);
    let mut entities = manager(&clock);
    let requirement = ResourceRequirement::new(ResourceKind::Database, 4);

    entities.spawn("db-writer", "writer", Some(requirement)).unwrap();
    entities.awaken("db-writer", Some(&mut scheduler)).unwrap();
    assert_eq!(scheduler.pool(ResourceKind::Database).unwrap().allocated, 4);
    assert!(entities.get("db-writer").unwrap().holds_resources);

    entities.hibernate("db-writer", Some(&mut scheduler)).unwrap();
    assert_eq!(scheduler.pool(ResourceKind::Database).unwrap().allocated, 0);

    // a requirement larger than the pool keeps the entity asleep
    let huge = ResourceRequirement::new(ResourceKind::Database, 50);
    entities.spawn("hog", "writer", Some(huge)).unwrap();
    assert!(matches!(
        entities.awaken("hog", Some(&mut scheduler)),
        Err(EngineError::ResourceExhausted { .. })
    ));
    assert_eq!(entities.get("hog").unwrap().state, EntityState::Hibernating);
    assert_eq!(scheduler.pool(ResourceKind::Database).unwrap().waiting_count, 0);
}

#[test]
fn test_deactivated_entities_are_kept_but_frozen() {
    let clock = clock();
    let mut scheduler = scheduler(&clock);
    let mut entities = manager(&clock);
    let requirement = ResourceRequirement::new(ResourceKind::Network, 3);

    entities.spawn("e1", "crawler", Some(requirement)).unwrap();
    entities.awaken("e1", Some(&mut scheduler)).unwrap();
    entities.record_task_outcome("e1", true).unwrap();
    entities.record_task_outcome("e1", false).unwrap();
    entities.deactivate("e1", Some(&mut scheduler)).unwrap();

    assert_eq!(scheduler.pool(ResourceKind::Network).unwrap().allocated, 0);
    let e1 = entities.get("e1").unwrap();
    assert_eq!(e1.state, EntityState::Deactivated);
    assert_eq!(e1.tasks_completed, 1);
    assert_eq!(e1.tasks_failed, 1);

    assert!(entities.awaken("e1", None).is_err());
    assert!(entities.error_correction("e1", None).is_err());
    assert!(entities.deactivate("e1", None).is_err());
    assert!(entities.set_health("e1", 90).is_err());

    let stats = entities.stats();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.count(EntityState::Deactivated), 1);
    assert!(stats.avg_health.abs() < f64::EPSILON);
    assert!(entities.verify_hash_chain().unwrap().is_intact());
}
