//! Tests for builder modules

use threshold_engine::builders::engine_builder::COMPONENTS;
use threshold_engine::builders::EngineBuilder;
use threshold_engine::config::{EngineConfig, SchedulerConfig};
use threshold_engine::core::Task;
use threshold_engine::mesh::TokenSecret;
use threshold_engine::util::{Clock, ManualClock, Priority, ResourceKind, ThresholdDomain};

fn secret() -> TokenSecret {
    TokenSecret::new(vec![9u8; 32]).unwrap()
}

#[test]
fn test_builder_defaults() {
    let engine = EngineBuilder::new().with_secret(secret()).build().unwrap();
    let status = engine.status();
    assert_eq!(status.scheduler.queue_len, 0);
    assert!(status.cache.online);
    assert_eq!(status.entities.total, 0);
}

#[test]
fn test_builder_applies_config_and_clock() {
    let mut config = EngineConfig::default();
    config.scheduler.pools.insert(ResourceKind::Compute, 40);
    let clock = ManualClock::new(5_000);

    let engine = EngineBuilder::new()
        .with_config(config)
        .with_clock(clock.shared())
        .with_secret(secret())
        .build()
        .unwrap();

    let pool = engine.scheduler().pool(ResourceKind::Compute).unwrap();
    assert_eq!(pool.capacity, 40);
    assert_eq!(engine.clock().now_ms(), 5_000);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let config = EngineConfig {
        scheduler: SchedulerConfig {
            scale_step: 0,
            ..SchedulerConfig::default()
        },
        ..EngineConfig::default()
    };
    assert!(EngineBuilder::new()
        .with_config(config)
        .with_secret(secret())
        .build()
        .is_err());
}

#[test]
fn test_builder_writes_component_logs() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        log_dir: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let mut engine = EngineBuilder::new()
        .with_config(config)
        .with_secret(secret())
        .build()
        .unwrap();
    engine.submit_task(Task::with_random_id(Priority::Low, ResourceKind::Storage, 1, 0));
    engine.run_cycle();
    engine.issue_token(ThresholdDomain::Wealth, "builder").unwrap();
    engine.cache_set("k", serde_json::json!(1), None);
    engine.spawn("e1", "worker", None).unwrap();
    engine.update_metrics();

    for name in COMPONENTS {
        assert!(dir.path().join(format!("{name}.jsonl")).exists(), "{name} log missing");
    }
}
