//! Tests for configuration validation

use threshold_engine::config::{
    CacheConfig, EngineConfig, EntityConfig, MeshConfig, MetricsConfig, SchedulerConfig,
    DEFAULT_SECRET_ENV,
};
use threshold_engine::util::{ResourceKind, ThresholdDomain};

#[test]
fn test_default_config_is_valid() {
    assert!(EngineConfig::default().validate().is_ok());
}

#[test]
fn test_scheduler_defaults() {
    let cfg = SchedulerConfig::default();
    for kind in ResourceKind::ALL {
        assert_eq!(cfg.capacity_for(kind), 10);
    }
    assert_eq!(cfg.scale_step, 5);
    assert_eq!(cfg.min_capacity, 5);
    assert_eq!(cfg.max_backoff_secs, 300);
    assert_eq!(cfg.default_max_attempts, 3);
}

#[test]
fn test_scheduler_zero_capacity_rejected() {
    let mut cfg = SchedulerConfig::default();
    cfg.pools.insert(ResourceKind::Storage, 0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduler_inverted_thresholds_rejected() {
    let cfg = SchedulerConfig {
        scale_up_utilization: 20.0,
        scale_down_utilization: 40.0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_mesh_defaults() {
    let cfg = MeshConfig::default();
    for domain in ThresholdDomain::ALL {
        assert_eq!(cfg.rate_limit_for(domain), 60);
    }
    assert_eq!(cfg.token_ttl_secs, 3600);
    assert_eq!(cfg.secret_env, DEFAULT_SECRET_ENV);
}

#[test]
fn test_mesh_invalid_values_rejected() {
    let zero_ttl = MeshConfig {
        token_ttl_secs: 0,
        ..MeshConfig::default()
    };
    assert!(zero_ttl.validate().is_err());

    let blank_env = MeshConfig {
        secret_env: "  ".to_string(),
        ..MeshConfig::default()
    };
    assert!(blank_env.validate().is_err());
}

#[test]
fn test_cache_entity_metrics_invalid_values_rejected() {
    let cache = CacheConfig {
        max_sync_attempts: 0,
        ..CacheConfig::default()
    };
    assert!(cache.validate().is_err());

    let entity = EntityConfig {
        min_healthy: 101,
        ..EntityConfig::default()
    };
    assert!(entity.validate().is_err());

    let metrics = MetricsConfig {
        history_capacity: 0,
        ..MetricsConfig::default()
    };
    assert!(metrics.validate().is_err());
}

#[test]
fn test_from_json_partial_sections() {
    let cfg = EngineConfig::from_json_str(
        r#"{ "scheduler": { "pools": { "compute": 25 } }, "cache": { "default_ttl_secs": 60 } }"#,
    )
    .unwrap();
    assert_eq!(cfg.scheduler.capacity_for(ResourceKind::Compute), 25);
    assert_eq!(cfg.scheduler.capacity_for(ResourceKind::Network), 10);
    assert_eq!(cfg.cache.default_ttl_secs, 60);
    assert!(cfg.log_dir.is_none());
}

#[test]
fn test_from_json_rejects_garbage() {
    assert!(EngineConfig::from_json_str("not json").is_err());
    assert!(EngineConfig::from_json_str(r#"{ "mesh": { "token_ttl_secs": 0 } }"#).is_err());
}

#[test]
fn test_load_reads_file_and_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    std::fs::write(&path, r#"{ "entity": { "min_healthy": 40 } }"#).unwrap();
    let cfg = EngineConfig::load(&path).unwrap();
    assert_eq!(cfg.entity.min_healthy, 40);

    let missing = dir.path().join("absent.json");
    let err = EngineConfig::load(&missing).unwrap_err();
    assert!(format!("{err}").contains("absent.json"));

    std::fs::write(&path, r#"{ "cache": { "max_sync_attempts": 0 } }"#).unwrap();
    let err = EngineConfig::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("max_sync_attempts"));
    assert!(err.downcast_ref::<threshold_engine::core::EngineError>().is_some());
}
