//! Tests for utility types

use std::time::Duration;

use threshold_engine::util::{Clock, ManualClock, Priority, ResourceKind, ThresholdDomain};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical < Priority::High);
    assert!(Priority::High < Priority::Normal);
    assert!(Priority::Normal < Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
    assert_eq!(Priority::Low.value(), 3);
}

#[test]
fn test_resource_kind_names() {
    let names: Vec<&str> = ResourceKind::ALL.iter().map(|k| k.as_str()).collect();
    assert_eq!(names, ["compute", "storage", "network", "database"]);
    assert_eq!(
        serde_json::to_string(&ResourceKind::Database).unwrap(),
        "\"database\""
    );
}

#[test]
fn test_domain_parse() {
    assert_eq!(ThresholdDomain::parse("wealth"), Some(ThresholdDomain::Wealth));
    assert_eq!(ThresholdDomain::parse("Info"), None);
    assert_eq!(ThresholdDomain::Myth.to_string(), "myth");
}

#[test]
fn test_manual_clock_shared() {
    let clock = ManualClock::new(1_000);
    let shared = clock.shared();
    clock.advance(Duration::from_secs(2));
    assert_eq!(shared.now_ms(), 3_000);
    assert_eq!(shared.now_secs(), 3);
    clock.set(10);
    assert_eq!(shared.now_ms(), 10);
}
