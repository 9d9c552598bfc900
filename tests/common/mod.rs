//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use threshold_engine::builders::EngineBuilder;
use threshold_engine::config::EngineConfig;
use threshold_engine::core::{HashChainLog, TaskScheduler};
use threshold_engine::mesh::TokenSecret;
use threshold_engine::runtime::Engine;
use threshold_engine::util::ManualClock;

/// Fixed start instant for manual clocks (2023-11-14T22:13:20Z).
pub const START_MS: u64 = 1_700_000_000_000;

pub fn clock() -> ManualClock {
    ManualClock::new(START_MS)
}

pub fn secret() -> TokenSecret {
    TokenSecret::new(b"integration-test-secret-0123456789".to_vec()).unwrap()
}

pub fn scheduler(clock: &ManualClock) -> TaskScheduler {
    TaskScheduler::new(
        EngineConfig::default().scheduler,
        threshold_engine::core::SimulatedExecutor,
        HashChainLog::in_memory("scheduler", clock.shared()),
        clock.shared(),
    )
}

pub fn engine(clock: &ManualClock) -> Engine {
    EngineBuilder::new()
        .with_clock(clock.shared())
        .with_secret(secret())
        .build()
        .unwrap()
}
