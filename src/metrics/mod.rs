//! Derived engine metrics.
//!
//! The collector keeps no counters of its own. Each [`MetricsCollector::update`]
//! recomputes three gauges and two meters from the components' statistics
//! snapshots and appends the result to the metrics log.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::CacheStats;
use crate::config::MetricsConfig;
use crate::core::audit::{ChainStatus, HashChainLog};
use crate::core::scheduler::SchedulerStats;
use crate::core::EngineResult;
use crate::entity::EntityStats;
use crate::mesh::MeshStats;
use crate::util::clock::SharedClock;

/// Gauge name: offline survivability.
pub const LATENCY_TOLERANCE: &str = "latency_tolerance";
/// Gauge name: gate effectiveness.
pub const THRESHOLD_LOCK: &str = "threshold_lock";
/// Gauge name: capacity headroom and cache efficiency.
pub const RESOURCE_FLOW: &str = "resource_flow";
/// Meter name: cumulative path switches.
pub const NAV_VELOCITY: &str = "nav_velocity";
/// Meter name: cumulative gate requests.
pub const GATE_DENSITY: &str = "gate_density";

/// A percentage with a target and recent history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gauge {
    /// Gauge name.
    pub name: String,
    /// Value at or above which the gauge is healthy.
    pub target: f64,
    /// Latest value in `0..=100`.
    pub current_value: f64,
    /// Recent values, oldest first.
    pub history: VecDeque<f64>,
    capacity: usize,
}

impl Gauge {
    /// Gauge at 0 with `capacity` history slots.
    pub fn new(name: impl Into<String>, target: f64, capacity: usize) -> Self {
        Self {
            name: name.into(),
            target,
            current_value: 0.0,
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Set the value, clamped to `0..=100`.
    pub fn set(&mut self, value: f64) {
        self.current_value = value.clamp(0.0, 100.0);
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(self.current_value);
    }

    /// `current_value >= target`.
    pub fn is_healthy(&self) -> bool {
        self.current_value >= self.target
    }

    fn reading(&self) -> GaugeReading {
        GaugeReading {
            name: self.name.clone(),
            value: self.current_value,
            target: self.target,
            healthy: self.is_healthy(),
        }
    }
}

/// Rate of change of a cumulative counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meter {
    /// Meter name.
    pub name: String,
    /// Width of the rate window.
    pub interval_secs: u64,
    /// Recorded `(timestamp_ms, cumulative value)` samples, oldest first.
    pub events: VecDeque<(u64, f64)>,
    /// Change per second over the window.
    pub current_rate: f64,
    capacity: usize,
}

impl Meter {
    /// Empty meter.
    pub fn new(name: impl Into<String>, interval_secs: u64, capacity: usize) -> Self {
        Self {
            name: name.into(),
            interval_secs,
            events: VecDeque::with_capacity(capacity),
            current_rate: 0.0,
            capacity,
        }
    }

    /// Record a cumulative `value` at `now_ms` and recompute the rate.
    ///
    /// The rate is the change since the oldest sample inside the window,
    /// divided by the window width.
    pub fn record(&mut self, now_ms: u64, value: f64) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back((now_ms, value));

        let cutoff = now_ms.saturating_sub(self.interval_secs * 1000);
        let baseline = self
            .events
            .iter()
            .find(|(ts, _)| *ts >= cutoff)
            .map_or(value, |(_, v)| *v);
        #[allow(clippy::cast_precision_loss)]
        let interval = self.interval_secs.max(1) as f64;
        self.current_rate = (value - baseline) / interval;
    }

    /// Latest recorded value.
    pub fn last_value(&self) -> f64 {
        self.events.back().map_or(0.0, |(_, v)| *v)
    }

    fn reading(&self) -> MeterReading {
        MeterReading {
            name: self.name.clone(),
            value: self.last_value(),
            rate: self.current_rate,
        }
    }
}

/// Statistics snapshots read by one refresh.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSources<'a> {
    /// Scheduler snapshot.
    pub scheduler: &'a SchedulerStats,
    /// Mesh snapshot.
    pub mesh: &'a MeshStats,
    /// Cache snapshot.
    pub cache: &'a CacheStats,
    /// Entity snapshot.
    pub entities: &'a EntityStats,
}

/// Gauge value in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeReading {
    /// Gauge name.
    pub name: String,
    /// Value.
    pub value: f64,
    /// Target.
    pub target: f64,
    /// `value >= target`.
    pub healthy: bool,
}

/// Meter value in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Meter name.
    pub name: String,
    /// Latest cumulative value.
    pub value: f64,
    /// Change per second.
    pub rate: f64,
}

/// Output of a refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Time of the refresh; `None` before the first one.
    pub updated_at_ms: Option<u64>,
    /// Gauges in fixed order: latency tolerance, threshold lock, resource flow.
    pub gauges: Vec<GaugeReading>,
    /// Meters in fixed order: nav velocity, gate density.
    pub meters: Vec<MeterReading>,
    /// Every gauge healthy.
    pub healthy: bool,
}

impl MetricsReport {
    /// Gauge by name.
    pub fn gauge(&self, name: &str) -> Option<&GaugeReading> {
        self.gauges.iter().find(|g| g.name == name)
    }

    /// Meter by name.
    pub fn meter(&self, name: &str) -> Option<&MeterReading> {
        self.meters.iter().find(|m| m.name == name)
    }
}

/// Gauges and meters over the engine components.
#[derive(Debug)]
pub struct MetricsCollector {
    latency_tolerance: Gauge,
    threshold_lock: Gauge,
    resource_flow: Gauge,
    nav_velocity: Meter,
    gate_density: Meter,
    updated_at_ms: Option<u64>,
    log: HashChainLog,
    clock: SharedClock,
}

impl MetricsCollector {
    /// Collector with targets and capacities from `config`.
    pub fn new(config: &MetricsConfig, log: HashChainLog, clock: SharedClock) -> Self {
        let cap = config.history_capacity;
        Self {
            latency_tolerance: Gauge::new(LATENCY_TOLERANCE, config.latency_tolerance_target, cap),
            threshold_lock: Gauge::new(THRESHOLD_LOCK, config.threshold_lock_target, cap),
            resource_flow: Gauge::new(RESOURCE_FLOW, config.resource_flow_target, cap),
            nav_velocity: Meter::new(NAV_VELOCITY, config.meter_interval_secs, cap),
            gate_density: Meter::new(GATE_DENSITY, config.meter_interval_secs, cap),
            updated_at_ms: None,
            log,
            clock,
        }
    }

    /// Recompute every gauge and meter from `sources`.
    #[allow(clippy::cast_precision_loss)]
    pub fn update(&mut self, sources: MetricsSources<'_>) -> MetricsReport {
        let now = self.clock.now_ms();
        let hit_rate = sources.cache.hit_rate;
        let queue_depth = sources.scheduler.queue_len + sources.scheduler.retry_len;

        self.latency_tolerance
            .set(latency_tolerance(hit_rate, queue_depth));
        self.threshold_lock.set(threshold_lock(sources.mesh));
        self.resource_flow
            .set(resource_flow(hit_rate, sources.scheduler.avg_utilization));
        self.nav_velocity
            .record(now, sources.mesh.path_switches as f64);
        self.gate_density
            .record(now, sources.mesh.total_requests as f64);
        self.updated_at_ms = Some(now);

        let report = self.status();
        if !report.healthy {
            tracing::debug!(
                latency_tolerance = self.latency_tolerance.current_value,
                threshold_lock = self.threshold_lock.current_value,
                resource_flow = self.resource_flow.current_value,
                "metrics below target"
            );
        }
        self.log.record(
            "metrics_updated",
            json!({
                LATENCY_TOLERANCE: self.latency_tolerance.current_value,
                THRESHOLD_LOCK: self.threshold_lock.current_value,
                RESOURCE_FLOW: self.resource_flow.current_value,
                NAV_VELOCITY: self.nav_velocity.current_rate,
                GATE_DENSITY: self.gate_density.current_rate,
                "entities": sources.entities.total,
                "healthy": report.healthy,
            }),
        );
        report
    }

    /// Report of the latest refresh.
    pub fn status(&self) -> MetricsReport {
        let gauges = vec![
            self.latency_tolerance.reading(),
            self.threshold_lock.reading(),
            self.resource_flow.reading(),
        ];
        MetricsReport {
            updated_at_ms: self.updated_at_ms,
            healthy: gauges.iter().all(|g| g.healthy),
            gauges,
            meters: vec![self.nav_velocity.reading(), self.gate_density.reading()],
        }
    }

    /// Gauge by name.
    pub fn gauge(&self, name: &str) -> Option<&Gauge> {
        [&self.latency_tolerance, &self.threshold_lock, &self.resource_flow]
            .into_iter()
            .find(|g| g.name == name)
    }

    /// Meter by name.
    pub fn meter(&self, name: &str) -> Option<&Meter> {
        [&self.nav_velocity, &self.gate_density]
            .into_iter()
            .find(|m| m.name == name)
    }

    /// The metrics log.
    pub const fn log(&self) -> &HashChainLog {
        &self.log
    }

    /// Verify the metrics log.
    pub fn verify_hash_chain(&self) -> EngineResult<ChainStatus> {
        self.log.verify_hash_chain()
    }
}

/// `0.7 * hit_rate` plus a bonus of 30/20/10/0 for queue depth under 10/50/100/else.
pub fn latency_tolerance(hit_rate: f64, queue_depth: usize) -> f64 {
    let bonus = match queue_depth {
        0..10 => 30.0,
        10..50 => 20.0,
        50..100 => 10.0,
        _ => 0.0,
    };
    0.7f64.mul_add(hit_rate, bonus)
}

/// Share of gate requests handled without throttling, averaged over gates
/// that saw traffic. 100 when no gate has seen traffic.
#[allow(clippy::cast_precision_loss)]
pub fn threshold_lock(mesh: &MeshStats) -> f64 {
    let scores: Vec<f64> = mesh
        .gates
        .iter()
        .filter(|g| g.totals.requests > 0)
        .map(|g| {
            let t = &g.totals;
            let handled = t.allowed + t.breaches();
            100.0 * handled as f64 / t.requests as f64
        })
        .collect();
    if scores.is_empty() {
        return 100.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// `0.6 * hit_rate + 0.4 * (100 - avg_utilization)`.
pub fn resource_flow(hit_rate: f64, avg_utilization: f64) -> f64 {
    0.6f64.mul_add(hit_rate, 0.4 * (100.0 - avg_utilization))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_bonus_steps() {
        assert!((latency_tolerance(100.0, 0) - 100.0).abs() < 1e-9);
        assert!((latency_tolerance(0.0, 10) - 20.0).abs() < 1e-9);
        assert!((latency_tolerance(0.0, 99) - 10.0).abs() < 1e-9);
        assert!((latency_tolerance(50.0, 100) - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_resource_flow() {
        assert!((resource_flow(100.0, 0.0) - 100.0).abs() < 1e-9);
        assert!((resource_flow(50.0, 50.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_gauge_history_is_bounded() {
        let mut gauge = Gauge::new("g", 80.0, 2);
        gauge.set(10.0);
        gauge.set(150.0);
        gauge.set(90.0);
        assert_eq!(gauge.history, VecDeque::from(vec![100.0, 90.0]));
        assert!(gauge.is_healthy());
    }

    #[test]
    fn test_meter_rate_over_window() {
        let mut meter = Meter::new("m", 60, 10);
        meter.record(0, 0.0);
        meter.record(30_000, 30.0);
        assert!((meter.current_rate - 0.5).abs() < 1e-9);
        meter.record(120_000, 90.0);
        assert!(meter.current_rate.abs() < 1e-9);
    }
}
