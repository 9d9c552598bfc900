//! Navigation routes and their observed health.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Path through a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    /// Preferred path.
    Primary,
    /// Used when the primary is unhealthy.
    Failover,
    /// Last resort, also used for explicit offline navigation.
    Offline,
}

impl RouteKind {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Failover => "failover",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counters for one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationRoute {
    /// Which path this is.
    pub kind: RouteKind,
    /// Successful traversals.
    pub success_count: u64,
    /// Failed traversals.
    pub failure_count: u64,
    /// Latency of the latest traversal.
    pub last_latency_ms: u64,
    /// Mean latency over all traversals.
    pub avg_latency_ms: f64,
}

impl NavigationRoute {
    /// Route with no history.
    pub const fn new(kind: RouteKind) -> Self {
        Self {
            kind,
            success_count: 0,
            failure_count: 0,
            last_latency_ms: 0,
            avg_latency_ms: 0.0,
        }
    }

    /// Traversals recorded.
    pub const fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Successful share of traversals, 1.0 when untried.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => self.success_count as f64 / total as f64,
        }
    }

    /// Healthy iff the success rate is above one half.
    pub fn is_healthy(&self) -> bool {
        self.success_rate() > 0.5
    }

    /// Record one traversal.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, success: bool, latency_ms: u64) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        let n = self.total() as f64;
        self.avg_latency_ms += (latency_ms as f64 - self.avg_latency_ms) / n;
        self.last_latency_ms = latency_ms;
    }
}

/// The three routes of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRoutes {
    /// Preferred path.
    pub primary: NavigationRoute,
    /// Backup path.
    pub failover: NavigationRoute,
    /// Offline path.
    pub offline: NavigationRoute,
}

impl DomainRoutes {
    /// Fresh routes.
    pub const fn new() -> Self {
        Self {
            primary: NavigationRoute::new(RouteKind::Primary),
            failover: NavigationRoute::new(RouteKind::Failover),
            offline: NavigationRoute::new(RouteKind::Offline),
        }
    }

    /// Route by kind.
    pub const fn get(&self, kind: RouteKind) -> &NavigationRoute {
        match kind {
            RouteKind::Primary => &self.primary,
            RouteKind::Failover => &self.failover,
            RouteKind::Offline => &self.offline,
        }
    }

    /// Mutable route by kind.
    pub fn get_mut(&mut self, kind: RouteKind) -> &mut NavigationRoute {
        match kind {
            RouteKind::Primary => &mut self.primary,
            RouteKind::Failover => &mut self.failover,
            RouteKind::Offline => &mut self.offline,
        }
    }

    /// Primary if healthy, else failover if healthy, else offline.
    pub fn select(&self) -> RouteKind {
        if self.primary.is_healthy() {
            RouteKind::Primary
        } else if self.failover.is_healthy() {
            RouteKind::Failover
        } else {
            RouteKind::Offline
        }
    }
}

impl Default for DomainRoutes {
    fn default() -> Self {
        Self::new()
    }
}
