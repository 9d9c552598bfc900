//! Zero-trust navigation mesh.
//!
//! Three independent threshold domains, each behind a [`ThresholdGate`] and
//! served by a primary, failover and offline route. Every gate decision,
//! path switch and anomaly is written to the mesh's hash-chained log.

pub mod gate;
pub mod route;
pub mod token;

pub use gate::{
    AccessRecord, Anomaly, AnomalyKind, GateDecision, GateTotals, Severity, ThresholdGate,
    RATE_WINDOW_MS,
};
pub use route::{DomainRoutes, NavigationRoute, RouteKind};
pub use token::{NavigationToken, TokenSecret, TokenSigner};

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::MeshConfig;
use crate::core::audit::{ChainStatus, HashChainLog};
use crate::core::{EngineError, EngineResult};
use crate::util::clock::SharedClock;
use crate::util::serde::ThresholdDomain;

/// Successful navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    /// Domain entered.
    pub domain: ThresholdDomain,
    /// Route taken.
    pub route: RouteKind,
    /// True when a non-primary route was chosen because of health.
    pub switched: bool,
    /// Time spent gating and routing.
    pub latency_ms: u64,
}

/// Per-gate statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStats {
    /// Domain.
    pub domain: ThresholdDomain,
    /// Requests per user per minute.
    pub rate_limit: u32,
    /// Lifetime counters.
    pub totals: GateTotals,
    /// Routes of the domain.
    pub routes: DomainRoutes,
}

/// Mesh-wide statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshStats {
    /// Times a non-primary route was selected because of health.
    pub path_switches: u64,
    /// Gate requests across domains.
    pub total_requests: u64,
    /// Per-domain breakdown.
    pub gates: Vec<GateStats>,
}

/// Gates and routes for every threshold domain.
#[derive(Debug)]
pub struct NavigationMesh {
    config: MeshConfig,
    signer: TokenSigner,
    gates: BTreeMap<ThresholdDomain, ThresholdGate>,
    routes: BTreeMap<ThresholdDomain, DomainRoutes>,
    path_switches: u64,
    log: HashChainLog,
    clock: SharedClock,
}

impl NavigationMesh {
    /// Build one gate and route set per domain.
    pub fn new(config: MeshConfig, secret: TokenSecret, log: HashChainLog, clock: SharedClock) -> Self {
        let gates = ThresholdDomain::ALL
            .into_iter()
            .map(|domain| {
                let gate = ThresholdGate::new(
                    domain,
                    config.rate_limit_for(domain),
                    config.access_log_capacity,
                    config.breach_window_secs,
                );
                (domain, gate)
            })
            .collect();
        let routes = ThresholdDomain::ALL
            .into_iter()
            .map(|domain| (domain, DomainRoutes::new()))
            .collect();
        Self {
            signer: TokenSigner::new(secret, config.token_ttl_secs),
            config,
            gates,
            routes,
            path_switches: 0,
            log,
            clock,
        }
    }

    /// Issue a signed token for `user_id` into `domain`.
    pub fn issue_token(&mut self, domain: ThresholdDomain, user_id: &str) -> EngineResult<String> {
        let token = self.signer.issue(domain, user_id, self.clock.now_secs())?;
        self.log.record(
            "token_issued",
            json!({ "domain": domain, "user_id": user_id, "ttl_secs": self.signer.ttl_secs() }),
        );
        Ok(token)
    }

    /// Decode a token without touching any gate.
    pub fn decode_token(&self, token: &str) -> EngineResult<NavigationToken> {
        self.signer.decode(token, self.clock.now_secs())
    }

    /// Run `token` through the gate of `domain`.
    pub fn validate(&mut self, domain: ThresholdDomain, token: &str, user_id: &str) -> GateDecision {
        let now = self.clock.now_ms();
        let Some(gate) = self.gates.get_mut(&domain) else {
            return GateDecision::Denied;
        };
        let decision = gate.validate(token, user_id, &self.signer, now);
        let reason = gate.access_log().back().and_then(|r| r.reason.clone());
        self.log.record(
            "gate_validation",
            json!({
                "domain": domain,
                "user_id": user_id,
                "decision": decision,
                "reason": reason,
            }),
        );
        decision
    }

    /// Enter `domain`.
    ///
    /// With `offline_mode` the offline route is used without validation.
    /// Otherwise the gate must allow the request, and the healthiest route
    /// is chosen: primary, failover, offline in that order.
    pub fn navigate(
        &mut self,
        domain: ThresholdDomain,
        token: &str,
        user_id: &str,
        offline_mode: bool,
    ) -> EngineResult<Navigation> {
        let started = Instant::now();

        if offline_mode {
            let latency_ms = elapsed_ms(started);
            self.routes_mut(domain).offline.record(true, latency_ms);
            self.log.record(
                "navigation",
                json!({
                    "domain": domain,
                    "user_id": user_id,
                    "route": RouteKind::Offline,
                    "offline_mode": true,
                }),
            );
            return Ok(Navigation {
                domain,
                route: RouteKind::Offline,
                switched: false,
                latency_ms,
            });
        }

        let decision = self.validate(domain, token, user_id);
        if decision != GateDecision::Allowed {
            return Err(EngineError::AccessDenied { domain, decision });
        }

        let route = self.routes_mut(domain).select();
        let switched = route != RouteKind::Primary;
        if switched {
            self.path_switches += 1;
            tracing::info!(%domain, %route, "primary route unhealthy, switching path");
            self.log.record(
                "path_switch",
                json!({ "domain": domain, "route": route, "path_switches": self.path_switches }),
            );
        }

        let latency_ms = elapsed_ms(started);
        self.routes_mut(domain).get_mut(route).record(true, latency_ms);
        self.log.record(
            "navigation",
            json!({
                "domain": domain,
                "user_id": user_id,
                "route": route,
                "offline_mode": false,
                "latency_ms": latency_ms,
            }),
        );
        Ok(Navigation {
            domain,
            route,
            switched,
            latency_ms,
        })
    }

    /// Feed an observed traversal outcome back into route health.
    pub fn report_route_outcome(
        &mut self,
        domain: ThresholdDomain,
        route: RouteKind,
        success: bool,
        latency_ms: u64,
    ) {
        let entry = self.routes_mut(domain).get_mut(route);
        entry.record(success, latency_ms);
        let healthy = entry.is_healthy();
        self.log.record(
            "route_outcome",
            json!({
                "domain": domain,
                "route": route,
                "success": success,
                "latency_ms": latency_ms,
                "healthy": healthy,
            }),
        );
    }

    fn routes_mut(&mut self, domain: ThresholdDomain) -> &mut DomainRoutes {
        self.routes.entry(domain).or_default()
    }

    /// Advisory anomalies for one domain. Each is logged.
    pub fn detect_anomalies(&mut self, domain: ThresholdDomain) -> Vec<Anomaly> {
        let now = self.clock.now_ms();
        let Some(gate) = self.gates.get_mut(&domain) else {
            return Vec::new();
        };
        gate.prune_idle_users(now);
        let anomalies =
            gate.detect_anomalies(now, self.config.rate_spike_ratio, self.config.breach_threshold);
        for anomaly in &anomalies {
            tracing::warn!(
                %domain,
                kind = ?anomaly.kind,
                severity = ?anomaly.severity,
                observed = anomaly.observed,
                "anomaly detected"
            );
            self.log.record(
                "anomaly_detected",
                json!({
                    "domain": domain,
                    "kind": anomaly.kind,
                    "severity": anomaly.severity,
                    "observed": anomaly.observed,
                    "threshold": anomaly.threshold,
                }),
            );
        }
        anomalies
    }

    /// Advisory anomalies across every domain.
    pub fn detect_all_anomalies(&mut self) -> Vec<Anomaly> {
        ThresholdDomain::ALL
            .into_iter()
            .flat_map(|domain| self.detect_anomalies(domain))
            .collect()
    }

    /// Gate of `domain`.
    pub fn gate(&self, domain: ThresholdDomain) -> Option<&ThresholdGate> {
        self.gates.get(&domain)
    }

    /// Routes of `domain`.
    pub fn routes(&self, domain: ThresholdDomain) -> Option<&DomainRoutes> {
        self.routes.get(&domain)
    }

    /// Path switches since start.
    pub const fn path_switches(&self) -> u64 {
        self.path_switches
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> MeshStats {
        let gates: Vec<GateStats> = self
            .gates
            .values()
            .map(|gate| GateStats {
                domain: gate.domain(),
                rate_limit: gate.rate_limit(),
                totals: gate.totals(),
                routes: self.routes.get(&gate.domain()).cloned().unwrap_or_default(),
            })
            .collect();
        MeshStats {
            path_switches: self.path_switches,
            total_requests: gates.iter().map(|g| g.totals.requests).sum(),
            gates,
        }
    }

    /// The mesh's hash-chained log.
    pub const fn log(&self) -> &HashChainLog {
        &self.log
    }

    /// Verify the mesh log.
    pub fn verify_hash_chain(&self) -> EngineResult<ChainStatus> {
        self.log.verify_hash_chain()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
