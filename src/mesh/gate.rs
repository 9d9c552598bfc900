//! Per-domain threshold gates.
//!
//! Validation order: token signature and expiry, token domain and user
//! binding, per-user sliding-window rate limit. Invalid and mismatched
//! tokens count as breach attempts; rate limiting does not.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mesh::token::TokenSigner;
use crate::util::serde::ThresholdDomain;

/// Sliding window for per-user rate limiting and spike detection.
pub const RATE_WINDOW_MS: u64 = 60_000;

/// Verdict of a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Passage granted.
    Allowed,
    /// Token valid but bound to another domain or user.
    Denied,
    /// User exceeded the per-minute limit.
    RateLimited,
    /// Token malformed, forged or expired.
    InvalidToken,
}

impl GateDecision {
    /// Whether this verdict counts as a breach attempt.
    pub const fn is_breach(self) -> bool {
        matches!(self, Self::Denied | Self::InvalidToken)
    }

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Denied => "denied",
            Self::RateLimited => "rate_limited",
            Self::InvalidToken => "invalid_token",
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation as remembered by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    /// When the request arrived.
    pub timestamp_ms: u64,
    /// Caller-supplied user.
    pub user_id: String,
    /// Verdict.
    pub decision: GateDecision,
    /// Why a request was refused.
    pub reason: Option<String>,
}

/// Lifetime counters of a gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateTotals {
    /// Requests seen.
    pub requests: u64,
    /// Requests allowed.
    pub allowed: u64,
    /// Requests denied for domain or user mismatch.
    pub denied: u64,
    /// Requests refused by the rate limit.
    pub rate_limited: u64,
    /// Requests with an invalid token.
    pub invalid_tokens: u64,
}

impl GateTotals {
    /// Denied plus invalid-token requests.
    pub const fn breaches(&self) -> u64 {
        self.denied + self.invalid_tokens
    }
}

/// Kind of advisory anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Request volume close to the rate limit.
    RateSpike,
    /// Many breach attempts in a short window.
    BreachPattern,
}

/// Anomaly severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth a look.
    Warning,
    /// Likely an attack.
    Critical,
}

/// Advisory signal raised by [`ThresholdGate::detect_anomalies`]. Never blocks traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Gate that raised it.
    pub domain: ThresholdDomain,
    /// What was observed.
    pub kind: AnomalyKind,
    /// How bad it is.
    pub severity: Severity,
    /// Events counted in the window.
    pub observed: usize,
    /// Count that had to be exceeded.
    pub threshold: f64,
}

/// Token and rate-limit gate in front of one domain.
#[derive(Debug, Clone)]
pub struct ThresholdGate {
    domain: ThresholdDomain,
    rate_limit: u32,
    access_log: VecDeque<AccessRecord>,
    access_log_capacity: usize,
    user_windows: HashMap<String, VecDeque<u64>>,
    last_user_sweep_ms: u64,
    recent_requests: VecDeque<u64>,
    breach_times: VecDeque<u64>,
    breach_window_ms: u64,
    totals: GateTotals,
}

impl ThresholdGate {
    /// Gate allowing `rate_limit` requests per user per minute.
    pub fn new(
        domain: ThresholdDomain,
        rate_limit: u32,
        access_log_capacity: usize,
        breach_window_secs: u64,
    ) -> Self {
        Self {
            domain,
            rate_limit,
            access_log: VecDeque::with_capacity(access_log_capacity.min(1024)),
            access_log_capacity,
            user_windows: HashMap::new(),
            last_user_sweep_ms: 0,
            recent_requests: VecDeque::new(),
            breach_times: VecDeque::new(),
            breach_window_ms: breach_window_secs * 1000,
            totals: GateTotals::default(),
        }
    }

    /// Domain behind this gate.
    pub const fn domain(&self) -> ThresholdDomain {
        self.domain
    }

    /// Requests per user per minute.
    pub const fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    /// Lifetime counters.
    pub const fn totals(&self) -> GateTotals {
        self.totals
    }

    /// Lifetime breach attempts.
    pub const fn breach_attempts(&self) -> u64 {
        self.totals.breaches()
    }

    /// Most recent access records, oldest first.
    pub const fn access_log(&self) -> &VecDeque<AccessRecord> {
        &self.access_log
    }

    /// Validate `token` for `user_id` at `now_ms`.
    ///
    /// Idle users are swept at most once per rate window, so the tracked
    /// set stays bounded without a separate anomaly pass.
    pub fn validate(
        &mut self,
        token: &str,
        user_id: &str,
        signer: &TokenSigner,
        now_ms: u64,
    ) -> GateDecision {
        if now_ms.saturating_sub(self.last_user_sweep_ms) >= RATE_WINDOW_MS {
            self.prune_idle_users(now_ms);
        }
        self.totals.requests += 1;
        self.recent_requests.push_back(now_ms);
        prune_window(&mut self.recent_requests, now_ms, RATE_WINDOW_MS);

        let claims = match signer.decode(token, now_ms / 1000) {
            Ok(claims) => claims,
            Err(e) => return self.finish(now_ms, user_id, GateDecision::InvalidToken, Some(e.to_string())),
        };
        if claims.domain != self.domain {
            let reason = format!("token issued for {}", claims.domain);
            return self.finish(now_ms, user_id, GateDecision::Denied, Some(reason));
        }
        if claims.user_id != user_id {
            return self.finish(
                now_ms,
                user_id,
                GateDecision::Denied,
                Some("token issued to another user".into()),
            );
        }

        let window = self.user_windows.entry(user_id.to_owned()).or_default();
        prune_window(window, now_ms, RATE_WINDOW_MS);
        if window.len() >= self.rate_limit as usize {
            return self.finish(
                now_ms,
                user_id,
                GateDecision::RateLimited,
                Some(format!("more than {} requests per minute", self.rate_limit)),
            );
        }
        window.push_back(now_ms);
        self.finish(now_ms, user_id, GateDecision::Allowed, None)
    }

    fn finish(
        &mut self,
        now_ms: u64,
        user_id: &str,
        decision: GateDecision,
        reason: Option<String>,
    ) -> GateDecision {
        match decision {
            GateDecision::Allowed => self.totals.allowed += 1,
            GateDecision::Denied => self.totals.denied += 1,
            GateDecision::RateLimited => self.totals.rate_limited += 1,
            GateDecision::InvalidToken => self.totals.invalid_tokens += 1,
        }
        if decision.is_breach() {
            self.breach_times.push_back(now_ms);
            prune_window(&mut self.breach_times, now_ms, self.breach_window_ms);
            tracing::warn!(domain = %self.domain, user = user_id, %decision, "breach attempt");
        }
        if self.access_log.len() >= self.access_log_capacity {
            self.access_log.pop_front();
        }
        self.access_log.push_back(AccessRecord {
            timestamp_ms: now_ms,
            user_id: user_id.to_owned(),
            decision,
            reason,
        });
        decision
    }

    /// Requests seen in the last minute.
    pub fn requests_in_window(&self, now_ms: u64) -> usize {
        count_since(&self.recent_requests, now_ms, RATE_WINDOW_MS)
    }

    /// Breach attempts in the breach window.
    pub fn breaches_in_window(&self, now_ms: u64) -> usize {
        count_since(&self.breach_times, now_ms, self.breach_window_ms)
    }

    /// Advisory anomaly check.
    ///
    /// Flags a rate spike when requests in the last minute exceed
    /// `spike_ratio` of the rate limit, and a critical breach pattern when
    /// breaches in the breach window exceed `breach_threshold`.
    pub fn detect_anomalies(
        &self,
        now_ms: u64,
        spike_ratio: f64,
        breach_threshold: usize,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let requests = self.requests_in_window(now_ms);
        let spike_threshold = f64::from(self.rate_limit) * spike_ratio;
        if count_as_f64(requests) > spike_threshold {
            anomalies.push(Anomaly {
                domain: self.domain,
                kind: AnomalyKind::RateSpike,
                severity: Severity::Warning,
                observed: requests,
                threshold: spike_threshold,
            });
        }

        let breaches = self.breaches_in_window(now_ms);
        if breaches > breach_threshold {
            anomalies.push(Anomaly {
                domain: self.domain,
                kind: AnomalyKind::BreachPattern,
                severity: Severity::Critical,
                observed: breaches,
                threshold: count_as_f64(breach_threshold),
            });
        }
        anomalies
    }

    /// Forget users with no requests in the current window.
    pub fn prune_idle_users(&mut self, now_ms: u64) {
        self.last_user_sweep_ms = now_ms;
        self.user_windows.retain(|_, window| {
            prune_window(window, now_ms, RATE_WINDOW_MS);
            !window.is_empty()
        });
    }

    /// Users currently tracked by the rate limiter.
    pub fn tracked_users(&self) -> usize {
        self.user_windows.len()
    }
}

fn prune_window(window: &mut VecDeque<u64>, now_ms: u64, width_ms: u64) {
    let cutoff = now_ms.saturating_sub(width_ms);
    while window.front().is_some_and(|&ts| ts <= cutoff) {
        window.pop_front();
    }
}

fn count_since(window: &VecDeque<u64>, now_ms: u64, width_ms: u64) -> usize {
    let cutoff = now_ms.saturating_sub(width_ms);
    window.iter().filter(|&&ts| ts > cutoff).count()
}

#[allow(clippy::cast_precision_loss)]
fn count_as_f64(count: usize) -> f64 {
    count as f64
}
