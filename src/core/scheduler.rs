//! Priority task scheduler over typed resource pools.
//!
//! The scheduler is pull-based: nothing happens until the embedding
//! application calls [`TaskScheduler::run_cycle`]. One cycle
//!
//! 1. merges retries whose backoff has elapsed into the main queue,
//! 2. processes every queued task once in priority order,
//! 3. runs the auto-scaling check if its interval has elapsed,
//! 4. refreshes health metrics.
//!
//! Allocation refusals are expected backpressure. They only surface as
//! `task_permanently_failed` once a task runs out of attempts.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::SchedulerConfig;
use crate::core::audit::{ChainStatus, HashChainLog};
use crate::core::executor::{SimulatedExecutor, TaskExecutor};
use crate::core::resource_pool::{ResourcePool, ResourceProvider};
use crate::core::{EngineError, EngineResult};
use crate::infra::queue::{InMemoryQueue, TaskQueue};
use crate::util::clock::SharedClock;
use crate::util::serde::{Priority, ResourceKind, TaskId};

/// Attempts granted by [`Task::new`].
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A unit of work waiting for pool capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,
    /// Queue ordering.
    pub priority: Priority,
    /// Pool the task draws on.
    pub resource_type: ResourceKind,
    /// Units held while the task runs.
    pub resource_amount: u32,
    /// Opaque caller data.
    pub payload: Value,
    /// Submission time in milliseconds since epoch. Zero is stamped from the
    /// scheduler clock on submission.
    pub created_at_ms: u64,
    /// Failed attempts so far.
    pub attempts: u32,
    /// Attempts allowed before permanent failure. Zero means the scheduler default.
    pub max_attempts: u32,
    /// Earliest time the next attempt may run.
    pub next_retry_at_ms: Option<u64>,
    #[serde(skip)]
    waiting: bool,
}

impl Task {
    /// Create a task with [`DEFAULT_MAX_ATTEMPTS`] and a null payload.
    pub fn new(
        id: impl Into<TaskId>,
        priority: Priority,
        resource_type: ResourceKind,
        resource_amount: u32,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            resource_type,
            resource_amount,
            payload: Value::Null,
            created_at_ms,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            next_retry_at_ms: None,
            waiting: false,
        }
    }

    /// Create a task with a random identifier.
    pub fn with_random_id(
        priority: Priority,
        resource_type: ResourceKind,
        resource_amount: u32,
        created_at_ms: u64,
    ) -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            priority,
            resource_type,
            resource_amount,
            created_at_ms,
        )
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Override the attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Capacity change made by the auto-scaler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingEvent {
    /// Pool that changed.
    pub resource_type: ResourceKind,
    /// Capacity before.
    pub from: u32,
    /// Capacity after.
    pub to: u32,
}

/// Derived health figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Average pool utilization in percent.
    pub cpu: f64,
    /// Memory estimate in percent.
    pub memory: f64,
    /// Main plus retry queue length.
    pub queue_depth: usize,
    /// Errors per processed task.
    pub error_rate: f64,
    /// No threshold exceeded.
    pub healthy: bool,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Retries moved back into the main queue.
    pub merged_retries: usize,
    /// Tasks completed, in processing order.
    pub completed: Vec<TaskId>,
    /// Tasks sent to the retry queue.
    pub retried: Vec<TaskId>,
    /// Tasks that ran out of attempts.
    pub permanently_failed: Vec<TaskId>,
    /// Auto-scaling changes.
    pub scaling: Vec<ScalingEvent>,
    /// Health after the cycle.
    pub health: HealthMetrics,
}

/// Aggregate scheduler statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Main queue length.
    pub queue_len: usize,
    /// Retry queue length.
    pub retry_len: usize,
    /// Tasks completed since start.
    pub total_processed: u64,
    /// Errors since start.
    pub total_errors: u64,
    /// Tasks failed permanently since start.
    pub permanently_failed: u64,
    /// Pool snapshots.
    pub pools: Vec<ResourcePool>,
    /// Average pool utilization in percent.
    pub avg_utilization: f64,
    /// Last computed health.
    pub health: HealthMetrics,
}

/// Priority scheduler owning one pool per resource kind.
pub struct TaskScheduler<E = SimulatedExecutor, Q = InMemoryQueue> {
    config: SchedulerConfig,
    pools: BTreeMap<ResourceKind, ResourcePool>,
    queue: Q,
    retry_queue: Vec<Task>,
    completed: VecDeque<Task>,
    failed: VecDeque<Task>,
    executor: E,
    log: HashChainLog,
    clock: SharedClock,
    last_scale_check_ms: u64,
    total_processed: u64,
    total_errors: u64,
    total_failed: u64,
    health: HealthMetrics,
}

impl<E, Q> std::fmt::Debug for TaskScheduler<E, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("pools", &self.pools)
            .field("retry_queue", &self.retry_queue.len())
            .field("total_processed", &self.total_processed)
            .field("total_errors", &self.total_errors)
            .finish_non_exhaustive()
    }
}

impl<E: TaskExecutor> TaskScheduler<E, InMemoryQueue> {
    /// Scheduler with an in-memory queue.
    pub fn new(config: SchedulerConfig, executor: E, log: HashChainLog, clock: SharedClock) -> Self {
        Self::with_queue(config, executor, InMemoryQueue::new(), log, clock)
    }
}

impl<E: TaskExecutor, Q: TaskQueue> TaskScheduler<E, Q> {
    /// Scheduler over a caller-supplied queue backend.
    pub fn with_queue(
        config: SchedulerConfig,
        executor: E,
        queue: Q,
        log: HashChainLog,
        clock: SharedClock,
    ) -> Self {
        let pools = ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, ResourcePool::new(kind, config.capacity_for(kind))))
            .collect();
        let now = clock.now_ms();
        let mut scheduler = Self {
            config,
            pools,
            queue,
            retry_queue: Vec::new(),
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            executor,
            log,
            clock,
            last_scale_check_ms: now,
            total_processed: 0,
            total_errors: 0,
            total_failed: 0,
            health: HealthMetrics::default(),
        };
        scheduler.refresh_health();
        scheduler
    }

    /// Enqueue a task. Never refused.
    pub fn submit_task(&mut self, mut task: Task) -> TaskId {
        if task.max_attempts == 0 {
            task.max_attempts = self.config.default_max_attempts;
        }
        if task.created_at_ms == 0 {
            task.created_at_ms = self.clock.now_ms();
        }
        let id = task.id.clone();
        self.log.record(
            "task_submitted",
            json!({
                "task_id": task.id,
                "priority": task.priority,
                "resource_type": task.resource_type,
                "resource_amount": task.resource_amount,
                "created_at_ms": task.created_at_ms,
            }),
        );
        tracing::debug!(task = %id, priority = ?task.priority, "task submitted");
        self.queue.enqueue(task);
        id
    }

    /// Run one scheduling cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let now = self.clock.now_ms();
        let mut report = CycleReport::default();

        let (due, pending): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.retry_queue)
            .into_iter()
            .partition(|t| t.next_retry_at_ms.is_none_or(|at| at <= now));
        self.retry_queue = pending;
        report.merged_retries = due.len();
        if !due.is_empty() {
            self.queue.merge_front(due);
        }

        for task in self.queue.drain_ordered() {
            self.process(task, now, &mut report);
        }

        report.scaling = self.check_auto_scaling_at(now);
        self.refresh_health();
        report.health = self.health.clone();

        tracing::debug!(
            completed = report.completed.len(),
            retried = report.retried.len(),
            failed = report.permanently_failed.len(),
            "cycle finished"
        );
        report
    }

    fn process(&mut self, mut task: Task, now: u64, report: &mut CycleReport) {
        let kind = task.resource_type;
        let amount = task.resource_amount;
        let Some(pool) = self.pools.get_mut(&kind) else {
            self.fail_attempt(task, &format!("no pool for {kind}"), now, report);
            return;
        };

        if task.waiting {
            pool.stop_waiting();
            task.waiting = false;
        }
        if let Err(e) = pool.allocate(amount) {
            tracing::debug!(task = %task.id, "allocation refused: {}", e);
            task.waiting = true;
            self.fail_attempt(task, &e.to_string(), now, report);
            return;
        }

        let started = Instant::now();
        let result = self.executor.execute(&task);
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        pool.release(amount);

        if elapsed_ms > self.config.slow_task_warn_ms {
            tracing::warn!(task = %task.id, elapsed_ms, "slow task");
            self.log.record(
                "task_slow",
                json!({ "task_id": task.id, "elapsed_ms": elapsed_ms }),
            );
        }

        match result {
            Ok(()) => {
                self.total_processed += 1;
                self.log.record(
                    "task_completed",
                    json!({
                        "task_id": task.id,
                        "resource_type": kind,
                        "attempts": task.attempts,
                        "elapsed_ms": elapsed_ms,
                    }),
                );
                report.completed.push(task.id.clone());
                self.completed.push_back(task);
                while self.completed.len() > self.config.completed_history {
                    self.completed.pop_front();
                }
            }
            Err(e) => {
                self.total_errors += 1;
                self.fail_attempt(task, &e.to_string(), now, report);
            }
        }
    }

    fn fail_attempt(&mut self, mut task: Task, reason: &str, now: u64, report: &mut CycleReport) {
        task.attempts += 1;
        if task.attempts < task.max_attempts {
            let delay_secs = backoff_secs(task.attempts, self.config.max_backoff_secs);
            task.next_retry_at_ms = Some(now + delay_secs * 1000);
            self.log.record(
                "task_retry_scheduled",
                json!({
                    "task_id": task.id,
                    "attempts": task.attempts,
                    "delay_secs": delay_secs,
                    "reason": reason,
                }),
            );
            report.retried.push(task.id.clone());
            self.retry_queue.push(task);
            return;
        }

        if task.waiting {
            if let Some(pool) = self.pools.get_mut(&task.resource_type) {
                pool.stop_waiting();
            }
            task.waiting = false;
            self.total_errors += 1;
        }
        tracing::warn!(task = %task.id, attempts = task.attempts, "task permanently failed: {}", reason);
        self.log.record(
            "task_permanently_failed",
            json!({
                "task_id": task.id,
                "attempts": task.attempts,
                "reason": reason,
            }),
        );
        report.permanently_failed.push(task.id.clone());
        self.total_failed += 1;
        self.failed.push_back(task);
        while self.failed.len() > self.config.failed_history {
            self.failed.pop_front();
        }
    }

    /// Run the auto-scaling check if the interval has elapsed.
    pub fn check_auto_scaling(&mut self) -> Vec<ScalingEvent> {
        let now = self.clock.now_ms();
        self.check_auto_scaling_at(now)
    }

    fn check_auto_scaling_at(&mut self, now: u64) -> Vec<ScalingEvent> {
        let interval_ms = self.config.scale_check_interval_secs * 1000;
        if now.saturating_sub(self.last_scale_check_ms) < interval_ms {
            return Vec::new();
        }
        self.last_scale_check_ms = now;

        let mut events = Vec::new();
        for pool in self.pools.values_mut() {
            let utilization = pool.utilization();
            let from = pool.capacity;
            let (event, to) = if utilization > self.config.scale_up_utilization
                && pool.waiting_count > 0
            {
                ("auto_scaled_up", pool.scale_up(self.config.scale_step))
            } else if utilization < self.config.scale_down_utilization
                && pool.capacity > self.config.min_capacity
            {
                (
                    "auto_scaled_down",
                    pool.scale_down(self.config.scale_step, self.config.min_capacity),
                )
            } else {
                continue;
            };
            if to == from {
                continue;
            }
            tracing::info!(kind = %pool.resource_type, from, to, utilization, "{}", event);
            self.log.record(
                event,
                json!({
                    "resource_type": pool.resource_type,
                    "from": from,
                    "to": to,
                    "utilization": utilization,
                    "waiting_count": pool.waiting_count,
                }),
            );
            events.push(ScalingEvent {
                resource_type: pool.resource_type,
                from,
                to,
            });
        }
        events
    }

    fn refresh_health(&mut self) {
        let cpu = self.avg_utilization();
        let memory = cpu * 0.8;
        let queue_depth = self.queue.len() + self.retry_queue.len();
        let error_rate = if self.total_processed == 0 {
            0.0
        } else {
            ratio(self.total_errors, self.total_processed)
        };
        let healthy = !(cpu > 80.0 || memory > 85.0 || queue_depth > 100 || error_rate > 0.10);
        if self.health.healthy && !healthy {
            tracing::warn!(cpu, queue_depth, error_rate, "scheduler unhealthy");
        }
        self.health = HealthMetrics {
            cpu,
            memory,
            queue_depth,
            error_rate,
            healthy,
        };
    }

    /// Average utilization across pools in percent.
    pub fn avg_utilization(&self) -> f64 {
        if self.pools.is_empty() {
            return 0.0;
        }
        let total: f64 = self.pools.values().map(ResourcePool::utilization).sum();
        total / f64::from(u32::try_from(self.pools.len()).unwrap_or(u32::MAX))
    }

    /// Pool for `kind`.
    pub fn pool(&self, kind: ResourceKind) -> Option<&ResourcePool> {
        self.pools.get(&kind)
    }

    /// Every pool.
    pub fn pools(&self) -> impl Iterator<Item = &ResourcePool> {
        self.pools.values()
    }

    /// Recently completed tasks, oldest first.
    pub fn completed(&self) -> impl Iterator<Item = &Task> {
        self.completed.iter()
    }

    /// Recently failed tasks, oldest first, up to `failed_history`.
    pub const fn permanently_failed(&self) -> &VecDeque<Task> {
        &self.failed
    }

    /// Tasks waiting for their backoff to elapse.
    pub fn retry_queue(&self) -> &[Task] {
        &self.retry_queue
    }

    /// Main plus retry queue length.
    pub fn queue_depth(&self) -> usize {
        self.queue.len() + self.retry_queue.len()
    }

    /// Health as of the last cycle.
    pub const fn health(&self) -> &HealthMetrics {
        &self.health
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queue_len: self.queue.len(),
            retry_len: self.retry_queue.len(),
            total_processed: self.total_processed,
            total_errors: self.total_errors,
            permanently_failed: self.total_failed,
            pools: self.pools.values().cloned().collect(),
            avg_utilization: self.avg_utilization(),
            health: self.health.clone(),
        }
    }

    /// The scheduler's hash-chained log.
    pub const fn log(&self) -> &HashChainLog {
        &self.log
    }

    /// Verify the scheduler log.
    pub fn verify_hash_chain(&self) -> EngineResult<ChainStatus> {
        self.log.verify_hash_chain()
    }
}

impl<E: TaskExecutor, Q: TaskQueue> ResourceProvider for TaskScheduler<E, Q> {
    fn allocate(&mut self, kind: ResourceKind, amount: u32) -> EngineResult<()> {
        let pool = self.pools.get_mut(&kind).ok_or(EngineError::ResourceExhausted {
            kind,
            requested: amount,
            available: 0,
        })?;
        if let Err(e) = pool.allocate(amount) {
            // Direct callers do not retry through the scheduler, so they never wait.
            pool.stop_waiting();
            return Err(e);
        }
        self.log.record(
            "resources_allocated",
            json!({ "resource_type": kind, "amount": amount }),
        );
        Ok(())
    }

    fn release(&mut self, kind: ResourceKind, amount: u32) {
        if let Some(pool) = self.pools.get_mut(&kind) {
            pool.release(amount);
            self.log.record(
                "resources_released",
                json!({ "resource_type": kind, "amount": amount }),
            );
        }
    }
}

/// Retry delay after `attempts` failures: `min(cap, 2^attempts)` seconds.
pub fn backoff_secs(attempts: u32, cap_secs: u64) -> u64 {
    2u64.checked_pow(attempts).unwrap_or(u64::MAX).min(cap_secs)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    numerator as f64 / denominator as f64
}
