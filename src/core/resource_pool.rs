//! Typed resource pools with capacity accounting.
//!
//! A pool never blocks: an allocation either fits under `capacity` right now
//! or is refused and counted as waiting. The scheduler turns refusals into
//! backoff and the auto-scaler turns sustained waiting into more capacity.

use serde::{Deserialize, Serialize};

use crate::core::{EngineError, EngineResult};
use crate::util::serde::ResourceKind;

/// Capacity accounting for one resource kind.
///
/// Invariant: `allocated <= capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePool {
    /// Kind of resource this pool hands out.
    pub resource_type: ResourceKind,
    /// Units available in total.
    pub capacity: u32,
    /// Units currently handed out.
    pub allocated: u32,
    /// Requests refused and not yet satisfied.
    pub waiting_count: u32,
    /// Allocation attempts seen.
    pub total_requests: u64,
    /// Allocation attempts refused.
    pub failed_requests: u64,
}

impl ResourcePool {
    /// Create an empty pool.
    pub const fn new(resource_type: ResourceKind, capacity: u32) -> Self {
        Self {
            resource_type,
            capacity,
            allocated: 0,
            waiting_count: 0,
            total_requests: 0,
            failed_requests: 0,
        }
    }

    /// Units still free.
    pub const fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.allocated)
    }

    /// Allocated share of capacity in percent.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 100.0;
        }
        f64::from(self.allocated) / f64::from(self.capacity) * 100.0
    }

    /// Reserve `amount` units or refuse immediately.
    ///
    /// A refusal bumps `waiting_count`; the caller clears it with
    /// [`stop_waiting`](Self::stop_waiting) once the request is resolved.
    pub fn allocate(&mut self, amount: u32) -> EngineResult<()> {
        self.total_requests += 1;
        let fits = self
            .allocated
            .checked_add(amount)
            .is_some_and(|total| total <= self.capacity);
        if !fits {
            self.failed_requests += 1;
            self.waiting_count += 1;
            return Err(EngineError::ResourceExhausted {
                kind: self.resource_type,
                requested: amount,
                available: self.available(),
            });
        }
        self.allocated += amount;
        Ok(())
    }

    /// Return `amount` units. Over-release is clamped at zero.
    pub fn release(&mut self, amount: u32) {
        if amount > self.allocated {
            tracing::warn!(
                kind = %self.resource_type,
                amount,
                allocated = self.allocated,
                "release exceeds allocation; clamping"
            );
        }
        self.allocated = self.allocated.saturating_sub(amount);
    }

    /// A previously refused request no longer waits.
    pub fn stop_waiting(&mut self) {
        self.waiting_count = self.waiting_count.saturating_sub(1);
    }

    /// Grow capacity by `step`.
    pub fn scale_up(&mut self, step: u32) -> u32 {
        self.capacity = self.capacity.saturating_add(step);
        self.capacity
    }

    /// Shrink capacity by `step`, never below `floor` nor below `allocated`.
    pub fn scale_down(&mut self, step: u32, floor: u32) -> u32 {
        self.capacity = self
            .capacity
            .saturating_sub(step)
            .max(floor)
            .max(self.allocated);
        self.capacity
    }
}

/// Anything that can hand out and take back pool capacity.
///
/// Implemented by [`TaskScheduler`](crate::core::TaskScheduler) so that the
/// entity manager can draw on the same pools as scheduled tasks.
pub trait ResourceProvider {
    /// Reserve `amount` units of `kind`.
    fn allocate(&mut self, kind: ResourceKind, amount: u32) -> EngineResult<()>;
    /// Return `amount` units of `kind`.
    fn release(&mut self, kind: ResourceKind, amount: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_within_capacity() {
        let mut pool = ResourcePool::new(ResourceKind::Compute, 10);
        pool.allocate(4).unwrap();
        pool.allocate(6).unwrap();
        assert_eq!(pool.allocated, 10);
        assert_eq!(pool.total_requests, 2);
        assert_eq!(pool.failed_requests, 0);
        assert!((pool.utilization() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_allocate_refused_counts_waiting() {
        let mut pool = ResourcePool::new(ResourceKind::Storage, 5);
        pool.allocate(3).unwrap();
        let err = pool.allocate(3).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ResourceExhausted { requested: 3, available: 2, .. }
        ));
        assert_eq!(pool.allocated, 3);
        assert_eq!(pool.waiting_count, 1);
        assert_eq!(pool.failed_requests, 1);
        pool.stop_waiting();
        assert_eq!(pool.waiting_count, 0);
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let mut pool = ResourcePool::new(ResourceKind::Network, 5);
        pool.allocate(2).unwrap();
        pool.release(7);
        assert_eq!(pool.allocated, 0);
    }

    #[test]
    fn test_scale_down_never_below_allocated() {
        let mut pool = ResourcePool::new(ResourceKind::Database, 20);
        pool.allocate(18).unwrap();
        assert_eq!(pool.scale_down(5, 5), 18);
        pool.release(18);
        assert_eq!(pool.scale_down(5, 5), 13);
        assert_eq!(pool.scale_down(50, 5), 5);
    }
}
