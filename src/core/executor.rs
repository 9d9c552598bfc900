//! Task execution seam.

use crate::core::scheduler::Task;
use crate::core::EngineResult;

/// Runs the work a task stands for once its resources are allocated.
///
/// Execution happens inline on the thread calling
/// [`TaskScheduler::run_cycle`](crate::core::TaskScheduler::run_cycle); an
/// error counts as a failed attempt and sends the task through backoff.
///
/// # Example
///
/// ```rust
/// use threshold_engine::core::{EngineError, EngineResult, Task, TaskExecutor};
///
/// struct RejectEmpty;
///
/// impl TaskExecutor for RejectEmpty {
///     fn execute(&mut self, task: &Task) -> EngineResult<()> {
///         if task.payload.is_null() {
///             return Err(EngineError::TaskFailed(format!("{} has no payload", task.id)));
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait TaskExecutor: Send {
    /// Execute `task`. Resources are released by the scheduler afterwards.
    fn execute(&mut self, task: &Task) -> EngineResult<()>;
}

/// Executor that accepts every task without doing any work.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedExecutor;

impl TaskExecutor for SimulatedExecutor {
    fn execute(&mut self, task: &Task) -> EngineResult<()> {
        tracing::debug!(task = %task.id, kind = %task.resource_type, "simulated execution");
        Ok(())
    }
}

impl<F> TaskExecutor for F
where
    F: FnMut(&Task) -> EngineResult<()> + Send,
{
    fn execute(&mut self, task: &Task) -> EngineResult<()> {
        self(task)
    }
}
