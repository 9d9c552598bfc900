//! Task queue backends.

pub mod memory;

pub use memory::InMemoryQueue;

use crate::core::scheduler::Task;

/// Ordered holding area for tasks awaiting a scheduler cycle.
///
/// Tasks leave in ascending priority value (critical first); equal
/// priorities leave in arrival order.
pub trait TaskQueue: Send {
    /// Append a newly submitted task.
    fn enqueue(&mut self, task: Task);
    /// Insert tasks ahead of every queued task of equal priority, keeping
    /// their relative order.
    fn merge_front(&mut self, tasks: Vec<Task>);
    /// Remove the next task.
    fn dequeue(&mut self) -> Option<Task>;
    /// Current depth.
    fn len(&self) -> usize;
    /// True when nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Remove every task in processing order.
    fn drain_ordered(&mut self) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(self.len());
        while let Some(task) = self.dequeue() {
            tasks.push(task);
        }
        tasks
    }
}
