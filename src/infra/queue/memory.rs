//! In-memory priority queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::scheduler::Task;
use crate::infra::queue::TaskQueue;

/// Wrapper ordering tasks by priority (critical first) then by sequence.
struct PriorityTask {
    seq: i64,
    task: Task,
}

impl PartialEq for PriorityTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for PriorityTask {}

impl PartialOrd for PriorityTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: lower priority value and lower sequence must compare greater.
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// In-memory queue storing tasks in a binary heap.
///
/// Sequence numbers give a stable order within a priority: submissions count
/// up from zero, merged retries count down below every existing sequence.
#[derive(Default)]
pub struct InMemoryQueue {
    tasks: BinaryHeap<PriorityTask>,
    next_seq: i64,
    front_seq: i64,
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueue")
            .field("len", &self.tasks.len())
            .finish()
    }
}

impl TaskQueue for InMemoryQueue {
    fn enqueue(&mut self, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.tasks.push(PriorityTask { seq, task });
    }

    fn merge_front(&mut self, tasks: Vec<Task>) {
        let count = i64::try_from(tasks.len()).unwrap_or(i64::MAX);
        let base = self.front_seq - count;
        for (offset, task) in (0..).zip(tasks) {
            self.tasks.push(PriorityTask {
                seq: base + offset,
                task,
            });
        }
        self.front_seq = base;
    }

    fn dequeue(&mut self) -> Option<Task> {
        self.tasks.pop().map(|pt| pt.task)
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::serde::{Priority, ResourceKind};

    fn make_task(id: &str, priority: Priority) -> Task {
        Task::new(id, priority, ResourceKind::Compute, 1, 0)
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_priority_ordering() {
        let mut q = InMemoryQueue::new();
        q.enqueue(make_task("low", Priority::Low));
        q.enqueue(make_task("critical", Priority::Critical));
        q.enqueue(make_task("normal", Priority::Normal));
        q.enqueue(make_task("high", Priority::High));

        let drained = q.drain_ordered();
        assert_eq!(ids(&drained), ["critical", "high", "normal", "low"]);
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut q = InMemoryQueue::new();
        for id in ["a", "b", "c", "d"] {
            q.enqueue(make_task(id, Priority::Normal));
        }
        assert_eq!(ids(&q.drain_ordered()), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_merged_retries_win_priority_ties() {
        let mut q = InMemoryQueue::new();
        q.enqueue(make_task("new-normal", Priority::Normal));
        q.enqueue(make_task("new-high", Priority::High));
        q.merge_front(vec![
            make_task("retry-1", Priority::Normal),
            make_task("retry-2", Priority::Normal),
            make_task("retry-low", Priority::Low),
        ]);

        assert_eq!(
            ids(&q.drain_ordered()),
            ["new-high", "retry-1", "retry-2", "new-normal", "retry-low"]
        );
    }

    #[test]
    fn test_empty_queue() {
        let mut q = InMemoryQueue::new();
        assert!(q.dequeue().is_none());
        assert!(q.is_empty());
    }
}
