//! Infrastructure adapters for task queues and cache persistence.

/// Task queue implementations.
pub mod queue;
/// Cache entry persistence backends.
pub mod store;
