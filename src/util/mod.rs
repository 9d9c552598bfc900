//! Shared utilities: time, common value types and tracing setup.

pub mod clock;
pub mod serde;
pub mod telemetry;

pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use serde::{Priority, ResourceKind, TaskId, ThresholdDomain};
pub use telemetry::{init_tracing, init_tracing_with};
