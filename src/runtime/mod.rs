//! Engine facade and the optional tokio actor around it.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod actor;

pub use api::{Engine, EngineStatus, TickReport};
#[cfg(feature = "tokio-runtime")]
pub use actor::{EngineActor, EngineHandle};
