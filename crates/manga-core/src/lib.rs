//! Shared primitives for the federated provider core: a unified error kind,
//! a panic-tolerant event listener system, and id/time helpers used across
//! the agent runtime, the job fabric, and federated search.

pub mod error;
pub mod events;
pub mod ids;
pub mod progress_sink;

pub use error::{CoreError, CoreResult};
pub use progress_sink::ProgressSink;
