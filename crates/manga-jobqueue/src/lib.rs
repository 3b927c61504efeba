//! Priority job queue and typed workers driving agent download, health
//! check, and organization operations (spec §4.8-4.9, components C8-C9).
//!
//! Grounded on `jobs/queue_manager.py` and `jobs/workers.py`.

mod events;
mod job;
mod queue;
mod wire;
mod worker;

pub use events::{JobEvent, JobEventKind};
pub use job::{BulkItem, HealthCheckResults, Job, JobPayload, JobPriority, JobStatus, JobType};
pub use queue::{JobQueue, JobQueueConfig, QueueStats};
pub use wire::{BulkItemPayload, HealthCheckResultsPayload, JobPayloadSnapshot, JobPayloadWire};
