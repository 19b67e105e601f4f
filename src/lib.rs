// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod content;
pub mod dedup;
pub mod enrich;
pub mod fleet;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::fleet::{FleetReport, FleetRunner};
pub use crate::pipeline::{SourceOrchestrator, SourceRunResult};
pub use crate::scheduler::{RequestScheduler, SchedulerConfig, SchedulerError};
