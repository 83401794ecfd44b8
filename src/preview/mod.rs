//! Preview generation pipeline.
//!
//! - `job` - request/outcome types and the job handle
//! - `scheduler` - bounded-concurrency admission control over the
//!   backend fallback chain

pub mod job;
pub mod scheduler;

pub use job::{JobHandle, PreviewOutcome, PreviewRequest, PreviewResult};
pub use scheduler::PreviewScheduler;
