//! Job model for preview generation.

use std::path::PathBuf;

/// Opaque handle identifying one submitted preview job.
///
/// Submitting the same file twice yields two distinct handles and two
/// independent completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(pub(crate) u64);

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A request to generate a preview for one file.
#[derive(Debug, Clone)]
pub struct PreviewRequest {
    /// Path to the source image.
    pub source: PathBuf,
    /// Maximum preview width.
    pub max_width: u32,
    /// Maximum preview height.
    pub max_height: u32,
    /// Where the outcome is delivered. Sending to a dropped receiver is
    /// silently ignored; stale results are the sink's problem.
    pub sink: flume::Sender<PreviewOutcome>,
}

/// Terminal result of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewResult {
    /// A backend produced a preview at this path.
    Ready(PathBuf),
    /// Every available backend failed, or none were available.
    Unavailable,
}

/// Completion notification delivered to the sink.
#[derive(Debug, Clone)]
pub struct PreviewOutcome {
    pub job: JobHandle,
    pub source: PathBuf,
    pub result: PreviewResult,
}
