//! Error taxonomy for preview backends.
//!
//! Every variant is recoverable from the scheduler's point of view: a failed
//! attempt advances the job to the next backend in its fallback chain and is
//! never surfaced to the caller individually.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by a single backend attempt.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The external executable could not be spawned at all
    /// (missing binary, permissions). Treated like any other attempt failure.
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The external process ran but signalled failure.
    #[error("{tool} exited with code {code:?}: {stderr}")]
    Failed {
        tool: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    /// I/O around the conversion failed (e.g. writing an intermediate file).
    #[error("i/o error in {tool} for {path:?}: {source}")]
    Io {
        tool: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The attempt exceeded the configured per-attempt timeout.
    #[error("{tool} timed out")]
    TimedOut { tool: &'static str },
}
