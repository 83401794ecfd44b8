//! Converter backends for preview generation.
//!
//! Each backend wraps one external tool behind the `PreviewBackend` trait:
//! a one-shot startup availability probe plus a preview-creation call whose
//! success is decided by a per-backend predicate over the captured process
//! output. `BackendSet` owns the backends in fixed priority order and builds
//! the fallback chain a job walks through.

pub mod dcraw;
pub mod exec;
pub mod magick;
pub mod ufraw;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::BackendError;
use exec::ExecOutput;

/// Availability of a backend's external executable.
///
/// `Unknown` until the startup probe resolves; treated as unavailable by the
/// chain builder so an unprobed backend never blocks job admission.
/// Determined once per process and stable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Unknown,
    Available,
    Unavailable,
}

/// An external converter capability.
#[async_trait]
pub trait PreviewBackend: Send + Sync {
    /// Short tool name for logging.
    fn name(&self) -> &'static str;

    /// One-shot startup check (a version/identify invocation of the wrapped
    /// executable). A spawn failure means the tool is permanently
    /// unavailable for this process.
    async fn probe(&self) -> bool;

    /// Invoke the external converter to produce a preview at `target`
    /// bounded by `max_width` x `max_height`.
    async fn create_preview(
        &self,
        source: &Path,
        target: &Path,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), BackendError>;
}

/// Probe predicate shared by ufraw-batch and dcraw: both print their
/// version/usage to stdout and exit 1, which counts as present. Kept as a
/// per-tool quirk, not a general rule; conversions still require exit 0.
pub(crate) fn lenient_probe(out: &ExecOutput) -> bool {
    out.success() || (out.code() == Some(1) && !out.stdout.is_empty() && out.stderr.is_empty())
}

struct Entry {
    backend: Arc<dyn PreviewBackend>,
    availability: RwLock<Availability>,
}

/// The set of converter backends in fixed priority order
/// (specialized raw converters before the generic converter).
pub struct BackendSet {
    entries: Vec<Entry>,
}

impl BackendSet {
    /// Build a set from backends in priority order, all initially `Unknown`.
    pub fn new(backends: Vec<Arc<dyn PreviewBackend>>) -> Self {
        let entries = backends
            .into_iter()
            .map(|backend| Entry {
                backend,
                availability: RwLock::new(Availability::Unknown),
            })
            .collect();
        Self { entries }
    }

    /// The standard chain: ufraw-batch, dcraw, ImageMagick.
    pub fn standard(config: &Config) -> Self {
        let magick = Arc::new(magick::MagickBackend::new(config));
        Self::new(vec![
            Arc::new(ufraw::UfrawBackend::new(config)),
            Arc::new(dcraw::DcrawBackend::new(config, Arc::clone(&magick))),
            magick,
        ])
    }

    /// Run the startup probe for every backend and record the result.
    pub async fn probe_all(&self) {
        for entry in &self.entries {
            let available = entry.backend.probe().await;
            let state = if available {
                Availability::Available
            } else {
                Availability::Unavailable
            };
            *entry.availability.write() = state;

            if available {
                info!(backend = entry.backend.name(), "Backend available");
            } else {
                warn!(backend = entry.backend.name(), "Backend unavailable");
            }
        }
    }

    /// Availability of a named backend.
    pub fn availability(&self, name: &str) -> Availability {
        self.entries
            .iter()
            .find(|e| e.backend.name() == name)
            .map(|e| *e.availability.read())
            .unwrap_or(Availability::Unknown)
    }

    /// Build the fallback chain: currently-available backends in priority
    /// order. Evaluated once when a job is admitted, never mid-chain.
    pub fn fallback_chain(&self) -> Vec<Arc<dyn PreviewBackend>> {
        let chain: Vec<_> = self
            .entries
            .iter()
            .filter(|e| *e.availability.read() == Availability::Available)
            .map(|e| Arc::clone(&e.backend))
            .collect();

        debug!(len = chain.len(), "Built fallback chain");
        chain
    }

    #[cfg(test)]
    pub(crate) fn mark_available(&self, name: &str) {
        for entry in &self.entries {
            if entry.backend.name() == name {
                *entry.availability.write() = Availability::Available;
            }
        }
    }
}
