//! exiftool wrapper for embedded metadata.
//!
//! Probed once at startup via `exiftool -ver`; the recognized-extension set
//! comes from `exiftool -listr`. Reads return the raw grouped JSON
//! (`-json -a -g0`) so callers can render arbitrary tag groups.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backends::exec::{self};
use crate::backends::Availability;
use crate::config::Config;

const TOOL: &str = "exiftool";

/// Minimal typed view over one exiftool JSON record.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataRecord {
    #[serde(rename = "SourceFile")]
    pub source_file: String,
    #[serde(flatten)]
    pub groups: serde_json::Map<String, Value>,
}

struct ExifState {
    availability: Availability,
    version: Option<String>,
    extensions: HashSet<String>,
}

/// Handle to the external exiftool binary.
pub struct ExifTool {
    executable: String,
    state: RwLock<ExifState>,
}

impl ExifTool {
    pub fn new(config: &Config) -> Self {
        Self {
            executable: config.exiftool_path.clone(),
            state: RwLock::new(ExifState {
                availability: Availability::Unknown,
                version: None,
                extensions: HashSet::new(),
            }),
        }
    }

    /// One-shot startup probe: version check, then the recognized-extension
    /// listing. A tool that cannot be invoked stays unavailable for the
    /// process lifetime.
    pub async fn probe(&self) -> bool {
        let version = match exec::run(TOOL, &self.executable, ["-ver"]).await {
            Ok(out) if out.success() => out.stdout_text(),
            _ => {
                warn!("exiftool unavailable");
                self.state.write().availability = Availability::Unavailable;
                return false;
            }
        };

        let extensions = match exec::run(TOOL, &self.executable, ["-listr"]).await {
            Ok(out) if out.success() => parse_extension_listing(&out.stdout_text()),
            _ => {
                warn!("exiftool -listr failed, no extensions recognized");
                HashSet::new()
            }
        };

        debug!(%version, extensions = extensions.len(), "exiftool probe ok");

        let mut state = self.state.write();
        state.availability = Availability::Available;
        state.version = Some(version);
        state.extensions = extensions;
        true
    }

    pub fn availability(&self) -> Availability {
        self.state.read().availability
    }

    pub fn version(&self) -> Option<String> {
        self.state.read().version.clone()
    }

    /// Whether the file's extension is in exiftool's readable set.
    pub fn is_recognized(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.state.read().extensions.contains(&ext.to_uppercase())
    }

    /// Read grouped metadata for every recognized file in `dir`.
    pub async fn read_dir_metadata(&self, dir: &Path) -> Result<Vec<MetadataRecord>> {
        self.ensure_available()?;

        let out = exec::run_in(TOOL, &self.executable, ["-json", "-a", "-g0", "."], dir)
            .await
            .context("Failed to run exiftool")?;

        // exiftool exits non-zero when some files in the directory are
        // unreadable but still emits JSON for the rest.
        if out.stdout.is_empty() {
            if !out.success() {
                bail!("exiftool failed: {}", out.stderr_text());
            }
            return Ok(Vec::new());
        }

        serde_json::from_slice(&out.stdout).context("Failed to parse exiftool JSON")
    }

    /// Read grouped metadata for a single file.
    pub async fn read_file_metadata(&self, file: &Path) -> Result<MetadataRecord> {
        self.ensure_available()?;

        let out = exec::run(
            TOOL,
            &self.executable,
            ["-json".as_ref(), "-a".as_ref(), "-g0".as_ref(), file.as_os_str()],
        )
        .await
        .context("Failed to run exiftool")?;

        if !out.success() && out.stdout.is_empty() {
            bail!("exiftool failed for {:?}: {}", file, out.stderr_text());
        }

        let mut records: Vec<MetadataRecord> =
            serde_json::from_slice(&out.stdout).context("Failed to parse exiftool JSON")?;
        records
            .pop()
            .with_context(|| format!("exiftool returned no record for {:?}", file))
    }

    /// Write one tag to the file in place.
    pub async fn write_tag(&self, file: &Path, tag: &str, value: &str) -> Result<()> {
        self.ensure_available()?;

        let assignment = format!("-{}={}", tag, value);
        let out = exec::run(
            TOOL,
            &self.executable,
            [
                "-overwrite_original".as_ref(),
                assignment.as_ref(),
                file.as_os_str(),
            ],
        )
        .await
        .context("Failed to run exiftool")?;

        if !out.success() {
            bail!(
                "exiftool failed to write {} to {:?}: {}",
                tag,
                file,
                out.stderr_text()
            );
        }
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        if self.availability() != Availability::Available {
            bail!("exiftool is not available");
        }
        Ok(())
    }
}

/// Parse `exiftool -listr` output: a heading line followed by rows of
/// whitespace-separated upper-case extensions.
fn parse_extension_listing(stdout: &str) -> HashSet<String> {
    stdout
        .lines()
        .skip(1)
        .flat_map(|line| line.split_whitespace())
        .map(|ext| ext.to_uppercase())
        .collect()
}
