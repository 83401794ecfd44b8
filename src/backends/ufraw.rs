//! ufraw-batch backend for raw camera files.
//!
//! Preferred backend: ufraw-batch decodes raw files and scales to the target
//! box in one invocation. If a `<source>.ufraw` sidecar with saved develop
//! settings exists, it is converted instead of the bare source file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::error::BackendError;

use super::exec;
use super::{lenient_probe, PreviewBackend};

const TOOL: &str = "ufraw-batch";

pub struct UfrawBackend {
    executable: String,
}

impl UfrawBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            executable: config.ufraw_path.clone(),
        }
    }

    /// Prefer the `.ufraw` sidecar when the user saved develop settings.
    async fn effective_source(source: &Path) -> PathBuf {
        let mut sidecar = source.as_os_str().to_owned();
        sidecar.push(".ufraw");
        let sidecar = PathBuf::from(sidecar);

        match tokio::fs::try_exists(&sidecar).await {
            Ok(true) => sidecar,
            _ => source.to_path_buf(),
        }
    }
}

#[async_trait]
impl PreviewBackend for UfrawBackend {
    fn name(&self) -> &'static str {
        TOOL
    }

    async fn probe(&self) -> bool {
        match exec::run(TOOL, &self.executable, ["--version"]).await {
            Ok(out) => {
                let available = lenient_probe(&out);
                if available {
                    debug!(version = %out.stdout_text(), "ufraw-batch probe ok");
                }
                available
            }
            Err(_) => false,
        }
    }

    async fn create_preview(
        &self,
        source: &Path,
        target: &Path,
        max_width: u32,
        max_height: u32,
    ) -> Result<(), BackendError> {
        let source = Self::effective_source(source).await;

        let out = exec::run(
            TOOL,
            &self.executable,
            [
                format!("--size={}x{}", max_width, max_height),
                "--out-type=jpeg".to_string(),
                "--noexif".to_string(),
                "--compression=75".to_string(),
                format!("--output={}", target.display()),
                "--overwrite".to_string(),
                source.display().to_string(),
            ],
        )
        .await?;

        if out.success() {
            Ok(())
        } else {
            Err(out.into_failure(TOOL))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_sidecar_preferred_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("shot.nef");
        std::fs::File::create(&raw).unwrap();

        // No sidecar: the raw file itself.
        assert_eq!(UfrawBackend::effective_source(&raw).await, raw);

        // Sidecar present: it wins.
        let sidecar = dir.path().join("shot.nef.ufraw");
        let mut f = std::fs::File::create(&sidecar).unwrap();
        f.write_all(b"<ufraw/>").unwrap();
        assert_eq!(UfrawBackend::effective_source(&raw).await, sidecar);
    }
}
