//! dcraw backend for raw camera files.
//!
//! Two-stage conversion: `dcraw -i` confirms the file is a supported raw
//! format, then `dcraw -c` decodes to PPM on stdout which ImageMagick scales
//! to the final target. The intermediate PPM lives next to the target and is
//! removed after the resize.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::error::BackendError;

use super::exec;
use super::magick::MagickBackend;
use super::{lenient_probe, PreviewBackend};

const TOOL: &str = "dcraw";

pub struct DcrawBackend {
    executable: String,
    magick: Arc<MagickBackend>,
}

impl DcrawBackend {
    pub fn new(config: &Config, magick: Arc<MagickBackend>) -> Self {
        Self {
            executable: config.dcraw_path.clone(),
            magick,
        }
    }

    fn intermediate_path(target: &Path) -> PathBuf {
        let mut path = target.as_os_str().to_owned();
        path.push(".ppm");
        PathBuf::from(path)
    }
}

#[async_trait]
impl PreviewBackend for DcrawBackend {
    fn name(&self) -> &'static str {
        TOOL
    }

    async fn probe(&self) -> bool {
        // dcraw has no --version; run bare, it prints usage and exits 1.
        match exec::run(TOOL, &self.executable, std::iter::empty::<&str>()).await {
            Ok(out) => {
                let available = lenient_probe(&out);
                if available {
                    debug!("dcraw probe ok");
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
        // Support check: -i identifies the file without decoding it.
        let ident = exec::run(TOOL, &self.executable, ["-i".as_ref(), source.as_os_str()]).await?;
        if !ident.success() {
            return Err(ident.into_failure(TOOL));
        }

        // Decode to PPM. -c writes the image to stdout, -w uses camera white
        // balance, -h half-size for speed, -q 0 fastest interpolation.
        let decoded = exec::run(
            TOOL,
            &self.executable,
            [
                "-c".as_ref(),
                "-w".as_ref(),
                "-h".as_ref(),
                "-q".as_ref(),
                "0".as_ref(),
                source.as_os_str(),
            ],
        )
        .await?;
        if !decoded.success() {
            return Err(decoded.into_failure(TOOL));
        }

        let ppm = Self::intermediate_path(target);
        tokio::fs::write(&ppm, &decoded.stdout)
            .await
            .map_err(|source| BackendError::Io {
                tool: TOOL,
                path: ppm.clone(),
                source,
            })?;

        let result = self
            .magick
            .create_preview(&ppm, target, max_width, max_height)
            .await;

        // Scratch file; removal failure is not an attempt failure.
        let _ = tokio::fs::remove_file(&ppm).await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediate_path_appends_ppm() {
        let target = Path::new("/tmp/previews/shot.nef-00ff.jpg");
        assert_eq!(
            DcrawBackend::intermediate_path(target),
            PathBuf::from("/tmp/previews/shot.nef-00ff.jpg.ppm")
        );
    }
}
