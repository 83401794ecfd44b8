//! ImageMagick backend.
//!
//! The generic converter and last link of the fallback chain. Also used by
//! the dcraw backend to scale the decoded PPM down to the target box.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::config::Config;
use crate::error::BackendError;

use super::exec;
use super::PreviewBackend;

const TOOL: &str = "imagemagick";

pub struct MagickBackend {
    convert: String,
    identify: String,
}

impl MagickBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            convert: config.convert_path.clone(),
            identify: config.identify_path.clone(),
        }
    }

}

#[async_trait]
impl PreviewBackend for MagickBackend {
    fn name(&self) -> &'static str {
        TOOL
    }

    async fn probe(&self) -> bool {
        match exec::run(TOOL, &self.identify, ["-version"]).await {
            Ok(out) => {
                let available = out.success();
                if available {
                    debug!(version = %out.stdout_text(), "imagemagick probe ok");
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
        // `>` keeps convert from upscaling images already inside the box.
        let out = exec::run(
            TOOL,
            &self.convert,
            [
                source.display().to_string(),
                "-quality".to_string(),
                "75%".to_string(),
                "-auto-orient".to_string(),
                "-thumbnail".to_string(),
                format!("{}x{}>", max_width, max_height),
                target.display().to_string(),
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
