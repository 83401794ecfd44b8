//! Runtime configuration.
//!
//! Scratch directory for generated previews, scheduler capacity, and
//! executable paths for the external tools. Executable paths can be
//! overridden through the environment so packaged installs can point at
//! non-PATH locations.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Runtime configuration shared by the scanner and the preview scheduler.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory where generated previews (and converter scratch files) live.
    pub scratch_dir: PathBuf,
    /// Maximum number of concurrently running preview jobs.
    pub capacity: usize,
    /// Optional bound on a single backend attempt. `None` matches the
    /// classic behavior where a hung converter holds its slot.
    pub attempt_timeout: Option<Duration>,
    /// Executable paths for the external tools.
    pub ufraw_path: String,
    pub dcraw_path: String,
    pub convert_path: String,
    pub identify_path: String,
    pub exiftool_path: String,
}

impl Config {
    /// Build a configuration from XDG directories and the environment.
    pub fn load() -> Result<Self> {
        let scratch_dir = Self::default_scratch_dir()?;
        std::fs::create_dir_all(&scratch_dir)
            .with_context(|| format!("Failed to create scratch directory: {:?}", scratch_dir))?;

        let capacity = std::env::var("RAVIEW_JOBS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or_else(default_capacity);

        Ok(Self {
            scratch_dir,
            capacity,
            attempt_timeout: None,
            ufraw_path: env_or("RAVIEW_UFRAW", "ufraw-batch"),
            dcraw_path: env_or("RAVIEW_DCRAW", "dcraw"),
            convert_path: env_or("RAVIEW_MAGICK_CONVERT", "convert"),
            identify_path: env_or("RAVIEW_MAGICK_IDENTIFY", "identify"),
            exiftool_path: env_or("RAVIEW_EXIFTOOL", "exiftool"),
        })
    }

    /// Default scratch directory under the XDG cache dir.
    pub fn default_scratch_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "", "raview")
            .context("Failed to determine project directories")?;
        Ok(proj_dirs.cache_dir().join("previews"))
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity_nonzero() {
        assert!(default_capacity() >= 1);
    }

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("RAVIEW_TEST_UNSET_VAR", "fallback"), "fallback");
    }
}
