//! One-level directory listing for the browser.
//!
//! Produces `MediaEntry` values for subdirectories and recognized media
//! files, folders first and each group sorted by name. Recognition defers
//! to exiftool's extension set when it is available and falls back to a
//! static set of common formats otherwise.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::backends::Availability;

use super::exiftool::ExifTool;

/// Fallback extension set used when exiftool is unavailable.
static FALLBACK_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "JPG", "JPEG", "PNG", "GIF", "BMP", "TIFF", "TIF", "WEBP", // common
        "NEF", "NRW", "CR2", "CRW", "ARW", "ORF", "RAF", "RW2", "DNG", // raw
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One row of the directory listing.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub name: String,
    pub kind: EntryKind,
    /// Modification time as unix seconds.
    pub mtime: i64,
    /// Size in bytes (0 for directories).
    pub size: i64,
}

impl MediaEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// List one directory level: subdirectories plus recognized media files.
pub fn list_directory(dir: &Path, exiftool: &ExifTool) -> Result<Vec<MediaEntry>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let path = entry.path().to_path_buf();
        let name = entry.file_name().to_string_lossy().into_owned();

        if entry.file_type().is_dir() {
            let mtime = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            dirs.push(MediaEntry {
                path,
                name,
                kind: EntryKind::Directory,
                mtime,
                size: 0,
            });
            continue;
        }

        if !is_recognized(&path, exiftool) {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {:?}", path))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        files.push(MediaEntry {
            path,
            name,
            kind: EntryKind::File,
            mtime,
            size: metadata.len() as i64,
        });
    }

    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));

    debug!(dirs = dirs.len(), files = files.len(), ?dir, "Listed directory");

    dirs.extend(files);
    Ok(dirs)
}

fn is_recognized(path: &Path, exiftool: &ExifTool) -> bool {
    if exiftool.availability() == Availability::Available {
        return exiftool.is_recognized(path);
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| FALLBACK_EXTENSIONS.contains(ext.to_uppercase().as_str()))
        .unwrap_or(false)
}
