//! Directory listing and embedded-metadata extraction.
//!
//! - `exiftool` - wrapper around the external exiftool binary
//! - `listing` - one-level directory listing for the browser

pub mod exiftool;
pub mod listing;

pub use exiftool::ExifTool;
pub use listing::{list_directory, EntryKind, MediaEntry};
