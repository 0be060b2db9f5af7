//! Small helpers shared by the workflow and the CLI.

use std::path::Path;

use walkdir::WalkDir;

use crate::app_data::publisher_data;

/// Format bytes as human-readable size.
///
/// Switches unit once the smaller one would reach four digits, so 1000 KB
/// is shown as "0.98 MB" rather than "1000.00 KB".
pub fn format_bytes(bytes: u64) -> String {
    let kb = bytes as f64 / 1024.0;
    let mb = kb / 1024.0;
    let gb = mb / 1024.0;

    if mb >= 1000.0 {
        format!("{:.2} GB", gb)
    } else if kb >= 1000.0 {
        format!("{:.2} MB", mb)
    } else if kb >= 1.0 {
        format!("{:.2} KB", kb)
    } else {
        format!("{} B", bytes)
    }
}

/// Total size in bytes of every file beneath `dir`
pub fn folder_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Title used for the upload; blank titles fall back to the default name.
pub fn filtered_title(title: &str) -> &str {
    if title.trim().is_empty() {
        &publisher_data().build.default_title
    } else {
        title
    }
}
