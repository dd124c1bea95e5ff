use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::Path;

use logscope_types::LogFileInfo;

/// List the regular files directly inside `dir`, sorted by name.
///
/// A missing directory yields an empty list. Entries that vanish or cannot be
/// stat'ed while listing are skipped.
pub fn list_log_files(dir: &Path) -> io::Result<Vec<LogFileInfo>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        files.push(LogFileInfo {
            path: entry.path(),
            name: entry.file_name().to_string_lossy().into_owned(),
            size_bytes: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}
