//! Plain-text rendering of entry trees, tailed lines, file listings and reports

use chrono::Local;
use std::fmt::Write;
use std::path::Path;

use logscope_types::{ClassifiedLine, LevelGroup, LogFileInfo, ReportInfo, ReportSeverity};

/// Level → topic → entry outline
pub fn render_tree(tree: &[LevelGroup]) -> String {
    let mut out = String::new();
    for level in tree {
        let _ = writeln!(out, "{} ({})", level.level, level.entry_count());
        for topic in &level.topics {
            let _ = writeln!(out, "  {} ({})", topic.topic, topic.count());
            for entry in &topic.entries {
                let _ = writeln!(out, "    {}", render_entry(entry));
            }
        }
    }
    out
}

/// Entries of each level in file order, without topic grouping
pub fn render_flat(tree: &[LevelGroup]) -> String {
    let mut out = String::new();
    for level in tree {
        let _ = writeln!(out, "{} ({})", level.level, level.entry_count());
        for entry in level.entries() {
            let _ = writeln!(out, "  {}", render_entry(entry));
        }
    }
    out
}

fn render_entry(entry: &ClassifiedLine) -> String {
    match entry.timestamp {
        Some(ts) => format!(
            "{:>6}  {}  {}",
            entry.display_line_number(),
            ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            entry.message
        ),
        None => format!("{:>6}  {}", entry.display_line_number(), entry.message),
    }
}

/// One tailed line, prefixed with the file name when several files are tailed
pub fn render_tailed_line(path: &Path, line_number: u64, line: &str, prefix: bool) -> String {
    if prefix {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{name}:{line_number}: {line}")
    } else {
        format!("{line_number}: {line}")
    }
}

/// Directory listing with sizes, line counts and modification times
pub fn render_file_list(files: &[(LogFileInfo, usize)]) -> String {
    let mut out = String::new();
    for (file, lines) in files {
        let modified = file
            .modified
            .map(|m| m.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>10}  {:>9} lines  {}  {}",
            format_size(file.size_bytes),
            lines,
            modified,
            file.name
        );
    }
    out
}

/// Report listing, paths shown relative to `base`
pub fn render_report_list(reports: &[ReportInfo], base: &Path) -> String {
    let mut out = String::new();
    for report in reports {
        let marker = match report.severity {
            ReportSeverity::Error => "ERROR",
            ReportSeverity::Warning => "WARN",
            ReportSeverity::Plain => "-",
        };
        let path = report.path.strip_prefix(base).unwrap_or(&report.path);
        let _ = writeln!(out, "{marker:<6} {}  {}", path.display(), report.title);
    }
    out
}

/// Human-readable byte size
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
