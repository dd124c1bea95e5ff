//! Shared types for logscope
//!
//! This crate contains data structures used across multiple logscope crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Classification Types
// ============================================================================

/// Topic that collects entries no label or keyword could place
pub const OTHER_TOPIC: &str = "Other";

/// A raw log line that carried a level marker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedLine {
    /// Line number within the source file (0-based)
    pub line_number: usize,

    /// Original raw line
    pub raw: String,

    /// Uppercased level token (e.g. `ERROR`)
    pub level: String,

    /// Line with the timestamp prefix and level marker stripped
    pub message: String,

    /// Timestamp parsed from the bracketed prefix (if available)
    pub timestamp: Option<DateTime<Utc>>,
}

impl ClassifiedLine {
    /// 1-based line number for display
    pub fn display_line_number(&self) -> usize {
        self.line_number + 1
    }
}

/// Entries of one level that share a topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicGroup {
    pub topic: String,
    /// Sorted by ascending line number
    pub entries: Vec<ClassifiedLine>,
}

impl TopicGroup {
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_other(&self) -> bool {
        self.topic == OTHER_TOPIC
    }
}

/// All surviving entries of one level, grouped by topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LevelGroup {
    pub level: String,
    /// Sorted alphabetically, `Other` last
    pub topics: Vec<TopicGroup>,
}

impl LevelGroup {
    /// Total number of entries across all topics
    pub fn entry_count(&self) -> usize {
        self.topics.iter().map(TopicGroup::count).sum()
    }

    /// Find a topic group by name
    pub fn topic(&self, name: &str) -> Option<&TopicGroup> {
        self.topics.iter().find(|t| t.topic == name)
    }

    /// All entries of this level ordered by line number (ungrouped view)
    pub fn entries(&self) -> Vec<&ClassifiedLine> {
        let mut entries: Vec<&ClassifiedLine> =
            self.topics.iter().flat_map(|t| t.entries.iter()).collect();
        entries.sort_by_key(|e| e.line_number);
        entries
    }
}

// ============================================================================
// Tailing Types
// ============================================================================

/// Point-in-time view of one tailed file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TailedFileSnapshot {
    pub path: PathBuf,
    pub display_name: String,
    /// File size last successfully read up to
    pub byte_offset: u64,
    /// Number of complete lines emitted since tailing started
    pub last_line_number: u64,
    /// Bytes held back waiting for a newline
    pub partial_len: usize,
}

/// Tail state record written to the persistence store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTail {
    pub file_path: PathBuf,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub last_line_number: u64,
}

impl From<&TailedFileSnapshot> for PersistedTail {
    /// The position is the end of the last complete line, so a pending
    /// partial line is read again on resume.
    fn from(snapshot: &TailedFileSnapshot) -> Self {
        Self {
            file_path: snapshot.path.clone(),
            position: snapshot
                .byte_offset
                .saturating_sub(snapshot.partial_len as u64),
            last_line_number: snapshot.last_line_number,
        }
    }
}

/// How persisted tail state is restored at startup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Restart from the current end of file (same as a fresh start)
    #[default]
    End,
    /// Continue at the persisted byte offset and line number
    Offset,
}

/// Poll interval presets
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PollInterval {
    Instant,
    Ms250,
    #[default]
    Ms500,
    Sec1,
    Sec2,
}

impl PollInterval {
    /// Parse a preset name; unknown names fall back to 500ms
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "instant" => Self::Instant,
            "250ms" => Self::Ms250,
            "500ms" => Self::Ms500,
            "1s" => Self::Sec1,
            "2s" => Self::Sec2,
            _ => Self::Ms500,
        }
    }

    pub fn as_duration(&self) -> Duration {
        match self {
            Self::Instant => Duration::from_millis(100),
            Self::Ms250 => Duration::from_millis(250),
            Self::Ms500 => Duration::from_millis(500),
            Self::Sec1 => Duration::from_secs(1),
            Self::Sec2 => Duration::from_secs(2),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Instant => "instant",
            Self::Ms250 => "250ms",
            Self::Ms500 => "500ms",
            Self::Sec1 => "1s",
            Self::Sec2 => "2s",
        }
    }
}

impl From<String> for PollInterval {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<PollInterval> for String {
    fn from(interval: PollInterval) -> Self {
        interval.label().to_string()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Upper bound on concurrently tailed files
pub const MAX_TAILED_FILES: usize = 5;

/// Tailing configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    pub poll_interval: PollInterval,

    /// Explicit interval in milliseconds, overrides the preset when set
    pub poll_interval_ms: Option<u64>,

    /// Concurrently tailed file cap, clamped to `1..=MAX_TAILED_FILES`
    pub max_tailed_files: usize,

    /// Files above this size need confirmation before tailing starts
    pub large_file_threshold_bytes: u64,

    /// Upper bound for a single positional read
    pub read_timeout_ms: u64,

    pub persist_across_sessions: bool,

    pub resume_mode: ResumeMode,

    /// Capacity of the tail event channel
    pub event_capacity: usize,
}

impl TailConfig {
    pub fn poll_duration(&self) -> Duration {
        match self.poll_interval_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms),
            _ => self.poll_interval.as_duration(),
        }
    }

    /// Effective tail cap
    pub fn tail_limit(&self) -> usize {
        self.max_tailed_files.clamp(1, MAX_TAILED_FILES)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval: PollInterval::default(),
            poll_interval_ms: None,
            max_tailed_files: MAX_TAILED_FILES,
            large_file_threshold_bytes: 100 * 1024 * 1024,
            read_timeout_ms: 5_000,
            persist_across_sessions: false,
            resume_mode: ResumeMode::default(),
            event_capacity: 256,
        }
    }
}

/// Content cache configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached files (0 = default)
    pub max_entries: usize,

    /// Larger files are read but never cached (0 = default)
    pub max_file_size_bytes: u64,

    /// Larger files are read in chunks (0 = default)
    pub stream_threshold_bytes: u64,

    /// Log statistics whenever they are queried
    pub log_statistics: bool,
}

impl CacheConfig {
    pub const DEFAULT_MAX_ENTRIES: usize = 50;
    pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
    pub const DEFAULT_STREAM_THRESHOLD: u64 = 50 * 1024 * 1024;

    /// Replace zero values with defaults
    pub fn normalized(mut self) -> Self {
        if self.max_entries == 0 {
            self.max_entries = Self::DEFAULT_MAX_ENTRIES;
        }
        if self.max_file_size_bytes == 0 {
            self.max_file_size_bytes = Self::DEFAULT_MAX_FILE_SIZE;
        }
        if self.stream_threshold_bytes == 0 {
            self.stream_threshold_bytes = Self::DEFAULT_STREAM_THRESHOLD;
        }
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            max_file_size_bytes: Self::DEFAULT_MAX_FILE_SIZE,
            stream_threshold_bytes: Self::DEFAULT_STREAM_THRESHOLD,
            log_statistics: false,
        }
    }
}

// ============================================================================
// Cache & Catalog Types
// ============================================================================

/// Content cache statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    pub count: usize,
    pub max_entries: usize,
    pub max_file_size_bytes: u64,
    pub approx_memory_bytes: usize,
}

/// A file found in a log directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFileInfo {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// How a report is flagged in listings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportSeverity {
    /// Title mentions an error
    Error,
    /// Report from an `api` folder
    Warning,
    Plain,
}

/// A report file with its derived title
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportInfo {
    pub path: PathBuf,
    pub title: String,
    pub severity: ReportSeverity,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, level: &str) -> ClassifiedLine {
        ClassifiedLine {
            line_number: n,
            raw: format!("raw {n}"),
            level: level.to_string(),
            message: format!("msg {n}"),
            timestamp: None,
        }
    }

    #[test]
    fn test_poll_interval_presets() {
        assert_eq!(PollInterval::parse("instant").as_duration(), Duration::from_millis(100));
        assert_eq!(PollInterval::parse("2s").as_duration(), Duration::from_secs(2));
        assert_eq!(PollInterval::parse("nonsense"), PollInterval::Ms500);
    }

    #[test]
    fn test_poll_interval_override() {
        let config = TailConfig {
            poll_interval_ms: Some(40),
            ..TailConfig::default()
        };
        assert_eq!(config.poll_duration(), Duration::from_millis(40));
        assert_eq!(TailConfig::default().poll_duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_tail_limit_is_clamped() {
        let limit = |max_tailed_files| {
            TailConfig {
                max_tailed_files,
                ..TailConfig::default()
            }
            .tail_limit()
        };
        assert_eq!(limit(0), 1);
        assert_eq!(limit(3), 3);
        assert_eq!(limit(50), MAX_TAILED_FILES);
        assert_eq!(TailConfig::default().tail_limit(), 5);
    }

    #[test]
    fn test_cache_config_normalized() {
        let config = CacheConfig {
            max_entries: 0,
            max_file_size_bytes: 0,
            stream_threshold_bytes: 7,
            log_statistics: false,
        }
        .normalized();
        assert_eq!(config.max_entries, CacheConfig::DEFAULT_MAX_ENTRIES);
        assert_eq!(config.max_file_size_bytes, CacheConfig::DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.stream_threshold_bytes, 7);
    }

    #[test]
    fn test_level_group_flattened_entries() {
        let group = LevelGroup {
            level: "ERROR".to_string(),
            topics: vec![
                TopicGroup {
                    topic: "Cache".to_string(),
                    entries: vec![line(4, "ERROR"), line(9, "ERROR")],
                },
                TopicGroup {
                    topic: OTHER_TOPIC.to_string(),
                    entries: vec![line(1, "ERROR")],
                },
            ],
        };

        assert_eq!(group.entry_count(), 3);
        let numbers: Vec<usize> = group.entries().iter().map(|e| e.line_number).collect();
        assert_eq!(numbers, vec![1, 4, 9]);
        assert!(group.topic("Other").is_some_and(TopicGroup::is_other));
    }

    #[test]
    fn test_persisted_tail_from_snapshot() {
        let snapshot = TailedFileSnapshot {
            path: PathBuf::from("/var/log/system.log"),
            display_name: "system.log".to_string(),
            byte_offset: 112,
            last_line_number: 2,
            partial_len: 0,
        };
        let record = PersistedTail::from(&snapshot);
        assert_eq!(record.position, 112);
        assert_eq!(record.last_line_number, 2);
    }

    #[test]
    fn test_persisted_position_excludes_partial_line() {
        let snapshot = TailedFileSnapshot {
            path: PathBuf::from("/var/log/system.log"),
            display_name: "system.log".to_string(),
            byte_offset: 6,
            last_line_number: 1,
            partial_len: 2,
        };
        assert_eq!(PersistedTail::from(&snapshot).position, 4);
    }
}
