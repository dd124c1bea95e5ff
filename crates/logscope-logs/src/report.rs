//! Error report files
//!
//! Reports are JSON documents written next to the logs, usually an object
//! whose `"0"` key holds the error title, `"1"` the message and the following
//! numeric keys a stack trace. Reports under an `api` folder may be a bare
//! JSON string. Every field is optional; values of the wrong type read as
//! absent.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use logscope_types::{ReportInfo, ReportSeverity};

use crate::cache::ContentCache;

/// Object-shaped report
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ReportRecord {
    #[serde(rename = "0", default, deserialize_with = "string_or_none")]
    pub title: Option<String>,

    #[serde(rename = "1", default, deserialize_with = "string_or_none")]
    pub message: Option<String>,

    #[serde(default, deserialize_with = "string_or_none")]
    pub url: Option<String>,

    #[serde(default, deserialize_with = "string_or_none")]
    pub script_name: Option<String>,

    #[serde(default, deserialize_with = "string_or_none")]
    pub report_id: Option<String>,

    /// Remaining keys, including the trace lines
    #[serde(flatten)]
    rest: BTreeMap<String, Value>,
}

impl ReportRecord {
    /// Stack trace lines (numeric keys from 2 up), in order
    pub fn trace(&self) -> Vec<&str> {
        let mut lines: Vec<(u64, &str)> = self
            .rest
            .iter()
            .filter_map(|(key, value)| Some((key.parse().ok()?, value.as_str()?)))
            .collect();
        lines.sort_by_key(|(index, _)| *index);
        lines.into_iter().map(|(_, line)| line).collect()
    }

    fn non_empty_title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// A decoded report
#[derive(Clone, Debug, PartialEq)]
pub enum Report {
    Record(ReportRecord),
    /// Any other JSON value, e.g. a bare string
    Value(Value),
}

impl Report {
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        match serde_json::from_str::<Value>(content)? {
            value @ Value::Object(_) => serde_json::from_value(value).map(Report::Record),
            other => Ok(Report::Value(other)),
        }
    }

    pub fn record(&self) -> Option<&ReportRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Value(_) => None,
        }
    }

    /// One-line text of the whole report
    fn summary(&self) -> String {
        match self {
            Self::Record(record) => record
                .non_empty_title()
                .or(record.message.as_deref())
                .unwrap_or("report")
                .to_string(),
            Self::Value(Value::String(s)) => s.clone(),
            Self::Value(other) => other.to_string(),
        }
    }
}

/// Parsed reports keyed by path, validated by file mtime
pub struct ReportReader {
    cache: Arc<ContentCache>,
    parsed: Mutex<HashMap<PathBuf, (Arc<Report>, SystemTime)>>,
}

impl ReportReader {
    /// Reader that loads report text through `cache`
    pub fn new(cache: Arc<ContentCache>) -> Self {
        Self {
            cache,
            parsed: Mutex::new(HashMap::new()),
        }
    }

    /// Decode a report, `None` if it is unreadable or not JSON
    pub fn read(&self, path: &Path) -> Option<Arc<Report>> {
        let mtime = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        if let Some((report, at)) = self.parsed.lock().get(path) {
            if *at >= mtime {
                return Some(Arc::clone(report));
            }
        }

        let content = self.cache.get(path)?;
        let report = match Report::parse(&content) {
            Ok(report) => Arc::new(report),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Report is not valid JSON");
                return None;
            }
        };

        self.parsed
            .lock()
            .insert(path.to_path_buf(), (Arc::clone(&report), mtime));
        Some(report)
    }

    /// Display title. Reports under an `api` folder are prefixed with the
    /// capitalised folder name; unreadable reports use the file name.
    pub fn title(&self, path: &Path) -> String {
        let Some(report) = self.read(path) else {
            return file_name(path);
        };

        if is_api_report(path) {
            let folder = path
                .parent()
                .and_then(Path::file_name)
                .map(|n| capitalize(&n.to_string_lossy()))
                .unwrap_or_default();
            return format!("{folder}: {}", report.summary());
        }

        report
            .record()
            .and_then(ReportRecord::non_empty_title)
            .map(str::to_string)
            .unwrap_or_else(|| file_name(path))
    }

    pub fn severity(&self, path: &Path) -> ReportSeverity {
        let Some(report) = self.read(path) else {
            return ReportSeverity::Plain;
        };
        if is_api_report(path) {
            return ReportSeverity::Warning;
        }

        let is_error = report
            .record()
            .and_then(|r| r.title.as_deref())
            .is_some_and(|t| t.to_lowercase().contains("error"));
        if is_error {
            ReportSeverity::Error
        } else {
            ReportSeverity::Plain
        }
    }

    pub fn describe(&self, path: &Path) -> ReportInfo {
        ReportInfo {
            path: path.to_path_buf(),
            title: self.title(path),
            severity: self.severity(path),
        }
    }

    /// Every report file below `dir`, depth first in name order.
    /// A missing directory yields an empty list.
    pub fn list_reports(&self, dir: &Path) -> Vec<ReportInfo> {
        let mut reports = Vec::new();
        self.collect(dir, &mut reports);
        reports
    }

    fn collect(&self, dir: &Path, reports: &mut Vec<ReportInfo>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "Cannot read report directory");
                return;
            }
        };

        let mut entries: Vec<fs::DirEntry> = entries.filter_map(Result::ok).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_dir() {
                self.collect(&path, reports);
            } else if file_type.is_file() {
                reports.push(self.describe(&path));
            }
        }
    }

    /// Drop the parsed report and its cached text
    pub fn invalidate(&self, path: &Path) -> bool {
        let parsed = self.parsed.lock().remove(path).is_some();
        let content = self.cache.invalidate(path);
        parsed || content
    }
}

fn is_api_report(path: &Path) -> bool {
    path.parent()
        .is_some_and(|dir| dir.components().any(|c| c == Component::Normal("api".as_ref())))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logscope_types::CacheConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    const REPORT: &str = r##"{
  "0": "Error",
  "1": "Exception: Broken reference: the 'amcompany_toolbar_link' element cannot be added as child to 'header.links'",
  "2": "#1 Magento\\Framework\\View\\Layout\\Generator\\Structure->scheduleStructure() called at GeneratorPool.php:105",
  "3": "#2 Magento\\Framework\\View\\Layout\\GeneratorPool->process() called at Layout.php:352",
  "url": "/customer/account/login/",
  "script_name": "/index.php",
  "report_id": "12345abcde"
}"##;

    fn reader() -> ReportReader {
        ReportReader::new(Arc::new(ContentCache::new(CacheConfig::default())))
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_record() {
        let report = Report::parse(REPORT).unwrap();
        let record = report.record().unwrap();
        assert_eq!(record.title.as_deref(), Some("Error"));
        assert!(record.message.as_deref().unwrap().starts_with("Exception: Broken reference"));
        assert_eq!(record.url.as_deref(), Some("/customer/account/login/"));
        assert_eq!(record.report_id.as_deref(), Some("12345abcde"));
        let trace = record.trace();
        assert_eq!(trace.len(), 2);
        assert!(trace[0].starts_with("#1 "));
    }

    #[test]
    fn test_wrong_types_read_as_absent() {
        let report = Report::parse(r#"{"0": 42, "url": null, "1": "message"}"#).unwrap();
        let record = report.record().unwrap();
        assert_eq!(record.title, None);
        assert_eq!(record.url, None);
        assert_eq!(record.message.as_deref(), Some("message"));
    }

    #[test]
    fn test_title_and_severity() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "1234567", REPORT);
        let reader = reader();
        assert_eq!(reader.title(&path), "Error");
        assert_eq!(reader.severity(&path), ReportSeverity::Error);
    }

    #[test]
    fn test_title_falls_back_to_file_name() {
        let dir = TempDir::new().unwrap();
        let reader = reader();

        let no_title = write(dir.path(), "no_title", r#"{"0": "", "1": "x"}"#);
        assert_eq!(reader.title(&no_title), "no_title");
        assert_eq!(reader.severity(&no_title), ReportSeverity::Plain);

        let broken = write(dir.path(), "broken", "{not json");
        assert_eq!(reader.title(&broken), "broken");
        assert_eq!(reader.severity(&broken), ReportSeverity::Plain);

        assert_eq!(reader.title(&dir.path().join("missing")), "missing");
    }

    #[test]
    fn test_api_report_title() {
        let dir = TempDir::new().unwrap();
        let reader = reader();
        let path = write(dir.path(), "api/webhook/98765", r#""Invalid signature""#);
        assert_eq!(reader.title(&path), "Webhook: Invalid signature");
        assert_eq!(reader.severity(&path), ReportSeverity::Warning);

        let direct = write(dir.path(), "api/55", REPORT);
        assert_eq!(reader.title(&direct), "Api: Error");
    }

    #[test]
    fn test_list_reports_recursively() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b_report", r#"{"0": "Notice"}"#);
        write(dir.path(), "a_report", REPORT);
        write(dir.path(), "api/rest/1", r#""timeout""#);

        let reports = reader().list_reports(dir.path());
        let titles: Vec<&str> = reports.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Error", "Rest: timeout", "Notice"]);
        assert!(reader().list_reports(&dir.path().join("none")).is_empty());
    }

    #[test]
    fn test_parsed_report_refreshed_on_change_and_invalidate() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "1", r#"{"0": "First"}"#);
        let reader = reader();
        assert_eq!(reader.title(&path), "First");

        fs::write(&path, r#"{"0": "Second"}"#).unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();
        assert_eq!(reader.title(&path), "Second");

        assert!(reader.invalidate(&path));
        assert!(!reader.invalidate(&path));
        assert_eq!(reader.title(&path), "Second");
    }
}
