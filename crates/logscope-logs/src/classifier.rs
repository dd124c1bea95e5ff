use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

use logscope_types::ClassifiedLine;

/// Level marker: a word preceded by `.` and followed by `:` (e.g. `.ERROR:`)
static LEVEL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(\w+):").expect("level marker regex must compile"));

/// Level and message extracted from a raw line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub level: String,
    pub message: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Classifier for `[timestamp] channel.LEVEL: message` style lines
pub struct LineClassifier;

impl LineClassifier {
    /// Classify a raw line, `None` if it carries no level marker
    pub fn classify(raw: &str) -> Option<Classification> {
        let (timestamp, rest) = Self::split_bracket_prefix(raw);

        let captures = LEVEL_MARKER.captures(rest)?;
        let marker = captures.get(0)?;
        let level = captures.get(1)?.as_str().to_uppercase();
        let message = rest[marker.end()..].trim().to_string();

        Some(Classification {
            level,
            message,
            timestamp,
        })
    }

    /// Classify a line and attach its position in the source file
    pub fn classify_line(line_number: usize, raw: &str) -> Option<ClassifiedLine> {
        let classification = Self::classify(raw)?;
        Some(ClassifiedLine {
            line_number,
            raw: raw.to_string(),
            level: classification.level,
            message: classification.message,
            timestamp: classification.timestamp,
        })
    }

    /// Split off a leading `[...]` prefix, parsing it as an RFC 3339 timestamp when possible
    fn split_bracket_prefix(raw: &str) -> (Option<DateTime<Utc>>, &str) {
        let trimmed = raw.trim_start();
        let Some(inner) = trimmed.strip_prefix('[') else {
            return (None, raw);
        };
        let Some(close) = inner.find(']') else {
            return (None, raw);
        };

        let timestamp = DateTime::parse_from_rfc3339(inner[..close].trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc));
        (timestamp, inner[close + 1..].trim_start())
    }
}
