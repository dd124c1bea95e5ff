use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use logscope_types::{ClassifiedLine, LevelGroup, OTHER_TOPIC, TopicGroup};

use crate::classifier::LineClassifier;
use crate::filter::SearchFilter;

/// Leading label ending in a colon, e.g. `Broken reference: ...`
static TOPIC_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^:]+):").expect("topic label regex must compile"));

/// Keyword fallbacks, checked in order. The first match wins, so reordering
/// changes how existing logs are grouped.
static TOPIC_KEYWORDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\b(database|sql|mysql|pdo|deadlock)", "Database"),
        (r"\b(cache|redis|varnish|full_page)", "Cache"),
        (r"\b(payment|paypal|braintree|stripe|invoice)", "Payment"),
        (r"\b(order|checkout|cart|quote|shipping)", "Order"),
        (r"\b(customer|newsletter)", "Customer"),
        (r"\b(product|catalog|category|inventory|stock)", "Catalog"),
        (r"\b(e-?mail|smtp|mail)", "Email"),
        (r"\b(cron|queue|consumer|schedule)", "Cron"),
        (r"\b(index|reindex|indexer|elasticsearch|opensearch)", "Indexer"),
        (r"\b(api|rest|graphql|soap|webapi)", "API"),
        (r"\b(layout|template|block|theme|widget)", "Layout"),
        (r"\b(security|auth|csrf|permission|token|login)", "Security"),
    ]
    .into_iter()
    .map(|(pattern, topic)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("topic keyword regex must compile");
        (re, topic)
    })
    .collect()
});

/// Determine the topic of a classified message
pub fn topic_for(message: &str) -> String {
    if let Some(label) = leading_label(message) {
        return label.to_string();
    }

    TOPIC_KEYWORDS
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, topic)| (*topic).to_string())
        .unwrap_or_else(|| OTHER_TOPIC.to_string())
}

/// Text before the first colon, unless that colon starts a URL scheme (`https://`)
fn leading_label(message: &str) -> Option<&str> {
    let captures = TOPIC_LABEL.captures(message)?;
    let whole = captures.get(0)?;
    if message[whole.end()..].starts_with("//") {
        return None;
    }
    Some(captures.get(1)?.as_str().trim()).filter(|label| !label.is_empty())
}

/// Builds level → topic → entry hierarchies from raw file lines
pub struct EntryTreeBuilder;

impl EntryTreeBuilder {
    /// Group raw lines (0-indexed) into level groups, keeping lines whose raw text
    /// or message matches the filter. Empty groups are never produced.
    pub fn build<'a, I>(lines: I, filter: &SearchFilter) -> Vec<LevelGroup>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut by_level: BTreeMap<String, BTreeMap<String, Vec<ClassifiedLine>>> =
            BTreeMap::new();

        for (line_number, raw) in lines.into_iter().enumerate() {
            let Some(entry) = LineClassifier::classify_line(line_number, raw) else {
                continue;
            };
            if !filter.matches(&entry.raw) && !filter.matches(&entry.message) {
                continue;
            }

            let topic = topic_for(&entry.message);
            by_level
                .entry(entry.level.clone())
                .or_default()
                .entry(topic)
                .or_default()
                .push(entry);
        }

        by_level
            .into_iter()
            .map(|(level, topics)| {
                let mut topics: Vec<TopicGroup> = topics
                    .into_iter()
                    .map(|(topic, mut entries)| {
                        entries.sort_by_key(|e| e.line_number);
                        TopicGroup { topic, entries }
                    })
                    .collect();
                topics.sort_by(compare_topics);
                LevelGroup { level, topics }
            })
            .collect()
    }

    /// Split file content on newlines and build the tree
    pub fn build_from_content(content: &str, filter: &SearchFilter) -> Vec<LevelGroup> {
        Self::build(content.split('\n'), filter)
    }
}

/// Alphabetical, with the `Other` topic always last
fn compare_topics(a: &TopicGroup, b: &TopicGroup) -> Ordering {
    match (a.is_other(), b.is_other()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a
            .topic
            .to_lowercase()
            .cmp(&b.topic.to_lowercase())
            .then_with(|| a.topic.cmp(&b.topic)),
    }
}
