use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

/// Compiled form of a regex search term
#[derive(Clone)]
enum Matcher {
    Regex(Regex),
    /// Pattern failed to compile, match the raw term literally
    Literal,
}

/// Search term matcher used to prune entry trees
#[derive(Clone, Default)]
pub struct SearchFilter {
    /// Original term
    term: String,

    /// Lowercased term for case-insensitive substring search
    term_lower: String,

    /// Case sensitivity
    case_sensitive: bool,

    /// Treat the term as a regular expression
    use_regex: bool,

    /// Built on first regex match, dropped whenever term or flags change
    compiled: OnceLock<Matcher>,
}

impl SearchFilter {
    /// Create a filter for the given term and flags
    pub fn new(term: &str, case_sensitive: bool, use_regex: bool) -> Self {
        Self {
            term: term.to_string(),
            term_lower: term.to_lowercase(),
            case_sensitive,
            use_regex,
            compiled: OnceLock::new(),
        }
    }

    /// Replace term and flags. Returns false (and keeps the compiled pattern) when nothing changed.
    pub fn set(&mut self, term: &str, case_sensitive: bool, use_regex: bool) -> bool {
        if self.term == term
            && self.case_sensitive == case_sensitive
            && self.use_regex == use_regex
        {
            return false;
        }
        *self = Self::new(term, case_sensitive, use_regex);
        true
    }

    /// Drop the search term, keeping the flags
    pub fn clear(&mut self) {
        let (case_sensitive, use_regex) = (self.case_sensitive, self.use_regex);
        self.set("", case_sensitive, use_regex);
    }

    /// Check if a text matches the current term. Never fails.
    pub fn matches(&self, text: &str) -> bool {
        if self.term.is_empty() {
            return true;
        }

        if self.use_regex {
            return match self.matcher() {
                Matcher::Regex(re) => re.is_match(text),
                Matcher::Literal => text.contains(&self.term),
            };
        }

        if self.case_sensitive {
            text.contains(&self.term)
        } else {
            text.to_lowercase().contains(&self.term_lower)
        }
    }

    fn matcher(&self) -> &Matcher {
        self.compiled.get_or_init(|| {
            match RegexBuilder::new(&self.term)
                .case_insensitive(!self.case_sensitive)
                .build()
            {
                Ok(re) => Matcher::Regex(re),
                Err(e) => {
                    tracing::warn!(
                        pattern = %self.term,
                        error = %e,
                        "Invalid search pattern, falling back to literal match"
                    );
                    Matcher::Literal
                }
            }
        })
    }

    /// Get the original term
    pub fn term(&self) -> &str {
        &self.term
    }

    /// Check if filter is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.term.is_empty()
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn uses_regex(&self) -> bool {
        self.use_regex
    }

    /// Whether the regex has been built for the current term
    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    /// Whether the current term fell back to literal matching
    pub fn is_invalid_pattern(&self) -> bool {
        self.use_regex && matches!(self.matcher(), Matcher::Literal)
    }
}

impl std::fmt::Debug for SearchFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchFilter")
            .field("term", &self.term)
            .field("case_sensitive", &self.case_sensitive)
            .field("use_regex", &self.use_regex)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}
