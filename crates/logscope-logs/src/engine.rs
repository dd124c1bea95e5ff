//! Context object tying the cache, search state and tailer together
//!
//! A `LogEngine` is owned by whoever drives the process (the CLI, a UI layer)
//! and handed to the components that need it. Nothing here is global.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use parking_lot::RwLock;

use logscope_types::{CacheConfig, CacheStatistics, LevelGroup, ReportInfo, TailConfig};

use crate::cache::ContentCache;
use crate::error::TailError;
use crate::filter::SearchFilter;
use crate::report::ReportReader;
use crate::store::TailStateStore;
use crate::tail::{StartOutcome, TailEvent, TailingCoordinator};
use crate::tree::EntryTreeBuilder;

/// Point-in-time engine status
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineStatus {
    pub tailed: Vec<PathBuf>,
    pub polling: bool,
    pub cache: CacheStatistics,
    pub search_term: String,
}

impl EngineStatus {
    /// Short human-readable summary
    pub fn summary(&self) -> String {
        let tailing = match self.tailed.len() {
            0 => "not tailing".to_string(),
            1 => "tailing 1 file".to_string(),
            n => format!("tailing {n} files"),
        };
        format!(
            "{tailing}, {}/{} cached",
            self.cache.count, self.cache.max_entries
        )
    }
}

pub struct LogEngine {
    cache: Arc<ContentCache>,
    reports: ReportReader,
    search: RwLock<SearchFilter>,
    tailer: TailingCoordinator,
}

impl LogEngine {
    /// Build an engine; tail events arrive on the returned receiver
    pub fn new(cache: CacheConfig, tail: TailConfig) -> (Self, mpsc::Receiver<TailEvent>) {
        Self::with_cache(Arc::new(ContentCache::new(cache)), tail)
    }

    pub fn with_cache(
        cache: Arc<ContentCache>,
        tail: TailConfig,
    ) -> (Self, mpsc::Receiver<TailEvent>) {
        let (tailer, events) = TailingCoordinator::new(tail);
        let engine = Self {
            reports: ReportReader::new(Arc::clone(&cache)),
            cache,
            search: RwLock::new(SearchFilter::default()),
            tailer,
        };
        (engine, events)
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Classify the file's current content under the active search.
    /// An unreadable file yields an empty tree.
    pub fn get_entry_tree(&self, path: impl AsRef<Path>) -> Vec<LevelGroup> {
        let path = path.as_ref();
        self.cache.optimize();
        let Some(content) = self.cache.get(path) else {
            tracing::debug!(path = %path.display(), "No content to classify");
            return Vec::new();
        };

        let search = self.search.read();
        EntryTreeBuilder::build_from_content(&content, &search)
    }

    /// Update the search state. Returns whether anything changed.
    pub fn set_search(&self, term: &str, case_sensitive: bool, use_regex: bool) -> bool {
        self.search.write().set(term, case_sensitive, use_regex)
    }

    pub fn clear_search(&self) {
        self.search.write().clear();
    }

    // ========================================================================
    // Cache
    // ========================================================================

    pub fn get_cached_content(&self, path: impl AsRef<Path>) -> Option<Arc<str>> {
        self.cache.get(path.as_ref())
    }

    /// Drop the cached content of a file, and its parsed report if any;
    /// used by file watchers
    pub fn invalidate_cache(&self, path: impl AsRef<Path>) -> bool {
        self.reports.invalidate(path.as_ref())
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    /// Number of lines in a file (estimated for large files)
    pub fn line_count(&self, path: impl AsRef<Path>) -> usize {
        self.cache.line_count(path.as_ref())
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Every report below `dir` with its title and severity
    pub fn list_reports(&self, dir: impl AsRef<Path>) -> Vec<ReportInfo> {
        self.reports.list_reports(dir.as_ref())
    }

    pub fn report_info(&self, path: impl AsRef<Path>) -> ReportInfo {
        self.reports.describe(path.as_ref())
    }

    // ========================================================================
    // Tailing
    // ========================================================================

    pub async fn start_tailing(&self, path: impl AsRef<Path>) -> Result<StartOutcome, TailError> {
        self.tailer.start_tailing(path).await
    }

    pub async fn start_tailing_confirmed(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<StartOutcome, TailError> {
        self.tailer.start_tailing_confirmed(path).await
    }

    pub fn stop_tailing(&self, path: impl AsRef<Path>) -> bool {
        self.tailer.stop_tailing(path)
    }

    pub fn stop_all_tailing(&self) -> usize {
        self.tailer.stop_all_tailing()
    }

    pub fn is_tailing(&self, path: impl AsRef<Path>) -> bool {
        self.tailer.is_tailing(path)
    }

    pub fn tailer(&self) -> &TailingCoordinator {
        &self.tailer
    }

    /// Restore persisted tails (when enabled)
    pub async fn restore(&self, store: &dyn TailStateStore) -> usize {
        self.tailer.restore_state(store).await
    }

    /// Persist tail state (when enabled) and stop tailing
    pub fn shutdown(&self, store: &dyn TailStateStore) {
        self.tailer.shutdown(store);
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            tailed: self.tailer.list_tailed(),
            polling: self.tailer.is_polling(),
            cache: self.cache.statistics(),
            search_term: self.search.read().term().to_string(),
        }
    }
}
