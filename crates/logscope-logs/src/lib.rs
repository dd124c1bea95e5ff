//! Log processing for logscope
//!
//! This crate provides line classification, entry tree building, search
//! filtering, content caching, error report reading and incremental file
//! tailing.

mod cache;
mod catalog;
mod classifier;
mod engine;
mod error;
mod filter;
mod report;
mod store;
mod tail;
mod tree;

pub use cache::{ContentCache, MemoryProbe, SystemMemory};
pub use catalog::list_log_files;
pub use classifier::{Classification, LineClassifier};
pub use engine::{EngineStatus, LogEngine};
pub use error::{StoreError, TailError};
pub use filter::SearchFilter;
pub use report::{Report, ReportReader, ReportRecord};
pub use store::{JsonFileStore, MemoryStore, TAILED_FILES_KEY, TailStateStore};
pub use tail::{StartOutcome, TailEvent, TailingCoordinator};
pub use tree::{EntryTreeBuilder, topic_for};

// Re-export types used in our public API
pub use logscope_types::{
    CacheConfig, CacheStatistics, ClassifiedLine, LevelGroup, LogFileInfo, MAX_TAILED_FILES,
    PersistedTail, PollInterval, ReportInfo, ReportSeverity, ResumeMode, TailConfig,
    TailedFileSnapshot, TopicGroup,
};
