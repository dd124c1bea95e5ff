use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

use logscope_types::{CacheConfig, CacheStatistics};

/// Chunk size for streamed reads of very large files
const STREAM_CHUNK_SIZE: usize = 1024 * 1024;

/// Files above this size get an estimated line count
const EXACT_LINE_COUNT_LIMIT: u64 = 1024 * 1024;

/// Sample size used to estimate line counts
const LINE_COUNT_SAMPLE_SIZE: usize = 100 * 1024;

/// Memory usage ratio above which `optimize` halves the cache
const MEMORY_PRESSURE_RATIO: f64 = 0.8;

/// Source of the current memory usage ratio
pub trait MemoryProbe: Send + Sync {
    /// Fraction of memory in use (0.0..=1.0), `None` when unknown
    fn usage_ratio(&self) -> Option<f64>;
}

/// Reads system memory usage from `/proc/meminfo`
pub struct SystemMemory;

impl MemoryProbe for SystemMemory {
    fn usage_ratio(&self) -> Option<f64> {
        let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
        let field = |name: &str| -> Option<f64> {
            meminfo
                .lines()
                .find(|l| l.starts_with(name))?
                .split_whitespace()
                .nth(1)?
                .parse()
                .ok()
        };
        let total = field("MemTotal:")?;
        let available = field("MemAvailable:")?;
        if total <= 0.0 {
            return None;
        }
        Some(1.0 - available / total)
    }
}

struct CacheEntry {
    content: Arc<str>,
    mtime: SystemTime,
    size_bytes: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<PathBuf, CacheEntry>,
    /// Insertion order, oldest first
    order: VecDeque<PathBuf>,
    /// Memoised line counts keyed by path, valid for the recorded mtime
    line_counts: HashMap<PathBuf, (usize, SystemTime)>,
}

impl CacheState {
    fn remove(&mut self, path: &Path) -> bool {
        self.line_counts.remove(path);
        let removed = self.entries.remove(path).is_some();
        if removed {
            self.order.retain(|p| p != path);
        }
        removed
    }

    fn evict_oldest(&mut self, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            let Some(path) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&path);
            self.line_counts.remove(&path);
            evicted += 1;
        }
        evicted
    }
}

/// Mtime-validated, size-bounded cache of file text.
///
/// Entries are evicted in insertion order, which approximates LRU without
/// tracking access recency.
pub struct ContentCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
    probe: Box<dyn MemoryProbe>,
    disk_reads: AtomicU64,
}

impl ContentCache {
    /// Create a cache probing system memory for `optimize`
    pub fn new(config: CacheConfig) -> Self {
        Self::with_probe(config, Box::new(SystemMemory))
    }

    pub fn with_probe(config: CacheConfig, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config: config.normalized(),
            probe,
            disk_reads: AtomicU64::new(0),
        }
    }

    /// Get file text, re-reading when the file changed since it was cached.
    /// Returns `None` if the file cannot be read.
    pub fn get(&self, path: &Path) -> Option<Arc<str>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Cannot stat file");
                return None;
            }
        };
        let size = metadata.len();

        let streamed = size > self.config.stream_threshold_bytes;
        if streamed || size > self.config.max_file_size_bytes {
            // Not cacheable at this size; drop an entry from before the file grew
            if self.state.lock().remove(path) {
                tracing::debug!(path = %path.display(), size, "Dropped entry for oversized file");
            }
            let read = if streamed {
                self.read_streamed(path)
            } else {
                self.read_whole(path)
            };
            return self.log_read(path, read);
        }

        let mtime = metadata.modified().ok();
        if let Some(mtime) = mtime {
            let state = self.state.lock();
            if let Some(entry) = state.entries.get(path) {
                if entry.mtime >= mtime {
                    return Some(Arc::clone(&entry.content));
                }
            }
        }

        let content = self.log_read(path, self.read_whole(path))?;
        match mtime {
            Some(mtime) => self.insert(path, Arc::clone(&content), mtime, size),
            None => tracing::debug!(path = %path.display(), "No mtime available, not caching"),
        }
        Some(content)
    }

    fn insert(&self, path: &Path, content: Arc<str>, mtime: SystemTime, size_bytes: u64) {
        let mut state = self.state.lock();
        let entry = CacheEntry {
            content,
            mtime,
            size_bytes,
        };

        if let Some(existing) = state.entries.get_mut(path) {
            *existing = entry;
            return;
        }

        if state.entries.len() >= self.config.max_entries {
            let to_evict = self.config.max_entries.div_ceil(10).max(1);
            let evicted = state.evict_oldest(to_evict);
            tracing::debug!(evicted, "Content cache full, evicted oldest entries");
        }

        state.entries.insert(path.to_path_buf(), entry);
        state.order.push_back(path.to_path_buf());
    }

    fn log_read(&self, path: &Path, result: io::Result<Arc<str>>) -> Option<Arc<str>> {
        match result {
            Ok(content) => Some(content),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Error reading file");
                None
            }
        }
    }

    fn read_whole(&self, path: &Path) -> io::Result<Arc<str>> {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let bytes = fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into())
    }

    fn read_streamed(&self, path: &Path) -> io::Result<Arc<str>> {
        self.disk_reads.fetch_add(1, Ordering::Relaxed);
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        let mut chunk = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
        }
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Streamed large file");
        Ok(String::from_utf8_lossy(&bytes).into())
    }

    /// Drop the entry for `path`. Returns whether content was cached.
    pub fn invalidate(&self, path: &Path) -> bool {
        self.state.lock().remove(path)
    }

    /// Halve the cache, oldest first, when memory usage is above 80%.
    /// Returns the number of evicted entries.
    pub fn optimize(&self) -> usize {
        let Some(ratio) = self.probe.usage_ratio() else {
            return 0;
        };
        if ratio <= MEMORY_PRESSURE_RATIO {
            return 0;
        }

        let mut state = self.state.lock();
        let target = state.entries.len() / 2;
        let to_evict = state.entries.len() - target;
        let evicted = state.evict_oldest(to_evict);
        tracing::info!(evicted, ratio, "Content cache optimized due to memory pressure");
        evicted
    }

    /// Current cache statistics
    pub fn statistics(&self) -> CacheStatistics {
        let state = self.state.lock();
        let stats = CacheStatistics {
            count: state.entries.len(),
            max_entries: self.config.max_entries,
            max_file_size_bytes: self.config.max_file_size_bytes,
            approx_memory_bytes: state.entries.values().map(|e| e.content.len()).sum(),
        };
        drop(state);

        if self.config.log_statistics {
            tracing::info!(
                count = stats.count,
                max_entries = stats.max_entries,
                max_file_size_bytes = stats.max_file_size_bytes,
                approx_memory_bytes = stats.approx_memory_bytes,
                "Content cache statistics"
            );
        }
        stats
    }

    /// Total bytes of the files currently cached, as recorded at read time
    pub fn cached_file_bytes(&self) -> u64 {
        self.state.lock().entries.values().map(|e| e.size_bytes).sum()
    }

    /// Number of file reads performed so far
    pub fn disk_reads(&self) -> u64 {
        self.disk_reads.load(Ordering::Relaxed)
    }

    /// Whether `path` currently has an entry
    pub fn contains(&self, path: &Path) -> bool {
        self.state.lock().entries.contains_key(path)
    }

    /// Number of lines in a file: exact for small files, estimated from a
    /// leading sample for larger ones. Returns 0 if the file cannot be read.
    pub fn line_count(&self, path: &Path) -> usize {
        let Ok(metadata) = fs::metadata(path) else {
            return 0;
        };
        let mtime = metadata.modified().ok();

        if let Some(mtime) = mtime {
            if let Some((count, at)) = self.state.lock().line_counts.get(path) {
                if *at >= mtime {
                    return *count;
                }
            }
        }

        let count = if metadata.len() > EXACT_LINE_COUNT_LIMIT {
            match estimate_line_count(path, metadata.len()) {
                Ok(count) => count,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot sample file");
                    return 0;
                }
            }
        } else {
            match self.get(path) {
                Some(content) => content.split('\n').count(),
                None => return 0,
            }
        };

        if let Some(mtime) = mtime {
            self.state
                .lock()
                .line_counts
                .insert(path.to_path_buf(), (count, mtime));
        }
        count
    }
}

fn estimate_line_count(path: &Path, size: u64) -> io::Result<usize> {
    let mut sample = Vec::with_capacity(LINE_COUNT_SAMPLE_SIZE);
    File::open(path)?
        .take(LINE_COUNT_SAMPLE_SIZE as u64)
        .read_to_end(&mut sample)?;
    if sample.is_empty() {
        return Ok(0);
    }
    let newlines = sample.iter().filter(|&&b| b == b'\n').count();
    let estimate = newlines as f64 * size as f64 / sample.len() as f64;
    Ok(estimate.ceil() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedProbe(f64);

    impl MemoryProbe for FixedProbe {
        fn usage_ratio(&self) -> Option<f64> {
            Some(self.0)
        }
    }

    fn config(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            ..CacheConfig::default()
        }
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_unchanged_file_read_once() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "system.log", "first\nsecond\n");
        let cache = ContentCache::new(config(10));

        let a = cache.get(&path).unwrap();
        let b = cache.get(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.disk_reads(), 1);
    }

    #[test]
    fn test_modified_file_is_reread() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "system.log", "old");
        let cache = ContentCache::new(config(10));
        assert_eq!(&*cache.get(&path).unwrap(), "old");

        fs::write(&path, "new content").unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        assert_eq!(&*cache.get(&path).unwrap(), "new content");
        assert_eq!(cache.disk_reads(), 2);
    }

    #[test]
    fn test_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(config(10));
        assert!(cache.get(&dir.path().join("missing.log")).is_none());
    }

    #[test]
    fn test_large_file_not_cached() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "big.log", &"x".repeat(64));
        let cache = ContentCache::new(CacheConfig {
            max_file_size_bytes: 16,
            ..config(10)
        });

        assert_eq!(cache.get(&path).unwrap().len(), 64);
        assert!(!cache.contains(&path));
        cache.get(&path).unwrap();
        assert_eq!(cache.disk_reads(), 2);
    }

    #[test]
    fn test_file_growing_past_limit_drops_entry() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "system.log", "small");
        let cache = ContentCache::new(CacheConfig {
            max_file_size_bytes: 16,
            ..config(10)
        });
        cache.get(&path).unwrap();
        assert!(cache.contains(&path));

        fs::write(&path, "x".repeat(64)).unwrap();
        assert_eq!(cache.get(&path).unwrap().len(), 64);
        assert!(!cache.contains(&path));
        assert_eq!(cache.statistics().count, 0);
    }

    #[test]
    fn test_streamed_read() {
        let dir = TempDir::new().unwrap();
        let content = "line\n".repeat(1000);
        let path = write(&dir, "huge.log", &content);
        let cache = ContentCache::new(CacheConfig {
            max_file_size_bytes: 16,
            stream_threshold_bytes: 32,
            ..config(10)
        });

        assert_eq!(&*cache.get(&path).unwrap(), content.as_str());
        assert!(!cache.contains(&path));
    }

    #[test]
    fn test_eviction_removes_oldest_tenth() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::new(config(10));
        let paths: Vec<PathBuf> = (0..11)
            .map(|i| write(&dir, &format!("{i}.log"), "x"))
            .collect();

        for path in &paths[..10] {
            cache.get(path).unwrap();
        }
        assert_eq!(cache.statistics().count, 10);

        cache.get(&paths[10]).unwrap();
        assert_eq!(cache.statistics().count, 10);
        assert!(!cache.contains(&paths[0]));
        assert!(cache.contains(&paths[1]));
        assert!(cache.contains(&paths[10]));
    }

    #[test]
    fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "system.log", "x");
        let cache = ContentCache::new(config(10));
        cache.get(&path).unwrap();

        assert!(cache.invalidate(&path));
        assert!(!cache.contains(&path));
        assert!(!cache.invalidate(&path));

        cache.get(&path).unwrap();
        assert_eq!(cache.disk_reads(), 2);
    }

    #[test]
    fn test_optimize_under_pressure() {
        let dir = TempDir::new().unwrap();
        let cache = ContentCache::with_probe(config(10), Box::new(FixedProbe(0.9)));
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| write(&dir, &format!("{i}.log"), "x"))
            .collect();
        for path in &paths {
            cache.get(path).unwrap();
        }

        assert_eq!(cache.optimize(), 3);
        assert_eq!(cache.statistics().count, 2);
        assert!(cache.contains(&paths[3]));
        assert!(cache.contains(&paths[4]));
    }

    #[test]
    fn test_optimize_without_pressure() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.log", "x");
        let cache = ContentCache::with_probe(config(10), Box::new(FixedProbe(0.5)));
        cache.get(&path).unwrap();
        assert_eq!(cache.optimize(), 0);
        assert_eq!(cache.statistics().count, 1);
    }

    #[test]
    fn test_statistics() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.log", "12345");
        let cache = ContentCache::new(config(20));
        cache.get(&path).unwrap();

        let stats = cache.statistics();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.max_entries, 20);
        assert_eq!(stats.max_file_size_bytes, CacheConfig::DEFAULT_MAX_FILE_SIZE);
        assert_eq!(stats.approx_memory_bytes, 5);
        assert_eq!(cache.cached_file_bytes(), 5);
    }

    #[test]
    fn test_line_count_exact() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.log", "one\ntwo\nthree");
        let cache = ContentCache::new(config(10));
        assert_eq!(cache.line_count(&path), 3);
        assert_eq!(cache.line_count(&dir.path().join("missing.log")), 0);
    }

    #[test]
    fn test_line_count_estimated() {
        let dir = TempDir::new().unwrap();
        // 2 MiB of 16-byte lines
        let content = "0123456789abcde\n".repeat(2 * 1024 * 1024 / 16);
        let path = write(&dir, "big.log", &content);
        let cache = ContentCache::new(config(10));
        assert_eq!(cache.line_count(&path), 2 * 1024 * 1024 / 16);
    }
}
