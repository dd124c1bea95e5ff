use futures::future::join_all;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use parking_lot::Mutex;

use logscope_types::{PersistedTail, ResumeMode, TailConfig, TailedFileSnapshot};

use crate::error::TailError;
use crate::store::TailStateStore;

/// Notifications produced by the tailing coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TailEvent {
    /// Complete lines appended to a tailed file. `start_line` is the number of
    /// lines emitted for this file before these.
    NewEntries {
        path: PathBuf,
        lines: Vec<String>,
        start_line: u64,
    },
    /// File disappeared, tailing was stopped
    FileNotFound { path: PathBuf },
    /// File shrank below the tracked offset; reading restarts from the beginning
    Reset { path: PathBuf },
    /// The set of tailed files changed
    StateChanged { tailed: Vec<PathBuf> },
}

/// Result of a start request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyTailing,
    /// Concurrent tail cap reached
    LimitReached { limit: usize },
    /// File is above the large file threshold; call `start_tailing_confirmed`
    ConfirmationRequired { size_bytes: u64 },
}

impl StartOutcome {
    /// Whether the file is tailed after this request
    pub fn is_tailing(&self) -> bool {
        matches!(self, Self::Started | Self::AlreadyTailing)
    }
}

/// Per-file tail state
struct TailedFile {
    path: PathBuf,
    display_name: String,
    byte_offset: u64,
    last_line_number: u64,
    /// Bytes after the last newline seen
    partial: Vec<u8>,
    /// Identifies this tailing session; reads from older sessions are discarded
    generation: u64,
}

impl TailedFile {
    /// Append new bytes and take every line completed by them
    fn absorb(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    fn snapshot(&self) -> TailedFileSnapshot {
        TailedFileSnapshot {
            path: self.path.clone(),
            display_name: self.display_name.clone(),
            byte_offset: self.byte_offset,
            last_line_number: self.last_line_number,
            partial_len: self.partial.len(),
        }
    }
}

/// What a positional read found
enum Delta {
    Unchanged,
    Truncated { size: u64 },
    Grew { bytes: Vec<u8>, new_offset: u64 },
}

/// Read the bytes appended after `offset`
async fn read_delta(path: &Path, offset: u64) -> std::io::Result<Delta> {
    let size = tokio::fs::metadata(path).await?.len();
    if size < offset {
        return Ok(Delta::Truncated { size });
    }
    if size == offset {
        return Ok(Delta::Unchanged);
    }

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let wanted = size - offset;
    let mut bytes = Vec::with_capacity(wanted as usize);
    file.take(wanted).read_to_end(&mut bytes).await?;

    let new_offset = offset + bytes.len() as u64;
    Ok(Delta::Grew { bytes, new_offset })
}

/// Shared poll timer
struct Poller {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

struct Shared {
    config: TailConfig,
    files: Mutex<HashMap<PathBuf, TailedFile>>,
    poller: Mutex<Option<Poller>>,
    events: mpsc::Sender<TailEvent>,
    next_generation: AtomicU64,
    /// Serialises ticks so a manual poll never overlaps the timer's
    poll_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn tailed_paths(&self) -> Vec<PathBuf> {
        let files = self.files.lock();
        let mut tailed: Vec<&TailedFile> = files.values().collect();
        tailed.sort_by_key(|f| f.generation);
        tailed.into_iter().map(|f| f.path.clone()).collect()
    }

    /// Non-blocking notice for start/stop calls made outside the poll task
    fn notify_state_changed(&self) {
        let event = TailEvent::StateChanged {
            tailed: self.tailed_paths(),
        };
        if let Err(e) = self.events.try_send(event) {
            tracing::warn!(error = %e, "Tail state change not delivered");
        }
    }

    async fn emit(&self, event: TailEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Tail event receiver dropped");
        }
    }

    fn stop_poller(&self, abort: bool) {
        if let Some(poller) = self.poller.lock().take() {
            poller.cancel.cancel();
            if abort {
                poller.task.abort();
            }
            tracing::debug!("Tail poll timer stopped");
        }
    }

    /// Run one tick over every tailed file
    async fn poll_once(&self) {
        let _tick = self.poll_lock.lock().await;

        let targets: Vec<(PathBuf, u64, u64)> = self
            .files
            .lock()
            .values()
            .map(|f| (f.path.clone(), f.generation, f.byte_offset))
            .collect();
        if targets.is_empty() {
            return;
        }

        join_all(
            targets
                .into_iter()
                .map(|(path, generation, offset)| self.check_file(path, generation, offset)),
        )
        .await;
    }

    async fn check_file(&self, path: PathBuf, generation: u64, offset: u64) {
        let read = tokio::time::timeout(self.config.read_timeout(), read_delta(&path, offset)).await;
        let delta = match read {
            Ok(Ok(delta)) => delta,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.stop_missing(&path, generation).await;
                return;
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Transient read error while tailing");
                return;
            }
            Err(_) => {
                tracing::warn!(
                    path = %path.display(),
                    timeout_ms = self.config.read_timeout_ms,
                    "Tail read timed out"
                );
                return;
            }
        };

        let event = {
            let mut files = self.files.lock();
            let Some(file) = files.get_mut(&path) else {
                return;
            };
            if file.generation != generation || file.byte_offset != offset {
                tracing::debug!(path = %path.display(), "Discarding read from superseded tail session");
                return;
            }

            match delta {
                Delta::Unchanged => None,
                Delta::Truncated { size } => {
                    tracing::info!(
                        path = %path.display(),
                        size,
                        offset,
                        "File truncated, restarting from the beginning"
                    );
                    file.byte_offset = 0;
                    file.partial.clear();
                    Some(TailEvent::Reset { path: path.clone() })
                }
                Delta::Grew { bytes, new_offset } => {
                    let lines = file.absorb(&bytes);
                    file.byte_offset = new_offset;
                    if lines.is_empty() {
                        None
                    } else {
                        let start_line = file.last_line_number;
                        file.last_line_number += lines.len() as u64;
                        tracing::debug!(path = %path.display(), count = lines.len(), "New tailed lines");
                        Some(TailEvent::NewEntries {
                            path: path.clone(),
                            lines,
                            start_line,
                        })
                    }
                }
            }
        };

        if let Some(event) = event {
            self.emit(event).await;
        }
    }

    async fn stop_missing(&self, path: &Path, generation: u64) {
        let now_empty = {
            let mut files = self.files.lock();
            if !files.get(path).is_some_and(|f| f.generation == generation) {
                return;
            }
            files.remove(path);
            files.is_empty()
        };

        tracing::warn!(path = %path.display(), "Tailed file no longer exists, stopped tailing");
        if now_empty {
            // Running inside the poll task: let the loop exit on its own
            self.stop_poller(false);
        }
        self.emit(TailEvent::FileNotFound {
            path: path.to_path_buf(),
        })
        .await;
        self.emit(TailEvent::StateChanged {
            tailed: self.tailed_paths(),
        })
        .await;
    }
}

/// Owns per-file tail state and the shared poll loop
pub struct TailingCoordinator {
    shared: Arc<Shared>,
}

impl TailingCoordinator {
    /// Create a coordinator and the receiver its events are delivered to
    pub fn new(config: TailConfig) -> (Self, mpsc::Receiver<TailEvent>) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let shared = Shared {
            config,
            files: Mutex::new(HashMap::new()),
            poller: Mutex::new(None),
            events: tx,
            next_generation: AtomicU64::new(0),
            poll_lock: tokio::sync::Mutex::new(()),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    /// Start tailing from the current end of the file
    pub async fn start_tailing(&self, path: impl AsRef<Path>) -> Result<StartOutcome, TailError> {
        self.start(path.as_ref(), false, None).await
    }

    /// Start tailing, skipping the large file confirmation
    pub async fn start_tailing_confirmed(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<StartOutcome, TailError> {
        self.start(path.as_ref(), true, None).await
    }

    /// Resume at a persisted offset. An offset past the end of the (rotated)
    /// file restarts at 0; the line counter is kept either way.
    pub async fn resume_tailing(&self, record: &PersistedTail) -> Result<StartOutcome, TailError> {
        self.start(
            &record.file_path,
            true,
            Some((record.position, record.last_line_number)),
        )
        .await
    }

    async fn start(
        &self,
        path: &Path,
        confirmed: bool,
        resume: Option<(u64, u64)>,
    ) -> Result<StartOutcome, TailError> {
        if let Some(outcome) = self.admission(path) {
            return Ok(outcome);
        }

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| TailError::from_io(path, e))?;
        if !metadata.is_file() {
            return Err(TailError::NotFound(path.to_path_buf()));
        }

        let size = metadata.len();
        if !confirmed && size > self.shared.config.large_file_threshold_bytes {
            tracing::info!(path = %path.display(), size, "Large file needs confirmation before tailing");
            return Ok(StartOutcome::ConfirmationRequired { size_bytes: size });
        }

        let (byte_offset, last_line_number) = match resume {
            Some((position, line)) if position <= size => (position, line),
            Some((_, line)) => (0, line),
            None => (size, 0),
        };

        {
            let mut files = self.shared.files.lock();
            // Another start may have raced us while we were reading metadata
            if files.contains_key(path) {
                return Ok(StartOutcome::AlreadyTailing);
            }
            let limit = self.shared.config.tail_limit();
            if files.len() >= limit {
                return Ok(StartOutcome::LimitReached { limit });
            }

            let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst);
            let display_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            files.insert(
                path.to_path_buf(),
                TailedFile {
                    path: path.to_path_buf(),
                    display_name,
                    byte_offset,
                    last_line_number,
                    partial: Vec::new(),
                    generation,
                },
            );
        }

        self.ensure_poller();
        tracing::info!(path = %path.display(), offset = byte_offset, "Started tailing");
        self.shared.notify_state_changed();
        Ok(StartOutcome::Started)
    }

    fn admission(&self, path: &Path) -> Option<StartOutcome> {
        let files = self.shared.files.lock();
        if files.contains_key(path) {
            return Some(StartOutcome::AlreadyTailing);
        }
        let limit = self.shared.config.tail_limit();
        if files.len() >= limit {
            tracing::warn!(limit, "Maximum number of tailed files reached");
            return Some(StartOutcome::LimitReached { limit });
        }
        None
    }

    fn ensure_poller(&self) {
        let mut poller = self.shared.poller.lock();
        if poller.as_ref().is_some_and(|p| !p.task.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let period = self.shared.config.poll_duration();
        let shared = Arc::clone(&self.shared);
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = interval.tick() => shared.poll_once().await,
                    }
                }
            })
        };

        tracing::debug!(interval_ms = period.as_millis() as u64, "Tail poll timer started");
        *poller = Some(Poller { cancel, task });
    }

    /// Run one tick now over every tailed file
    pub async fn poll_once(&self) {
        self.shared.poll_once().await;
    }

    /// Stop tailing a file. Returns whether it was tailed.
    pub fn stop_tailing(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let (removed, now_empty) = {
            let mut files = self.shared.files.lock();
            let removed = files.remove(path).is_some();
            (removed, files.is_empty())
        };
        if !removed {
            return false;
        }

        if now_empty {
            self.shared.stop_poller(true);
        }
        tracing::info!(path = %path.display(), "Stopped tailing");
        self.shared.notify_state_changed();
        true
    }

    /// Stop tailing every file. Returns how many were tailed.
    pub fn stop_all_tailing(&self) -> usize {
        let count = {
            let mut files = self.shared.files.lock();
            let count = files.len();
            files.clear();
            count
        };
        self.shared.stop_poller(true);

        if count > 0 {
            tracing::info!(count, "Stopped tailing all files");
            self.shared.notify_state_changed();
        }
        count
    }

    pub fn is_tailing(&self, path: impl AsRef<Path>) -> bool {
        self.shared.files.lock().contains_key(path.as_ref())
    }

    /// Tailed paths in the order tailing started
    pub fn list_tailed(&self) -> Vec<PathBuf> {
        self.shared.tailed_paths()
    }

    /// Whether the shared poll timer is running
    pub fn is_polling(&self) -> bool {
        self.shared
            .poller
            .lock()
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    /// State of every tailed file, in start order
    pub fn snapshot(&self) -> Vec<TailedFileSnapshot> {
        let files = self.shared.files.lock();
        let mut snapshots: Vec<(u64, TailedFileSnapshot)> = files
            .values()
            .map(|f| (f.generation, f.snapshot()))
            .collect();
        snapshots.sort_by_key(|(generation, _)| *generation);
        snapshots.into_iter().map(|(_, s)| s).collect()
    }

    /// State of a single tailed file
    pub fn file_snapshot(&self, path: impl AsRef<Path>) -> Option<TailedFileSnapshot> {
        self.shared
            .files
            .lock()
            .get(path.as_ref())
            .map(TailedFile::snapshot)
    }

    /// Persist the current tail state. Failures are logged, never returned.
    pub fn save_state(&self, store: &dyn TailStateStore) -> bool {
        let records: Vec<PersistedTail> = self.snapshot().iter().map(PersistedTail::from).collect();
        match store.save(&records) {
            Ok(()) => {
                tracing::debug!(count = records.len(), "Saved tail state");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to save tail state");
                false
            }
        }
    }

    /// Restart tailing for persisted files when persistence is enabled.
    /// Returns the number of files now tailed from the store.
    pub async fn restore_state(&self, store: &dyn TailStateStore) -> usize {
        if !self.shared.config.persist_across_sessions {
            return 0;
        }

        let records = match store.load() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load tail state");
                return 0;
            }
        };

        let mut restored = 0;
        for record in &records {
            let result = match self.shared.config.resume_mode {
                ResumeMode::End => self.start_tailing_confirmed(&record.file_path).await,
                ResumeMode::Offset => self.resume_tailing(record).await,
            };
            match result {
                Ok(outcome) if outcome.is_tailing() => restored += 1,
                Ok(outcome) => {
                    tracing::warn!(path = %record.file_path.display(), ?outcome, "Could not restore tailing");
                }
                Err(e) => {
                    tracing::warn!(path = %record.file_path.display(), error = %e, "Could not restore tailing");
                }
            }
        }

        if restored > 0 {
            tracing::info!(restored, "Restored tailing");
        }
        restored
    }

    /// Persist state (when enabled), then stop tailing everything
    pub fn shutdown(&self, store: &dyn TailStateStore) {
        if self.shared.config.persist_across_sessions {
            self.save_state(store);
        }
        self.stop_all_tailing();
    }
}

impl Drop for TailingCoordinator {
    fn drop(&mut self) {
        self.shared.stop_poller(true);
    }
}
