use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Change notification for a watched file
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileEvent {
    /// Created, written or renamed into place
    Changed(PathBuf),
    Removed(PathBuf),
    Error(String),
}

/// Watches the directory containing a set of files and reports changes to them.
///
/// The parent directory is watched rather than the files themselves, so a
/// file that is rotated (removed and recreated) keeps being reported.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    pub fn new(files: &[PathBuf]) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let targets: Vec<PathBuf> = files.iter().map(|f| absolute(f)).collect();

        let watched = targets.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    let _ = tx.send(FileEvent::Error(e.to_string()));
                    return;
                }
            };

            for path in event.paths {
                if !watched.contains(&path) {
                    continue;
                }
                let file_event = match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) => FileEvent::Changed(path),
                    EventKind::Remove(_) => FileEvent::Removed(path),
                    _ => continue,
                };
                let _ = tx.send(file_event);
            }
        })
        .context("Failed to create file watcher")?;

        let mut dirs: Vec<&Path> = targets.iter().filter_map(|p| p.parent()).collect();
        dirs.sort();
        dirs.dedup();
        for dir in dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
        }

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// Wait for the next event
    pub async fn recv(&mut self) -> Option<FileEvent> {
        self.receiver.recv().await
    }

    /// Check if there are any pending events (non-blocking)
    pub fn try_recv(&mut self) -> Option<FileEvent> {
        self.receiver.try_recv().ok()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
