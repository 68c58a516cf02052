//! Watch-folder change events.

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Capacity of the change event channel.
pub const EVENT_BUFFER: usize = 256;

/// Keeps the OS watcher alive; dropping it stops the events.
pub struct FolderWatcher {
    watcher: RecommendedWatcher,
    path: PathBuf,
}

impl FolderWatcher {
    /// Watch `path` (not recursively) for created or modified files with
    /// `extension`. Matching paths are sent on the returned channel.
    pub fn start(path: &Path, extension: &str) -> notify::Result<(Self, mpsc::Receiver<PathBuf>)> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let extension = extension.to_string();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for changed in changed_paths(&event, &extension) {
                        if tx.blocking_send(changed).is_err() {
                            tracing::debug!("Change event dropped, ingestion has stopped");
                            return;
                        }
                    }
                }
                Err(e) => tracing::error!("Watcher error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;
        tracing::info!("Monitoring {}", path.display());

        Ok((
            Self {
                watcher,
                path: path.to_path_buf(),
            },
            rx,
        ))
    }
}

impl Drop for FolderWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.watcher.unwatch(&self.path) {
            tracing::debug!("Failed to unwatch {}: {}", self.path.display(), e);
        }
    }
}

/// Paths in `event` worth ingesting: creations and modifications of files
/// with `extension` (case-insensitive).
pub fn changed_paths(event: &Event, extension: &str) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| has_extension(p, extension))
        .cloned()
        .collect()
}

/// True if `path` ends in `.extension`, ignoring case.
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Job files already present in `dir`.
pub fn scan_existing(dir: &Path, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && has_extension(&path, extension) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
