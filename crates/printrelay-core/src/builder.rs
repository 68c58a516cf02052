//! Turns a source file into delivery attempts and runs them.
//!
//! A source file declares its target class on a marker line, e.g.
//! `;Sliced for Ender3`. The builder pairs the file with every destination of
//! that class; `send_all` fans the attempts out as independent tasks and hands
//! the failures to the pending store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::attempt::DeliveryAttempt;
use crate::deliverable::{ContentDigester, DeliverableFile, Md5Digester};
use crate::destination::Destination;
use crate::error::{DispatchError, Result};
use crate::pending::PendingStore;

/// Default marker line prefix.
pub const DEFAULT_MARKER_PREFIX: &str = ";Sliced for";

/// The attempts built for one source file.
#[derive(Debug, Clone)]
pub struct DeliveryBatch {
    source: PathBuf,
    attempts: Vec<DeliveryAttempt>,
}

impl DeliveryBatch {
    /// A batch with no attempts.
    pub fn empty(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            attempts: Vec::new(),
        }
    }

    /// Source file.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Attempts, in destination order.
    pub fn attempts(&self) -> &[DeliveryAttempt] {
        &self.attempts
    }

    /// Number of attempts.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// True when no destination matched.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

/// Builds and dispatches delivery attempts.
pub struct DeliveryJobBuilder {
    destinations: Arc<[Arc<Destination>]>,
    marker_prefix: String,
    store: Arc<PendingStore>,
    digester: Arc<dyn ContentDigester>,
}

impl DeliveryJobBuilder {
    /// Builder over `destinations`, persisting failures to `store`.
    pub fn new(destinations: Arc<[Arc<Destination>]>, store: Arc<PendingStore>) -> Self {
        Self {
            destinations,
            marker_prefix: DEFAULT_MARKER_PREFIX.to_string(),
            store,
            digester: Arc::new(Md5Digester),
        }
    }

    /// Override the marker line prefix.
    pub fn with_marker_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.marker_prefix = prefix.into();
        self
    }

    /// Override the content digester.
    pub fn with_digester(mut self, digester: Arc<dyn ContentDigester>) -> Self {
        self.digester = digester;
        self
    }

    /// Pending store failures go to.
    pub fn store(&self) -> &Arc<PendingStore> {
        &self.store
    }

    /// Every known destination.
    pub fn destinations(&self) -> &[Arc<Destination>] {
        &self.destinations
    }

    /// Build one attempt per destination whose class the file declares.
    ///
    /// A file with no marker, or whose class matches nothing, yields an empty
    /// batch after a warning.
    pub async fn build(&self, path: &Path) -> Result<DeliveryBatch> {
        let class = match scan_target_class(path, &self.marker_prefix).await {
            Ok(class) => class,
            Err(e @ DispatchError::MalformedSource { .. }) => {
                tracing::warn!("{}", e);
                return Ok(DeliveryBatch::empty(path));
            }
            Err(e) => return Err(e),
        };

        let matching: Vec<Arc<Destination>> = self
            .destinations
            .iter()
            .filter(|d| d.class() == class)
            .cloned()
            .collect();

        if matching.is_empty() {
            tracing::warn!(
                "No destination of class {} for {}",
                class,
                path.display()
            );
            return Ok(DeliveryBatch::empty(path));
        }

        self.build_for(path, &matching)
    }

    /// Build one attempt per given destination, without scanning the file.
    pub fn build_for(&self, path: &Path, destinations: &[Arc<Destination>]) -> Result<DeliveryBatch> {
        if destinations.is_empty() {
            return Ok(DeliveryBatch::empty(path));
        }

        let file = Arc::new(DeliverableFile::with_digester(
            path,
            Arc::clone(&self.digester),
        )?);
        let attempts = destinations
            .iter()
            .map(|d| DeliveryAttempt::new(Arc::clone(d), Arc::clone(&file)))
            .collect();

        Ok(DeliveryBatch {
            source: path.to_path_buf(),
            attempts,
        })
    }

    /// Run every attempt concurrently, persist the failures, and return the
    /// finished attempts in batch order.
    pub async fn send_all(&self, batch: DeliveryBatch) -> Result<Vec<DeliveryAttempt>> {
        let DeliveryBatch { source, attempts } = batch;
        if attempts.is_empty() {
            return Ok(Vec::new());
        }

        let mut handles = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            let fallback = attempt.clone();
            handles.push((fallback, tokio::spawn(attempt.run())));
        }

        let mut finished = Vec::with_capacity(handles.len());
        for (fallback, handle) in handles {
            match handle.await {
                Ok(done) => finished.push(done),
                Err(e) => {
                    tracing::error!(
                        "Delivery task for {} to {} failed: {}",
                        source.display(),
                        fallback.destination().address(),
                        e
                    );
                    finished.push(fallback.into_failed());
                }
            }
        }

        self.store.persist(&finished, &source).await?;
        Ok(finished)
    }
}

/// Target class declared by the first marker line of `path`.
///
/// The class is the rest of the marker line after the prefix, trimmed, so
/// multi-word classes such as `Prusa MK4` are kept whole.
pub async fn scan_target_class(path: &Path, marker_prefix: &str) -> Result<String> {
    let file = tokio::fs::File::open(path).await?;
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_start_matches('\u{feff}').trim_end();
        if text.starts_with(marker_prefix) {
            let class = text[marker_prefix.len()..].trim();
            return match class {
                "" => Err(DispatchError::MalformedSource {
                    path: path.to_path_buf(),
                    reason: "marker line names no target class".to_string(),
                }),
                class => Ok(class.to_string()),
            };
        }
    }

    Err(DispatchError::MalformedSource {
        path: path.to_path_buf(),
        reason: format!("no line starting with {:?}", marker_prefix),
    })
}
