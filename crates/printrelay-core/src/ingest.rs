//! Debounced ingestion of changed source files.
//!
//! Change events tend to arrive in bursts while a slicer is still writing a
//! file. Every event re-arms a single debounce timer; only when the timer
//! elapses uninterrupted is the queued set of paths processed, one path at a
//! time.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::attempt::all_succeeded;
use crate::builder::DeliveryJobBuilder;
use crate::error::Result;
use crate::fsutil;
use crate::pending::PendingStore;
use crate::registry::Registry;

/// Default quiet period before queued files are processed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

/// Default bound on waiting for a source file to be unlocked.
pub const DEFAULT_UNLOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Handles one queued source file.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    /// Process `path`. Errors are logged by the caller and do not stop the pass.
    async fn process(&self, path: &Path) -> Result<()>;
}

/// Archives, delivers and, on full success, deletes a source file.
pub struct DispatchProcessor {
    builder: Arc<DeliveryJobBuilder>,
    archive_dir: Option<PathBuf>,
    unlock_timeout: Duration,
    delete_on_send: bool,
}

impl DispatchProcessor {
    /// Processor delivering through `builder`.
    pub fn new(builder: Arc<DeliveryJobBuilder>) -> Self {
        Self {
            builder,
            archive_dir: None,
            unlock_timeout: DEFAULT_UNLOCK_TIMEOUT,
            delete_on_send: true,
        }
    }

    /// Copy every processed file into `dir` before delivering it.
    pub fn with_archive_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.archive_dir = dir;
        self
    }

    /// Override how long to wait for a locked file.
    pub fn with_unlock_timeout(mut self, timeout: Duration) -> Self {
        self.unlock_timeout = timeout;
        self
    }

    /// Whether a fully delivered file is deleted.
    pub fn delete_on_send(mut self, delete: bool) -> Self {
        self.delete_on_send = delete;
        self
    }

    async fn archive(&self, path: &Path) {
        let (Some(dir), Some(name)) = (&self.archive_dir, path.file_name()) else {
            return;
        };
        let target = dir.join(name);
        if let Err(e) = tokio::fs::copy(path, &target).await {
            tracing::error!(
                "Could not archive {} to {}: {}",
                path.display(),
                target.display(),
                e
            );
        }
    }
}

#[async_trait]
impl FileProcessor for DispatchProcessor {
    async fn process(&self, path: &Path) -> Result<()> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!("{} disappeared before processing", path.display());
            return Ok(());
        }

        self.archive(path).await;

        if !fsutil::wait_for_unlock(path, self.unlock_timeout).await {
            return Ok(());
        }

        tracing::info!("Processing {}...", path.display());
        let batch = self.builder.build(path).await?;
        if batch.is_empty() {
            return Ok(());
        }

        let attempts = self.builder.send_all(batch).await?;
        tracing::info!("File {} has been processed", path.display());

        if all_succeeded(&attempts) && self.delete_on_send {
            tracing::info!("Deleting {}", path.display());
            if let Err(e) = fsutil::delete_file(path) {
                tracing::error!("Could not delete {}: {}", path.display(), e);
            }
        }
        Ok(())
    }
}

/// Queues changed paths and processes them after a quiet period.
pub struct IngestCoordinator {
    queue: Registry<PathBuf>,
    store: Arc<PendingStore>,
    processor: Arc<dyn FileProcessor>,
    debounce: Duration,
    timer: StdMutex<Option<CancellationToken>>,
    processing: Mutex<()>,
    shutdown: CancellationToken,
}

impl IngestCoordinator {
    /// Coordinator feeding `processor`. Pending records for changed paths are
    /// cancelled through `store`.
    pub fn new(
        store: Arc<PendingStore>,
        processor: Arc<dyn FileProcessor>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue: Registry::with_cancellation(shutdown.clone()),
            store,
            processor,
            debounce: DEFAULT_DEBOUNCE,
            timer: StdMutex::new(None),
            processing: Mutex::new(()),
            shutdown,
        }
    }

    /// Override the quiet period.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Copy of the queued paths.
    pub async fn queued(&self) -> Result<Vec<PathBuf>> {
        self.queue.snapshot().await
    }

    /// Record a change to `path` and re-arm the debounce timer.
    ///
    /// A path not already queued is queued, and any pending record for it is
    /// dropped since the new contents supersede it.
    pub async fn on_change(self: &Arc<Self>, path: PathBuf) -> Result<()> {
        if !self.queue.contains(&path).await? {
            self.queue.add(path.clone()).await?;
            self.store.cancel_path(&path).await?;
        }
        self.arm();
        Ok(())
    }

    fn arm(self: &Arc<Self>) {
        let token = self.shutdown.child_token();
        {
            let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = timer.replace(token.clone()) {
                previous.cancel();
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(this.debounce) => {
                    if let Err(e) = this.process_queue().await {
                        if !e.is_cancelled() {
                            tracing::error!("Processing queued files failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Process every queued path in order. Returns the number processed.
    ///
    /// Passes never overlap; a pass started while another runs waits for it.
    pub async fn process_queue(&self) -> Result<usize> {
        let _pass = self.processing.lock().await;

        let working = self.queue.snapshot().await?;
        if working.is_empty() {
            return Ok(0);
        }

        let listing: Vec<String> = working.iter().map(|p| p.display().to_string()).collect();
        tracing::info!("Working on the following files:\n{}", listing.join("\n"));

        for path in &working {
            if let Err(e) = self.processor.process(path).await {
                tracing::error!("Failed to process {}: {}", path.display(), e);
            }
            self.queue.remove(path).await?;
        }

        Ok(working.len())
    }

    /// Feed change events from `events` until the channel closes or shutdown.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PathBuf>) -> Result<()> {
        loop {
            let path = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(path) => path,
                    None => break,
                },
            };

            match self.on_change(path).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => tracing::error!("Could not queue change: {}", e),
            }
        }

        tracing::info!("Ingestion stopped");
        Ok(())
    }
}
