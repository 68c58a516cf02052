//! In-memory and on-disk set of pending records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::attempt::{failed_destinations, DeliveryAttempt};
use crate::destination::{find_by_address, Destination};
use crate::error::{DispatchError, Result};
use crate::pending::record::{parse_addresses, PendingRecord, RECORD_EXTENSION};
use crate::registry::Registry;

/// Where pending records live and how to map them back to source files.
#[derive(Debug, Clone)]
pub struct PendingStoreConfig {
    /// Directory holding `*.pend` records.
    pub pending_dir: PathBuf,
    /// Directory watched for source files.
    pub watch_dir: PathBuf,
    /// Extension of source files, without the dot.
    pub source_extension: String,
}

/// Pending records, mirrored between a registry and `pending_dir`.
pub struct PendingStore {
    config: PendingStoreConfig,
    destinations: Arc<[Arc<Destination>]>,
    records: Registry<PendingRecord>,
}

impl PendingStore {
    /// Create an empty store. Records are resolved against `destinations`.
    pub fn new(
        config: PendingStoreConfig,
        destinations: Arc<[Arc<Destination>]>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            destinations,
            records: Registry::with_cancellation(shutdown),
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &PendingStoreConfig {
        &self.config
    }

    /// Source path a durable record with file stem `stem` refers to.
    pub fn source_for_stem(&self, stem: &str) -> PathBuf {
        self.config
            .watch_dir
            .join(format!("{}.{}", stem, self.config.source_extension))
    }

    /// Reload records from disk, replacing whatever was in memory.
    ///
    /// Records whose source file is gone, or that name no known destination,
    /// are deleted. A source that cannot be checked keeps its record. Returns the number of records loaded.
    pub async fn bootstrap(&self) -> Result<usize> {
        self.records.reset().await?;

        let mut entries = match tokio::fs::read_dir(&self.config.pending_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    "Pending directory {} does not exist yet, nothing to load",
                    self.config.pending_dir.display()
                );
                return Ok(0);
            }
            Err(source) => {
                return Err(DispatchError::Persistence {
                    path: self.config.pending_dir.clone(),
                    source,
                })
            }
        };

        let mut loaded = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match self.load_record(&path).await {
                Ok(Some(record)) => loaded.push(record),
                Ok(None) => {}
                Err(e) => tracing::error!("Skipping pending record {}: {}", path.display(), e),
            }
        }

        let count = loaded.len();
        self.records.add_all(loaded).await?;
        tracing::info!("Found {} pending files", count);
        Ok(count)
    }

    async fn load_record(&self, record_path: &Path) -> Result<Option<PendingRecord>> {
        let stem = record_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let source = self.source_for_stem(&stem);

        match tokio::fs::try_exists(&source).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    "Deleting pending file: {} because {} is missing from the watch directory",
                    record_path.display(),
                    source.display()
                );
                remove_record_file(record_path).await?;
                return Ok(None);
            }
            Err(e) => tracing::warn!(
                "Cannot check {} for pending file {}: {}; keeping it",
                source.display(),
                record_path.display(),
                e
            ),
        }

        let contents = tokio::fs::read_to_string(record_path)
            .await
            .map_err(|source| DispatchError::Persistence {
                path: record_path.to_path_buf(),
                source,
            })?;

        let mut destinations = Vec::new();
        for address in parse_addresses(&contents) {
            match find_by_address(&self.destinations, &address) {
                Some(d) => destinations.push(Arc::clone(d)),
                None => tracing::warn!(
                    "Pending record {} names unknown destination {}",
                    record_path.display(),
                    address
                ),
            }
        }

        match PendingRecord::new(source, &self.config.pending_dir, destinations) {
            Some(record) => Ok(Some(record)),
            None => {
                tracing::info!(
                    "Deleting pending file: {} because it names no known destination",
                    record_path.display()
                );
                remove_record_file(record_path).await?;
                Ok(None)
            }
        }
    }

    /// Record the failed attempts of a finished delivery pass.
    ///
    /// Does nothing when every attempt succeeded. A failed write is logged and
    /// the record is kept in memory so the retry loop still sees it.
    pub async fn persist(
        &self,
        attempts: &[DeliveryAttempt],
        source: &Path,
    ) -> Result<Option<PendingRecord>> {
        let Some(record) = PendingRecord::new(
            source,
            &self.config.pending_dir,
            failed_destinations(attempts),
        ) else {
            return Ok(None);
        };

        if let Err(e) = write_record(&record).await {
            tracing::error!(
                "Could not write pending record for {}: {}; keeping it in memory only",
                source.display(),
                e
            );
        } else {
            tracing::info!(
                "Created pending file {} for {} destination(s)",
                record.record_path().display(),
                record.destinations().len()
            );
        }

        self.records.add(record.clone()).await?;
        Ok(Some(record))
    }

    /// Drop `record` from memory and disk. Returns false if it was not present.
    pub async fn cancel(&self, record: &PendingRecord) -> Result<bool> {
        if !self.records.remove(record).await? {
            tracing::debug!(
                "Was asked to delete a pending job, but it didn't exist in the list: {}",
                record.source().display()
            );
            return Ok(false);
        }

        tracing::info!("Deleting pending file: {}", record.record_path().display());
        if let Err(e) = remove_record_file(record.record_path()).await {
            tracing::error!("{}", e);
        }
        Ok(true)
    }

    /// Cancel the record for `source`, if any. Returns false if none existed.
    pub async fn cancel_path(&self, source: &Path) -> Result<bool> {
        let target = self
            .records
            .snapshot()
            .await?
            .into_iter()
            .find(|r| r.is_for(source));

        match target {
            Some(record) => self.cancel(&record).await,
            None => Ok(false),
        }
    }

    /// True if a record for `source` is held.
    pub async fn has_record_for(&self, source: &Path) -> Result<bool> {
        Ok(self.records.snapshot().await?.iter().any(|r| r.is_for(source)))
    }

    /// Copy of every held record.
    pub async fn snapshot(&self) -> Result<Vec<PendingRecord>> {
        self.records.snapshot().await
    }

    /// Number of held records.
    pub async fn count(&self) -> Result<usize> {
        self.records.count().await
    }
}

async fn write_record(record: &PendingRecord) -> Result<()> {
    if let Some(parent) = record.record_path().parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DispatchError::Persistence {
                path: record.record_path().to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(record.record_path(), record.render())
        .await
        .map_err(|source| DispatchError::Persistence {
            path: record.record_path().to_path_buf(),
            source,
        })
}

async fn remove_record_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(
                "Attempted to delete pending file: {}, but it doesn't exist",
                path.display()
            );
            Ok(())
        }
        Err(source) => Err(DispatchError::Persistence {
            path: path.to_path_buf(),
            source,
        }),
    }
}
