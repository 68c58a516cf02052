//! Watch-folder daemon.
//!
//! Startup order matters: the pending store is bootstrapped before the retry
//! loop starts, and files already sitting in the watch folder are queued only
//! after the watcher is live so nothing written in between is missed.

use std::sync::Arc;

use anyhow::Context;
use printrelay_core::{
    DeliveryJobBuilder, DeliveryPermit, Destination, DispatchProcessor, IngestCoordinator,
    PendingStore, PendingStoreConfig, ProtocolRegistry, RetryLoop,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::inventory::{self, InventoryOptions};
use crate::watcher::{self, FolderWatcher};

/// A running daemon.
pub struct Daemon {
    shutdown: CancellationToken,
    permit: DeliveryPermit,
    store: Arc<PendingStore>,
    coordinator: Arc<IngestCoordinator>,
    retry: JoinHandle<()>,
    ingest: JoinHandle<printrelay_core::Result<()>>,
    _watcher: FolderWatcher,
}

impl Daemon {
    /// Prepare directories, load destinations and pending records, and start
    /// the retry loop, the watcher and ingestion.
    pub async fn start(config: AgentConfig) -> anyhow::Result<Self> {
        for dir in [&config.watch_path, &config.pending_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        if let Some(archive) = &config.archive_path {
            std::fs::create_dir_all(archive)
                .with_context(|| format!("creating {}", archive.display()))?;
        }

        let shutdown = CancellationToken::new();
        let permit = DeliveryPermit::new(config.delivery_concurrency);
        let destinations: Arc<[Arc<Destination>]> = inventory::load(
            &config.destinations_csv,
            &ProtocolRegistry::default(),
            &InventoryOptions {
                templates_dir: config.templates_dir.clone(),
                permit: permit.clone(),
                always_reachable: config.debug_always_reachable,
                dry_run: config.debug_dry_run,
            },
        )?
        .into();

        let store = Arc::new(PendingStore::new(
            PendingStoreConfig {
                pending_dir: config.pending_dir.clone(),
                watch_dir: config.watch_path.clone(),
                source_extension: config.source_extension.clone(),
            },
            Arc::clone(&destinations),
            shutdown.clone(),
        ));
        store.bootstrap().await?;

        let builder = Arc::new(
            DeliveryJobBuilder::new(destinations, Arc::clone(&store))
                .with_marker_prefix(config.marker_prefix.clone()),
        );

        let retry = Arc::new(
            RetryLoop::new(Arc::clone(&builder))
                .with_interval(config.recheck_interval())
                .delete_on_send(config.delete_on_send),
        )
        .supervise(shutdown.clone());

        let processor = DispatchProcessor::new(builder)
            .with_archive_dir(config.archive_path.clone())
            .with_unlock_timeout(config.unlock_timeout())
            .delete_on_send(config.delete_on_send);
        let coordinator = Arc::new(
            IngestCoordinator::new(Arc::clone(&store), Arc::new(processor), shutdown.clone())
                .with_debounce(config.debounce()),
        );

        let (folder_watcher, events) =
            FolderWatcher::start(&config.watch_path, &config.source_extension)
                .with_context(|| format!("watching {}", config.watch_path.display()))?;
        let ingest = tokio::spawn(Arc::clone(&coordinator).run(events));

        let daemon = Self {
            shutdown,
            permit,
            store,
            coordinator,
            retry,
            ingest,
            _watcher: folder_watcher,
        };
        daemon.queue_existing(&config).await?;
        Ok(daemon)
    }

    async fn queue_existing(&self, config: &AgentConfig) -> anyhow::Result<()> {
        let existing = watcher::scan_existing(&config.watch_path, &config.source_extension)?;
        let mut queued = 0;
        for path in existing {
            if self.store.has_record_for(&path).await? {
                continue;
            }
            self.coordinator.on_change(path).await?;
            queued += 1;
        }
        if queued > 0 {
            tracing::info!("Queued {} file(s) already in the watch folder", queued);
        }
        Ok(())
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Pending record store.
    pub fn store(&self) -> &Arc<PendingStore> {
        &self.store
    }

    /// Stop background work and wait for it. In-flight transfers finish;
    /// transfers still waiting for a slot fail and stay pending.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.permit.close();
        self.retry.await?;
        self.ingest.await??;
        tracing::info!("printrelay stopped");
        Ok(())
    }
}

/// Run until Ctrl-C.
pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    let daemon = Daemon::start(config).await?;
    tracing::info!("printrelay running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    daemon.stop().await
}
