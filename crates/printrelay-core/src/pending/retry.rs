//! Periodic re-delivery of pending records.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::attempt::all_succeeded;
use crate::builder::DeliveryJobBuilder;
use crate::destination::{distinct, Destination};
use crate::error::Result;
use crate::fsutil;

/// Default time between retry passes.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Pause before a crashed retry loop is restarted.
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(5);

/// Re-delivers pending records once one of their destinations is reachable.
pub struct RetryLoop {
    builder: Arc<DeliveryJobBuilder>,
    interval: Duration,
    delete_on_send: bool,
    cooldown: Duration,
}

impl RetryLoop {
    /// Retry loop driven by `builder`, which also owns the pending store.
    pub fn new(builder: Arc<DeliveryJobBuilder>) -> Self {
        Self {
            builder,
            interval: DEFAULT_RECHECK_INTERVAL,
            delete_on_send: true,
            cooldown: RESTART_COOLDOWN,
        }
    }

    /// Override the time between passes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether a fully delivered source file is deleted.
    pub fn delete_on_send(mut self, delete: bool) -> Self {
        self.delete_on_send = delete;
        self
    }

    /// Override the restart cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// One retry pass. Returns the number of records re-delivered.
    ///
    /// Every destination named by any record is probed concurrently. Each
    /// record naming at least one reachable destination is cancelled and then
    /// re-attempted against all of its destinations; whatever fails again is
    /// persisted as a fresh record.
    pub async fn run_pass(&self) -> Result<usize> {
        let store = self.builder.store();
        let records = store.snapshot().await?;
        if records.is_empty() {
            return Ok(0);
        }

        let candidates = distinct(
            records
                .iter()
                .flat_map(|r| r.destinations().iter().cloned()),
        );
        let probes = join_all(candidates.iter().map(|d| d.probe_reachable())).await;
        let reachable: Vec<Arc<Destination>> = candidates
            .into_iter()
            .zip(probes)
            .filter_map(|(d, up)| up.then_some(d))
            .collect();

        if reachable.is_empty() {
            tracing::debug!(
                "No destination reachable for {} pending file(s)",
                records.len()
            );
            return Ok(0);
        }

        let mut retried = 0;
        for record in records.into_iter().filter(|r| r.references_any(&reachable)) {
            let source = record.source();
            match tokio::fs::try_exists(source).await {
                Ok(true) => {}
                Ok(false) => {
                    if store.cancel(&record).await? {
                        tracing::info!(
                            "{} no longer exists, dropping its pending deliveries",
                            source.display()
                        );
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        "Cannot check {}, leaving it pending: {}",
                        source.display(),
                        e
                    );
                    continue;
                }
            }

            // Built before cancelling so a failure leaves the record in place.
            let batch = match self.builder.build_for(source, record.destinations()) {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(
                        "Cannot prepare {} for retry, leaving it pending: {}",
                        source.display(),
                        e
                    );
                    continue;
                }
            };
            if !store.cancel(&record).await? {
                continue;
            }

            tracing::info!(
                "Retrying {} to {} destination(s)",
                source.display(),
                record.destinations().len()
            );
            let attempts = self.builder.send_all(batch).await?;
            retried += 1;

            if all_succeeded(&attempts) && self.delete_on_send {
                tracing::info!("Deleting {}", source.display());
                if let Err(e) = fsutil::delete_file(source) {
                    tracing::error!("Could not delete {}: {}", source.display(), e);
                }
            }
        }

        Ok(retried)
    }

    /// Run passes every interval until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            match self.run_pass().await {
                Ok(0) => {}
                Ok(n) => tracing::info!("Retry pass re-delivered {} file(s)", n),
                Err(e) if e.is_cancelled() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Spawn the loop under a supervisor.
    ///
    /// Errors and panics are logged, and the loop restarts after the cooldown.
    /// The supervisor exits once `shutdown` fires.
    pub fn supervise(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let worker = Arc::clone(&self);
                let token = shutdown.clone();
                let outcome = tokio::spawn(async move { worker.run(token).await }).await;

                match outcome {
                    Ok(Ok(())) => break,
                    Ok(Err(e)) => tracing::error!("Pending retry loop failed: {}", e),
                    Err(e) if e.is_panic() => tracing::error!("Pending retry loop panicked"),
                    Err(e) => tracing::error!("Pending retry loop aborted: {}", e),
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.cooldown) => {
                        tracing::info!("Restarting pending retry loop");
                    }
                }
            }
            tracing::info!("Pending retry loop stopped");
        })
    }
}
