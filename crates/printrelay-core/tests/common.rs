//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use printrelay_core::{
    DeliverableFile, DeliveryJobBuilder, DeliveryPermit, Destination, DestinationIdentity,
    DispatchError, PendingStore, PendingStoreConfig, ReachabilityProbe, Result, Transport,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Probe answering from a mutable set of reachable addresses.
#[derive(Default)]
pub struct SwitchProbe {
    up: Mutex<HashSet<String>>,
}

impl SwitchProbe {
    pub fn with_up(addresses: &[&str]) -> Arc<Self> {
        let probe = Self::default();
        for a in addresses {
            probe.set(a, true);
        }
        Arc::new(probe)
    }

    pub fn set(&self, address: &str, up: bool) {
        let mut set = self.up.lock().unwrap();
        if up {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }
}

#[async_trait]
impl ReachabilityProbe for SwitchProbe {
    async fn probe(&self, address: &str) -> bool {
        self.up.lock().unwrap().contains(address)
    }
}

/// One transfer as seen by [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct Transfer {
    pub address: String,
    pub file: PathBuf,
    pub started: Instant,
    pub finished: Instant,
}

/// Transport that records every transfer and fails for chosen addresses.
#[derive(Default)]
pub struct FakeTransport {
    failing: Mutex<HashSet<String>>,
    transfers: Mutex<Vec<Transfer>>,
    hold: Duration,
    settle: Duration,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transfers take `hold` and are followed by `settle`.
    pub fn timed(hold: Duration, settle: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            settle,
            ..Self::default()
        })
    }

    pub fn fail(&self, address: &str, fail: bool) {
        let mut set = self.failing.lock().unwrap();
        if fail {
            set.insert(address.to_string());
        } else {
            set.remove(address);
        }
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = self.transfers().into_iter().map(|t| t.address).collect();
        out.sort();
        out
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> &'static str {
        "fake"
    }

    fn settle_delay(&self) -> Duration {
        self.settle
    }

    async fn transfer(&self, target: &DestinationIdentity, file: &DeliverableFile) -> Result<()> {
        let started = Instant::now();
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.transfers.lock().unwrap().push(Transfer {
            address: target.address.clone(),
            file: file.path().to_path_buf(),
            started,
            finished: Instant::now(),
        });

        if self.failing.lock().unwrap().contains(&target.address) {
            return Err(DispatchError::TransferFailed {
                address: target.address.clone(),
                reason: "rejected by fake device".to_string(),
            });
        }
        Ok(())
    }
}

/// Temporary watch and pending directories.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub watch: PathBuf,
    pub pending: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let watch = dir.path().join("watch");
        let pending = dir.path().join("pending");
        std::fs::create_dir_all(&watch).unwrap();
        std::fs::create_dir_all(&pending).unwrap();
        Self { dir, watch, pending }
    }

    /// Write a source file targeting `class`.
    pub fn source(&self, name: &str, class: &str) -> PathBuf {
        let path = self.watch.join(name);
        std::fs::write(&path, format!(";Sliced for {}\nG28\nG1 X10 Y10\n", class)).unwrap();
        path
    }

    pub fn store(&self, destinations: &Arc<[Arc<Destination>]>) -> Arc<PendingStore> {
        Arc::new(PendingStore::new(
            PendingStoreConfig {
                pending_dir: self.pending.clone(),
                watch_dir: self.watch.clone(),
                source_extension: "gcode".to_string(),
            },
            Arc::clone(destinations),
            CancellationToken::new(),
        ))
    }

    pub fn builder(&self, destinations: &Arc<[Arc<Destination>]>) -> Arc<DeliveryJobBuilder> {
        Arc::new(DeliveryJobBuilder::new(
            Arc::clone(destinations),
            self.store(destinations),
        ))
    }

    pub fn record_contents(&self, stem: &str) -> Option<String> {
        std::fs::read_to_string(self.pending.join(format!("{}.pend", stem))).ok()
    }
}

/// Destinations of class `class` at each address, sharing one transport,
/// probe and permit.
pub fn destinations(
    class: &str,
    addresses: &[&str],
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ReachabilityProbe>,
    permit: DeliveryPermit,
) -> Arc<[Arc<Destination>]> {
    addresses
        .iter()
        .map(|address| {
            Arc::new(Destination::new(
                DestinationIdentity {
                    class: class.to_string(),
                    address: address.to_string(),
                    credential: String::new(),
                    protocol: "fake".to_string(),
                },
                Arc::clone(&transport),
                Arc::clone(&probe),
                permit.clone(),
            ))
        })
        .collect()
}
