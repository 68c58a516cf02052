//! Delivery destinations.
//!
//! A destination is a device on the network that can receive job files. It
//! caches the result of its last reachability probe, re-probes before every
//! delivery, and serializes transfers through the shared [`DeliveryPermit`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::deliverable::DeliverableFile;
use crate::error::{DispatchError, Result};
use crate::permit::DeliveryPermit;
use crate::probe::ReachabilityProbe;
use crate::transport::Transport;

/// Who and how to deliver to. Loaded once from the destination registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationIdentity {
    /// Target class marker that job files declare (e.g. `Ender3`).
    pub class: String,
    /// Host name or IP address.
    pub address: String,
    /// API key or other credential; may be empty.
    pub credential: String,
    /// Protocol variant tag.
    pub protocol: String,
}

/// A device that can receive job files.
pub struct Destination {
    identity: DestinationIdentity,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ReachabilityProbe>,
    permit: DeliveryPermit,
    reachable: AtomicBool,
}

impl Destination {
    /// Create a destination. It starts out as not reachable until first probed.
    pub fn new(
        identity: DestinationIdentity,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn ReachabilityProbe>,
        permit: DeliveryPermit,
    ) -> Self {
        Self {
            identity,
            transport,
            probe,
            permit,
            reachable: AtomicBool::new(false),
        }
    }

    /// Identity this destination was loaded with.
    pub fn identity(&self) -> &DestinationIdentity {
        &self.identity
    }

    /// Network address.
    pub fn address(&self) -> &str {
        &self.identity.address
    }

    /// Target class marker.
    pub fn class(&self) -> &str {
        &self.identity.class
    }

    /// Transport kind, for logs.
    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Result of the most recent probe.
    pub fn last_reachable(&self) -> bool {
        self.reachable.load(Ordering::Relaxed)
    }

    /// Probe the device and cache the result.
    pub async fn probe_reachable(&self) -> bool {
        let reachable = self.probe.probe(&self.identity.address).await;
        self.reachable.store(reachable, Ordering::Relaxed);
        reachable
    }

    /// Deliver `file`, collapsing any failure into `false` after logging it.
    pub async fn deliver(&self, file: &DeliverableFile) -> bool {
        match self.try_deliver(file).await {
            Ok(()) => true,
            Err(DispatchError::NotReachable { address }) => {
                tracing::info!(
                    "{} is not reachable, {} left pending",
                    address,
                    file.path().display()
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    "Delivery of {} to {} failed: {}",
                    file.path().display(),
                    self.identity.address,
                    e
                );
                false
            }
        }
    }

    /// Deliver `file`. Re-probes first and transfers nothing if unreachable.
    ///
    /// The delivery permit is held from the start of the transfer until the
    /// transport's settle delay has passed, success or not.
    pub async fn try_deliver(&self, file: &DeliverableFile) -> Result<()> {
        if !self.probe_reachable().await {
            return Err(DispatchError::NotReachable {
                address: self.identity.address.clone(),
            });
        }

        self.transport.prepare(file).await?;

        let _permit = self.permit.acquire().await?;
        let result = self.transport.transfer(&self.identity, file).await;
        tokio::time::sleep(self.transport.settle_delay()).await;
        result
    }
}

impl PartialEq for Destination {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Destination {}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("class", &self.identity.class)
            .field("address", &self.identity.address)
            .field("protocol", &self.identity.protocol)
            .field("transport", &self.transport.kind())
            .field("reachable", &self.last_reachable())
            .finish()
    }
}

/// First destination in `destinations` with the given address.
pub fn find_by_address<'a>(
    destinations: &'a [Arc<Destination>],
    address: &str,
) -> Option<&'a Arc<Destination>> {
    destinations.iter().find(|d| d.address() == address)
}

/// Destinations with duplicates (by identity) removed, first occurrence kept.
pub fn distinct(destinations: impl IntoIterator<Item = Arc<Destination>>) -> Vec<Arc<Destination>> {
    let mut out: Vec<Arc<Destination>> = Vec::new();
    for destination in destinations {
        if !out.iter().any(|d| d == &destination) {
            out.push(destination);
        }
    }
    out
}
