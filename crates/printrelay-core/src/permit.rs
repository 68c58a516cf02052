//! Process-wide delivery permit.
//!
//! Every transfer, across all destinations and all files, holds one permit
//! from the moment it starts until its settle delay has elapsed. The default
//! capacity of one serializes all transfers.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{DispatchError, Result};

/// Default number of transfers allowed in flight at once.
pub const DEFAULT_DELIVERY_CONCURRENCY: usize = 1;

/// Shared limiter bounding simultaneous transfers.
#[derive(Debug, Clone)]
pub struct DeliveryPermit {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl Default for DeliveryPermit {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY_CONCURRENCY)
    }
}

impl DeliveryPermit {
    /// Create a limiter with `capacity` slots. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. The slot is returned when the permit is dropped.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Cancelled)
    }

    /// Stop handing out slots. Waiters and later callers get `Cancelled`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Configured number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
