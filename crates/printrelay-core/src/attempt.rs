//! One (file, destination) delivery and its outcome.

use std::sync::Arc;

use crate::deliverable::DeliverableFile;
use crate::destination::Destination;

/// A delivery that has been built but not necessarily started.
///
/// Construction is cheap and does no I/O; [`DeliveryAttempt::run`] performs the
/// delivery and records the outcome.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    destination: Arc<Destination>,
    file: Arc<DeliverableFile>,
    outcome: Option<bool>,
}

impl DeliveryAttempt {
    /// Pair `file` with `destination`. Nothing is sent yet.
    pub fn new(destination: Arc<Destination>, file: Arc<DeliverableFile>) -> Self {
        Self {
            destination,
            file,
            outcome: None,
        }
    }

    /// Run the delivery and record the outcome. Running twice re-delivers.
    pub async fn run(mut self) -> Self {
        let delivered = self.destination.deliver(&self.file).await;
        self.outcome = Some(delivered);
        self
    }

    /// Mark the attempt as failed without running it.
    pub fn into_failed(mut self) -> Self {
        self.outcome = Some(false);
        self
    }

    /// Target destination.
    pub fn destination(&self) -> &Arc<Destination> {
        &self.destination
    }

    /// File being delivered.
    pub fn file(&self) -> &Arc<DeliverableFile> {
        &self.file
    }

    /// `None` until run, then whether the file was delivered.
    pub fn outcome(&self) -> Option<bool> {
        self.outcome
    }

    /// True only if the attempt ran and delivered.
    pub fn succeeded(&self) -> bool {
        self.outcome == Some(true)
    }
}

/// True when there is at least one attempt and every one succeeded.
pub fn all_succeeded(attempts: &[DeliveryAttempt]) -> bool {
    !attempts.is_empty() && attempts.iter().all(DeliveryAttempt::succeeded)
}

/// Destinations of the attempts that did not succeed.
pub fn failed_destinations(attempts: &[DeliveryAttempt]) -> Vec<Arc<Destination>> {
    attempts
        .iter()
        .filter(|a| !a.succeeded())
        .map(|a| Arc::clone(a.destination()))
        .collect()
}
