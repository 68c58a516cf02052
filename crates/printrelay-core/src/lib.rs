#![warn(missing_docs)]

//! printrelay dispatch subsystem: destination registry, fan-out delivery, durable pending jobs, retry loop

pub mod attempt;
pub mod builder;
pub mod deliverable;
pub mod destination;
pub mod error;
pub mod fsutil;
pub mod ingest;
pub mod pending;
pub mod permit;
pub mod probe;
pub mod registry;
pub mod transport;

pub use attempt::DeliveryAttempt;
pub use builder::{DeliveryBatch, DeliveryJobBuilder};
pub use deliverable::{ContentDigester, DeliverableFile};
pub use destination::{Destination, DestinationIdentity};
pub use error::{DispatchError, Result};
pub use ingest::{DispatchProcessor, FileProcessor, IngestCoordinator};
pub use pending::{PendingRecord, PendingStore, PendingStoreConfig, RetryLoop};
pub use permit::DeliveryPermit;
pub use probe::{AlwaysReachable, IcmpProbe, ReachabilityProbe};
pub use registry::Registry;
pub use transport::{ProtocolRegistry, Transport, TransportContext};
