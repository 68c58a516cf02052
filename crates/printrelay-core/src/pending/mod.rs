//! Deliveries that did not complete.
//!
//! Every destination a file failed to reach is written down as a pending
//! record, both in memory and as a `.pend` file so it survives restarts. The
//! [`RetryLoop`] periodically re-delivers records once a destination answers.

pub mod record;
pub mod retry;
pub mod store;

pub use record::{PendingRecord, RECORD_EXTENSION};
pub use retry::RetryLoop;
pub use store::{PendingStore, PendingStoreConfig};
