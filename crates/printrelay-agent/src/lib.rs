#![warn(missing_docs)]

//! printrelay agent subsystem: configuration, destination inventory, watch-folder daemon, CLI

pub mod cli;
pub mod config;
pub mod daemon;
pub mod inventory;
pub mod logging;
pub mod scaffold;
pub mod watcher;

pub use config::{AgentConfig, ConfigError};
pub use daemon::Daemon;
pub use inventory::InventoryError;
