//! Agent configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "printrelay.toml";

/// A configuration value that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `watch_path` is empty.
    #[error("watch_path must not be empty")]
    EmptyWatchPath,
    /// `recheck_interval_secs` is zero.
    #[error("recheck_interval_secs must be greater than zero")]
    ZeroRecheckInterval,
    /// `delivery_concurrency` is zero.
    #[error("delivery_concurrency must be greater than zero")]
    ZeroConcurrency,
    /// `archive_path` is set but relative.
    #[error("archive_path must be an absolute path: {0}")]
    RelativeArchivePath(PathBuf),
    /// `marker_prefix` is empty.
    #[error("marker_prefix must not be empty")]
    EmptyMarkerPrefix,
}

/// Settings for the watch-folder daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Directory watched for new job files.
    pub watch_path: PathBuf,
    /// Absolute directory every detected file is copied to, if set.
    pub archive_path: Option<PathBuf>,
    /// Directory holding pending delivery records.
    pub pending_dir: PathBuf,
    /// Directory holding `<protocol>.txt` upload command templates.
    pub templates_dir: PathBuf,
    /// Destination inventory.
    pub destinations_csv: PathBuf,
    /// Delete a file once every destination has it.
    pub delete_on_send: bool,
    /// Log file written when `log_file_enabled` is set.
    pub log_path: PathBuf,
    /// Also log to `log_path`.
    pub log_file_enabled: bool,
    /// Seconds between pending retry passes.
    pub recheck_interval_secs: u64,
    /// Quiet period after the last change before files are processed.
    pub debounce_ms: u64,
    /// Prefix of the line declaring a job's target class.
    pub marker_prefix: String,
    /// Extension of job files, without the dot.
    pub source_extension: String,
    /// Transfers allowed to run at once across all destinations.
    pub delivery_concurrency: usize,
    /// Seconds to wait for a locked job file.
    pub unlock_timeout_secs: u64,
    /// Treat every destination as reachable.
    pub debug_always_reachable: bool,
    /// Log transfers instead of performing them.
    pub debug_dry_run: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            watch_path: PathBuf::from("sliced"),
            archive_path: None,
            pending_dir: PathBuf::from("pending"),
            templates_dir: PathBuf::from("templates"),
            destinations_csv: PathBuf::from("destinations.csv"),
            delete_on_send: true,
            log_path: PathBuf::from("printrelay.log"),
            log_file_enabled: true,
            recheck_interval_secs: 30,
            debounce_ms: 5000,
            marker_prefix: String::from(";Sliced for"),
            source_extension: String::from("gcode"),
            delivery_concurrency: 1,
            unlock_timeout_secs: 30,
            debug_always_reachable: false,
            debug_dry_run: false,
        }
    }
}

impl AgentConfig {
    /// Load from a `.toml` or `.json` file, resolve relative paths against the
    /// file's directory and validate.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: AgentConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let config = config.resolved_against(base);
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the daemon misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyWatchPath);
        }
        if self.recheck_interval_secs == 0 {
            return Err(ConfigError::ZeroRecheckInterval);
        }
        if self.delivery_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.marker_prefix.trim().is_empty() {
            return Err(ConfigError::EmptyMarkerPrefix);
        }
        if let Some(archive) = &self.archive_path {
            if !archive.is_absolute() {
                return Err(ConfigError::RelativeArchivePath(archive.clone()));
            }
        }
        Ok(())
    }

    /// Copy with every relative directory joined onto `base`.
    ///
    /// An empty `archive_path` is treated as unset. The archive path itself is
    /// never resolved, it must already be absolute.
    pub fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |p: &Path| {
            if p.is_absolute() || p.as_os_str().is_empty() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        self.watch_path = resolve(&self.watch_path);
        self.pending_dir = resolve(&self.pending_dir);
        self.templates_dir = resolve(&self.templates_dir);
        self.destinations_csv = resolve(&self.destinations_csv);
        self.log_path = resolve(&self.log_path);
        self.archive_path = self.archive_path.filter(|p| !p.as_os_str().is_empty());
        self
    }

    /// Time between retry passes.
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    /// Debounce period.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Lock wait bound.
    pub fn unlock_timeout(&self) -> Duration {
        Duration::from_secs(self.unlock_timeout_secs)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
