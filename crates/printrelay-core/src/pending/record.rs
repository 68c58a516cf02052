//! Durable record of a file still owed to some destinations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::destination::Destination;

/// Extension of durable pending records.
pub const RECORD_EXTENSION: &str = "pend";

/// A source file plus the non-empty set of destinations still owed a delivery.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    source: PathBuf,
    record_path: PathBuf,
    destinations: Vec<Arc<Destination>>,
}

impl PendingRecord {
    /// Build a record stored under `pending_dir`. Returns `None` when
    /// `destinations` is empty.
    pub fn new(
        source: impl Into<PathBuf>,
        pending_dir: &Path,
        destinations: Vec<Arc<Destination>>,
    ) -> Option<Self> {
        if destinations.is_empty() {
            return None;
        }
        let source = source.into();
        let record_path = record_path_for(pending_dir, &source);
        Some(Self {
            source,
            record_path,
            destinations,
        })
    }

    /// The file still owed.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Where the durable copy lives.
    pub fn record_path(&self) -> &Path {
        &self.record_path
    }

    /// Destinations still owed a delivery. Never empty.
    pub fn destinations(&self) -> &[Arc<Destination>] {
        &self.destinations
    }

    /// True if any of this record's destinations is in `reachable`.
    pub fn references_any(&self, reachable: &[Arc<Destination>]) -> bool {
        self.destinations
            .iter()
            .any(|d| reachable.iter().any(|r| r == d))
    }

    /// True if this record is for `path`, compared by file stem.
    pub fn is_for(&self, path: &Path) -> bool {
        self.source.file_stem().is_some() && self.source.file_stem() == path.file_stem()
    }

    /// Durable form: one address per line, each line terminated by `\n`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for destination in &self.destinations {
            out.push_str(destination.address());
            out.push('\n');
        }
        out
    }
}

impl PartialEq for PendingRecord {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.record_path == other.record_path
            && self.destinations == other.destinations
    }
}

/// `<pending_dir>/<source stem>.pend`
pub fn record_path_for(pending_dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    pending_dir.join(format!("{}.{}", stem, RECORD_EXTENSION))
}

/// Parse the addresses out of a durable record, skipping blank lines.
pub fn parse_addresses(contents: &str) -> Vec<String> {
    contents
        .trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_path_uses_stem() {
        let path = record_path_for(Path::new("/var/pending"), Path::new("/watch/benchy.gcode"));
        assert_eq!(path, PathBuf::from("/var/pending/benchy.pend"));
    }

    #[test]
    fn test_empty_destinations_rejected() {
        assert!(PendingRecord::new("/watch/a.gcode", Path::new("/p"), Vec::new()).is_none());
    }

    #[test]
    fn test_parse_addresses_skips_blanks_and_bom() {
        let parsed = parse_addresses("\u{feff}10.0.0.1\n\n  printer.lan \r\n");
        assert_eq!(parsed, vec!["10.0.0.1".to_string(), "printer.lan".to_string()]);
    }
}
