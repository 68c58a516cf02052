//! Destination inventory loading.
//!
//! Destinations come from a CSV file with the header
//! `MachineType,NetworkAddress,ApiKey,NetworkType`. Rows whose `NetworkType`
//! has a dedicated transport use it; all others upload through the command
//! template in `<templates_dir>/<NetworkType>.txt`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use printrelay_core::{
    AlwaysReachable, DeliveryPermit, Destination, DestinationIdentity, IcmpProbe,
    ProtocolRegistry, ReachabilityProbe, TransportContext,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header of the destinations file.
pub const CSV_HEADER: &str = "MachineType,NetworkAddress,ApiKey,NetworkType";

/// Extension of upload command templates.
pub const TEMPLATE_EXTENSION: &str = "txt";

/// Errors loading the destination inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The CSV could not be read or parsed.
    #[error("destinations file {path}: {source}")]
    Csv {
        /// Path of the CSV file.
        path: PathBuf,
        /// Parser failure.
        #[source]
        source: csv::Error,
    },
    /// The CSV has no rows.
    #[error("no destinations found in {0}, add some and restart")]
    Empty(PathBuf),
    /// Two rows share a network address. Pending records identify
    /// destinations by address alone.
    #[error("destinations file {path} lists {address} more than once")]
    DuplicateAddress {
        /// Path of the CSV file.
        path: PathBuf,
        /// Repeated address.
        address: String,
    },
}

/// One row of the destinations file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRow {
    /// Target class job files declare.
    #[serde(rename = "MachineType")]
    pub machine_type: String,
    /// Host name or IP address.
    #[serde(rename = "NetworkAddress")]
    pub network_address: String,
    /// API key, may be empty.
    #[serde(rename = "ApiKey", default)]
    pub api_key: String,
    /// Protocol tag.
    #[serde(rename = "NetworkType")]
    pub network_type: String,
}

impl From<DestinationRow> for DestinationIdentity {
    fn from(row: DestinationRow) -> Self {
        DestinationIdentity {
            class: row.machine_type,
            address: row.network_address,
            credential: row.api_key,
            protocol: row.network_type,
        }
    }
}

/// Options applied to every loaded destination.
#[derive(Debug, Clone)]
pub struct InventoryOptions {
    /// Directory holding command templates.
    pub templates_dir: PathBuf,
    /// Shared transfer limit.
    pub permit: DeliveryPermit,
    /// Skip ICMP and treat every destination as reachable.
    pub always_reachable: bool,
    /// Log transfers instead of performing them.
    pub dry_run: bool,
}

/// Parse the destinations file.
pub fn read_rows(path: &Path) -> Result<Vec<DestinationRow>, InventoryError> {
    let csv_err = |source| InventoryError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: DestinationRow = record.map_err(csv_err)?;
        if row.network_address.is_empty() {
            tracing::warn!("Skipping {} row with no address", row.machine_type);
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// First line of `<templates_dir>/<tag>.txt`, if present.
pub fn read_template(templates_dir: &Path, tag: &str) -> Option<String> {
    let path = templates_dir.join(format!("{}.{}", tag, TEMPLATE_EXTENSION));
    match std::fs::read_to_string(&path) {
        Ok(contents) => contents
            .trim_start_matches('\u{feff}')
            .lines()
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string),
        Err(e) => {
            tracing::warn!(
                "Unable to read upload command for {} at {}: {}",
                tag,
                path.display(),
                e
            );
            None
        }
    }
}

/// Build destinations from parsed rows.
pub fn build_destinations(
    rows: Vec<DestinationRow>,
    protocols: &ProtocolRegistry,
    options: &InventoryOptions,
) -> Vec<Arc<Destination>> {
    let probe: Arc<dyn ReachabilityProbe> = if options.always_reachable {
        tracing::warn!("DEBUG every destination is treated as reachable");
        Arc::new(AlwaysReachable)
    } else {
        Arc::new(IcmpProbe::default())
    };

    let mut templates: HashMap<String, Option<String>> = HashMap::new();
    rows.into_iter()
        .map(|row| {
            let identity = DestinationIdentity::from(row);
            let template = if protocols.needs_template(&identity.protocol) {
                templates
                    .entry(identity.protocol.clone())
                    .or_insert_with(|| read_template(&options.templates_dir, &identity.protocol))
                    .clone()
            } else {
                None
            };

            let transport = protocols.build(&TransportContext {
                identity: &identity,
                template: template.as_deref(),
                dry_run: options.dry_run,
            });

            tracing::info!(
                "Loaded destination {} ({}) via {}",
                identity.address,
                identity.class,
                transport.kind()
            );
            Arc::new(Destination::new(
                identity,
                transport,
                Arc::clone(&probe),
                options.permit.clone(),
            ))
        })
        .collect()
}

/// Read the destinations file and build every destination it lists.
pub fn load(
    path: &Path,
    protocols: &ProtocolRegistry,
    options: &InventoryOptions,
) -> Result<Vec<Arc<Destination>>, InventoryError> {
    let rows = read_rows(path)?;
    if rows.is_empty() {
        return Err(InventoryError::Empty(path.to_path_buf()));
    }
    let mut seen = HashSet::new();
    if let Some(row) = rows.iter().find(|r| !seen.insert(r.network_address.as_str())) {
        return Err(InventoryError::DuplicateAddress {
            path: path.to_path_buf(),
            address: row.network_address.clone(),
        });
    }
    let destinations = build_destinations(rows, protocols, options);
    tracing::info!("Found {} destinations", destinations.len());
    Ok(destinations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(dir: &Path) -> InventoryOptions {
        InventoryOptions {
            templates_dir: dir.join("templates"),
            permit: DeliveryPermit::default(),
            always_reachable: true,
            dry_run: true,
        }
    }

    #[test]
    fn test_read_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("destinations.csv");
        std::fs::write(
            &path,
            format!(
                "{}\nEnder3, printer.lan ,12345abc,octoprint\nECC,ecc.lan,,openCentauriCarbon\nBroken,,,octoprint\n",
                CSV_HEADER
            ),
        )
        .unwrap();

        let rows = read_rows(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].network_address, "printer.lan");
        assert_eq!(rows[0].api_key, "12345abc");
        assert_eq!(rows[1].api_key, "");
        assert_eq!(rows[1].network_type, "openCentauriCarbon");
    }

    #[test]
    fn test_load_empty_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("destinations.csv");
        std::fs::write(&path, format!("{}\n", CSV_HEADER)).unwrap();

        let result = load(&path, &ProtocolRegistry::default(), &options(dir.path()));
        assert!(matches!(result, Err(InventoryError::Empty(_))));
    }

    #[test]
    fn test_duplicate_address_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("destinations.csv");
        std::fs::write(
            &path,
            format!(
                "{}\nEnder3,printer.lan,,octoprint\nVoron,printer.lan,,octoprint\n",
                CSV_HEADER
            ),
        )
        .unwrap();

        match load(&path, &ProtocolRegistry::default(), &options(dir.path())) {
            Err(InventoryError::DuplicateAddress { address, .. }) => {
                assert_eq!(address, "printer.lan")
            }
            other => panic!("expected duplicate address error, got {:?}", other.map(|d| d.len())),
        }
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load(
            &dir.path().join("absent.csv"),
            &ProtocolRegistry::default(),
            &options(dir.path()),
        );
        assert!(matches!(result, Err(InventoryError::Csv { .. })));
    }

    #[test]
    fn test_template_first_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("moonraker.txt"),
            "\u{feff}curl -F \"file=@[FilePath]\" http://[NetworkAddress]:7125/server/files/upload\nignored\n",
        )
        .unwrap();

        let template = read_template(dir.path(), "moonraker").unwrap();
        assert!(template.starts_with("curl -F"));
        assert!(!template.contains("ignored"));
        assert!(read_template(dir.path(), "octoprint").is_none());
    }

    #[test]
    fn test_transports_follow_protocol_tag() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            DestinationRow {
                machine_type: "Ender3".to_string(),
                network_address: "printer.lan".to_string(),
                api_key: "key".to_string(),
                network_type: "octoprint".to_string(),
            },
            DestinationRow {
                machine_type: "ECC".to_string(),
                network_address: "ecc.lan".to_string(),
                api_key: String::new(),
                network_type: "OPENCENTAURICARBON".to_string(),
            },
        ];

        let destinations =
            build_destinations(rows, &ProtocolRegistry::default(), &options(dir.path()));
        assert_eq!(destinations.len(), 2);
        assert_eq!(destinations[0].transport_kind(), "command");
        assert_eq!(destinations[1].transport_kind(), "chunked-http");
        assert_eq!(destinations[0].class(), "Ender3");
    }
}
