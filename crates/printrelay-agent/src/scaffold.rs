//! First-run scaffolding for `printrelay init`.

use std::path::{Path, PathBuf};

use crate::config::{AgentConfig, CONFIG_FILE};
use crate::inventory::CSV_HEADER;

const TRANSFER_TOOL: &str = if cfg!(windows) { "curl.exe" } else { "curl" };

/// Example destination rows, one per built-in upload style.
pub fn example_destinations() -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    out.push_str("Ender3,printer.example.lan,12345abc,octoprint\n");
    out.push_str("ECC,ecc.example.lan,,openCentauriCarbon\n");
    out.push_str("SovolZero,192.168.0.1,,moonraker\n");
    out
}

/// Example command templates as `(protocol tag, template)`.
pub fn example_templates() -> Vec<(&'static str, String)> {
    vec![
        (
            "octoprint",
            format!(
                "{} -k -H \"X-Api-Key: [ApiKey]\" -F \"select=false\" -F \"print=false\" -F \"file=@[FilePath]\" \"http://[NetworkAddress]/api/files/local\"",
                TRANSFER_TOOL
            ),
        ),
        (
            "moonraker",
            format!(
                "{} -F \"file=@[FilePath]\" \"http://[NetworkAddress]:7125/server/files/upload\"",
                TRANSFER_TOOL
            ),
        ),
    ]
}

fn config_text() -> anyhow::Result<String> {
    let header = "\
# printrelay configuration
# Relative paths are resolved against the directory holding this file.
# archive_path, when set, must be absolute; every detected file is copied there.

";
    Ok(format!("{}{}", header, AgentConfig::default().to_toml()?))
}

fn write_if_absent(path: &Path, contents: &str, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        tracing::debug!("Keeping existing {}", path.display());
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(true)
}

/// Write the default configuration, an example destinations file and the
/// example templates under `dir`. Existing files are kept unless `force`.
/// Returns the paths written.
pub fn write_defaults(dir: &Path, force: bool) -> anyhow::Result<Vec<PathBuf>> {
    let defaults = AgentConfig::default();
    let mut files = vec![
        (dir.join(CONFIG_FILE), config_text()?),
        (dir.join(&defaults.destinations_csv), example_destinations()),
    ];
    for (tag, template) in example_templates() {
        files.push((
            dir.join(&defaults.templates_dir).join(format!("{}.txt", tag)),
            format!("{}\n", template),
        ));
    }

    let mut written = Vec::new();
    for (path, contents) in files {
        if write_if_absent(&path, &contents, force)? {
            written.push(path);
        }
    }

    for sub in [&defaults.watch_path, &defaults.pending_dir] {
        std::fs::create_dir_all(dir.join(sub))?;
    }
    Ok(written)
}
