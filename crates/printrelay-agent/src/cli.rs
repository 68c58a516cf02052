use crate::config::{AgentConfig, CONFIG_FILE};
use crate::{daemon, scaffold};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line of the `printrelay` binary.
#[derive(Parser)]
#[command(name = "printrelay")]
#[command(about = "Delivers sliced job files from a watch folder to network printers", long_about = None)]
pub struct Cli {
    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Watch the configured folder and deliver job files.
    Run {
        /// Configuration file (`.toml` or `.json`).
        #[arg(short, long, default_value = CONFIG_FILE, env = "PRINTRELAY_CONFIG")]
        config: PathBuf,
    },
    /// Write an example configuration, destinations file and templates.
    Init {
        /// Directory to write into.
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Execute the parsed command.
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Run { ref config } => {
                let loaded = AgentConfig::from_file(config)?;
                daemon::run(loaded).await
            }
            Command::Init { ref dir, force } => {
                let written = scaffold::write_defaults(dir, force)?;
                for path in &written {
                    tracing::info!("Created {}", path.display());
                }
                if written.is_empty() {
                    tracing::info!("Nothing to do, {} is already set up", dir.display());
                } else {
                    tracing::info!("Edit the destinations file and templates, then start `printrelay run`");
                }
                Ok(())
            }
        }
    }
}
