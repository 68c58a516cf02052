use anyhow::Result;
use clap::Parser;
use printrelay_agent::cli::{Cli, Command};
use printrelay_agent::{logging, AgentConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The file layer needs the config, so load it before installing the subscriber.
    match &cli.command {
        Command::Run { config } => {
            let loaded = AgentConfig::from_file(config)?;
            let log_file = loaded.log_file_enabled.then_some(loaded.log_path.as_path());
            logging::init(log_file)?;
            tracing::info!("printrelay starting with {}", config.display());
            printrelay_agent::daemon::run(loaded).await
        }
        Command::Init { .. } => {
            logging::init(None)?;
            cli.run().await
        }
    }
}
