//! Command-line interface

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::server::{self, AppState};
use crate::storage::CallStore;

#[derive(Parser)]
#[command(name = "voiceline", version, about = "Real-time voice agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the voice engine server
    Serve {
        /// Bind host (overrides HOST)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print version information
    Version,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    }) {
        Command::Serve { host, port } => {
            let mut config = Config::from_env()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let store = CallStore::open(&config.database_path).await?;
            let state = AppState::new(config, store);
            server::serve(state).await
        }
        Command::Version => {
            println!("{} v{}", crate::NAME, crate::VERSION);
            Ok(())
        }
    }
}
