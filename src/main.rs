use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cryptofolio::config::Config;
use cryptofolio::{db, server};

#[derive(Parser)]
#[command(name = "cryptofolio")]
#[command(
    version,
    about = "Cryptocurrency portfolio tracker with a REST API and live market data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API server (the default)
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create the database schema
    InitDb {
        /// Database file path (defaults to ~/.cryptofolio/data.db)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cryptofolio=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let mut config = Config::from_env();
            if let Some(port) = port {
                config.port = port;
            }
            server::serve(config).await
        }

        Commands::InitDb { path } => {
            db::init_database(path)?;
            Ok(())
        }
    }
}
