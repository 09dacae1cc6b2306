use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use trackr::config::{self, CONFIG_FILE, TrackrToml};

mod cmd;

#[derive(Parser)]
#[command(name = "trackr")]
#[command(version, about = "Job application tracker with kanban pipelines")]
pub struct Cli {
    /// Path to the config file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board server
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (permissive CORS for a local front-end dev server)
        #[arg(long)]
        dev: bool,

        /// Initialize the database only (don't start the server)
        #[arg(long)]
        init: bool,
    },
    /// Create a demo user, workspace and default pipeline
    Seed {
        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = TrackrToml::resolve(&cli.config)?;
    config::init_tracing(&settings.logging);

    match cli.command {
        Commands::Serve {
            port,
            db_path,
            dev,
            init,
        } => {
            let mut server = settings.to_server_config();
            if let Some(port) = port {
                server.port = port;
            }
            if let Some(db_path) = db_path {
                server.db_path = db_path;
            }
            server.dev_mode |= dev;
            cmd::cmd_serve(server, init).await?;
        }
        Commands::Seed { db_path } => {
            let db_path = db_path.unwrap_or_else(|| settings.database.path.clone());
            cmd::cmd_seed(&db_path)?;
        }
        Commands::Config { command } => cmd::cmd_config(&cli.config, &settings, command)?,
    }

    Ok(())
}
