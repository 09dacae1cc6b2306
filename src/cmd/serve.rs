//! Board server command — `trackr serve`.

use anyhow::Result;

use trackr::board::server::{self, ServerConfig};

pub async fn cmd_serve(config: ServerConfig, init: bool) -> Result<()> {
    if init {
        server::open_database(&config)?;
        println!("Database initialized at {}", config.db_path.display());
        return Ok(());
    }

    server::start_server(config).await
}
