//! Demo data command — `trackr seed`.

use anyhow::Result;
use std::path::Path;

use trackr::board::server::{self, ServerConfig};

pub const SEED_EMAIL: &str = "seed@trackr.dev";

pub fn cmd_seed(db_path: &Path) -> Result<()> {
    let db = server::open_database(&ServerConfig {
        db_path: db_path.to_path_buf(),
        ..ServerConfig::default()
    })?;

    if let Some(user) = db.find_user_by_email(SEED_EMAIL)? {
        println!("Already seeded: user {} ({})", user.id, SEED_EMAIL);
        return Ok(());
    }

    let user = db.create_user(SEED_EMAIL, Some("Seed User"))?;
    let workspace = db.create_workspace(&user.id, "Personal")?;
    let pipeline = db.create_pipeline(&workspace.id, "Default", true, true)?;
    let stages = db.list_stages(&pipeline.id)?;
    tracing::info!(user_id = %user.id, workspace_id = %workspace.id, "seeded database");

    println!("Seeded {}", db_path.display());
    println!("  user:      {} ({})", user.id, SEED_EMAIL);
    println!("  workspace: {} ({})", workspace.id, workspace.name);
    println!("  pipeline:  {} ({})", pipeline.id, pipeline.name);
    let names: Vec<&str> = stages.iter().map(|s| s.name.as_str()).collect();
    println!("  stages:    {}", names.join(", "));
    Ok(())
}
