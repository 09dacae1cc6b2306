//! Configuration view and validation commands — `trackr config`.

use anyhow::Result;
use std::path::Path;

use trackr::config::TrackrToml;

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: &Path,
    effective: &TrackrToml,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Trackr Configuration");
            println!("====================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", effective.to_toml_string()?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = effective.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
                anyhow::bail!("{} configuration warning(s)", warnings.len());
            }
        }
    }
    Ok(())
}
