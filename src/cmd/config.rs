//! Configuration view and scaffolding: `shipyard config`.

use anyhow::{Context, Result};
use shipyard::config::{CONFIG_FILE_NAME, ShipyardConfig};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(config: &ShipyardConfig, command: Option<ConfigCommands>) -> Result<bool> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Shipyard Configuration");
            println!("======================");
            println!();
            match &config.source {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No {} found, using defaults", CONFIG_FILE_NAME),
            }
            println!("Effective values (with environment overrides):");
            println!();
            println!("{}", config.to_masked_toml()?);
        }
        Some(ConfigCommands::Init { force }) => {
            let path = Path::new(CONFIG_FILE_NAME);
            if path.exists() && !force {
                println!("{} already exists.", CONFIG_FILE_NAME);
                println!("Use --force to overwrite it.");
                return Ok(false);
            }

            std::fs::write(path, ShipyardConfig::default_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;

            println!("Created {}", CONFIG_FILE_NAME);
            println!();
            println!("You can now customize:");
            println!("  - [database] url, schema");
            println!("  - [ssh] timeouts and default user");
            println!("  - [functions] runtime, memory and batch size");
            println!();
            println!("Secrets are best kept in the environment or a .env file.");
        }
    }

    Ok(true)
}
