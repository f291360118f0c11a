//! Configuration view and validation commands (`opshub config`).

use std::path::Path;

use anyhow::Result;
use opshub::config::{CONFIG_DIR, CONFIG_FILE, HubToml};

use super::super::ConfigCommands;
use crate::Cli;

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config = super::load_config(cli, project_dir)?;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("opshub configuration");
            println!("====================");
            println!();
            match &config.source {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("No opshub.toml found. Using defaults."),
            }
            println!();

            let socket = &config.toml.socket;
            println!("[api]");
            println!("  url = \"{}\"", config.api_url());
            println!();
            println!("[socket]");
            println!("  url = \"{}\"", config.socket_url());
            println!("  reconnection_attempts = {}", socket.reconnection_attempts);
            println!("  reconnect_delay_ms = {}", socket.reconnect_delay_ms);
            println!("  reconnect_delay_max_ms = {}", socket.reconnect_delay_max_ms);
            println!("  connect_timeout_ms = {}", socket.connect_timeout_ms);
            println!();
            println!("[storage]");
            println!(
                "  url = {}",
                config
                    .storage_url()
                    .map(|u| format!("\"{}\"", u))
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  anon_key = {}",
                if config.storage_key().is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!("  bucket = \"{}\"", config.storage_bucket());
            println!();
            println!(
                "token: {}",
                if config.token().is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            let config_path = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                println!("opshub.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            HubToml::default().save(&config_path)?;

            println!("Created opshub.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [api] url");
            println!("  - [socket] url and reconnect settings");
            println!("  - [storage] url, anon_key, bucket");
            println!();
        }
    }

    Ok(())
}
