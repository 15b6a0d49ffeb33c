//! Configuration view and validation commands: `stageboard config`.

use std::path::Path;

use anyhow::Result;
use stageboard::config::{CONFIG_DIR, CONFIG_FILE, StageboardToml};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Stageboard Configuration");
            println!("========================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                StageboardToml::load(&config_path)?
            } else {
                println!("No stageboard.toml found at {}", config_path.display());
                println!("Using default configuration.");
                StageboardToml::default()
            };
            println!();
            print_toml(&toml)?;

            println!("Effective values (with env overrides):");
            println!("  port = {}", toml.port());
            println!("  db_path = \"{}\"", toml.db_path().display());
            println!("  log_level = \"{}\"", toml.log_level());
            println!("  log_json = {}", toml.log_json());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No stageboard.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = StageboardToml::load(&config_path)?;
            let problems = toml.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                println!();
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("stageboard.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config_dir)?;
            StageboardToml::with_presets().save(&config_path)?;

            println!("Created stageboard.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] port, host, dev_mode");
            println!("  - [storage] backend, db_path");
            println!("  - [pipelines.<name>] stage_field, value_field, default_stages");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &StageboardToml) -> Result<()> {
    println!("[server]");
    println!("  port = {}", toml.server.port);
    println!("  host = \"{}\"", toml.server.host);
    println!("  dev_mode = {}", toml.server.dev_mode);
    println!();

    println!("[storage]");
    println!("  backend = \"{}\"", toml.storage.backend);
    println!("  db_path = \"{}\"", toml.storage.db_path.display());
    println!();

    println!("[engine]");
    println!("  persist_timeout_ms = {}", toml.engine.persist_timeout_ms);
    println!();

    println!("Pipelines:");
    if toml.pipelines.is_empty() {
        println!("  (none configured; built-in presets apply)");
    }
    for (binding, seeds) in toml.pipelines()? {
        let value = binding.value_field.as_deref().unwrap_or("-");
        println!(
            "  {:<12} stage_field = {:<18} value_field = {:<18} {} default stage(s)",
            binding.pipeline.as_str(),
            binding.stage_field,
            value,
            seeds.len()
        );
    }
    println!();
    Ok(())
}
