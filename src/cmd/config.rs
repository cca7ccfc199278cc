//! Configuration view and validation commands — `taskboard config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use taskboard::config::{BOARD_DIR, CONFIG_FILE, TaskboardConfig, TaskboardToml};

    let board_dir = project_dir.join(BOARD_DIR);
    let config_path = board_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Taskboard Configuration");
            println!("=======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                TaskboardToml::load(&config_path)?
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
                TaskboardToml::default()
            };
            println!();
            print_toml(&toml);

            println!("Effective values (with env/CLI overrides):");
            let config = TaskboardConfig::new(project_dir.to_path_buf())?;
            println!("  port = {}", config.port()?);
            println!("  db_path = \"{}\"", config.db_path().display());
            println!();

            if !config_path.exists() {
                println!("Run 'taskboard config init' to create a {} file.", CONFIG_FILE);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = TaskboardToml::load(&config_path)?;
            let warnings = toml.validate();

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
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !board_dir.exists() {
                std::fs::create_dir_all(&board_dir)?;
            }

            TaskboardToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] port, db_path, dev");
            println!("  - [autosave] debounce_ms, grace_window_ms");
            println!("  - [logging] filter, json");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &taskboard::config::TaskboardToml) {
    println!("[server]");
    println!("  port = {}", toml.server.port);
    println!("  db_path = \"{}\"", toml.server.db_path.display());
    println!("  dev = {}", toml.server.dev);
    println!();
    println!("[autosave]");
    println!("  debounce_ms = {}", toml.autosave.debounce_ms);
    println!("  grace_window_ms = {}", toml.autosave.grace_window_ms);
    println!();
    println!("[logging]");
    println!("  filter = \"{}\"", toml.logging.filter);
    println!("  json = {}", toml.logging.json);
    println!();
}
