//! Project initialization — `taskboard init`.

use anyhow::{Context, Result};

use taskboard::board::db::BoardDb;
use taskboard::config::{BOARD_DIR, CONFIG_FILE, TaskboardConfig, TaskboardToml};

pub fn cmd_init(project_dir: &std::path::Path) -> Result<()> {
    let board_dir = project_dir.join(BOARD_DIR);
    let was_initialized = board_dir.join(CONFIG_FILE).exists();

    std::fs::create_dir_all(&board_dir)
        .with_context(|| format!("Failed to create {}", board_dir.display()))?;

    let config_path = board_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        TaskboardToml::default().save(&config_path)?;
    }

    let config = TaskboardConfig::new(project_dir.to_path_buf())?;
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    BoardDb::new(&db_path).context("Failed to initialize board database")?;

    if was_initialized {
        println!(
            "Taskboard already initialized at {}",
            config.board_dir.display()
        );
        println!("Database verified at {}", db_path.display());
    } else {
        println!("Initialized taskboard at {}", config.board_dir.display());
        println!();
        println!("Created:");
        println!("  {}/", BOARD_DIR);
        println!("  ├── {}  # server, autosave and logging settings", CONFIG_FILE);
        println!("  └── board.db        # SQLite database");
        println!();
        println!("Next: run `taskboard serve` and open http://localhost:{}", config.port()?);
    }

    Ok(())
}
