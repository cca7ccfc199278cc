//! Configuration for the task board, read from `.taskboard/taskboard.toml`.
//!
//! Every section is optional and falls back to defaults. Values are layered
//! file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 3141
//! db_path = ".taskboard/board.db"
//! dev = false
//!
//! [autosave]
//! debounce_ms = 500
//! grace_window_ms = 2000
//!
//! [logging]
//! filter = "info"
//! json = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::autosave::AutosaveConfig;

/// Directory holding config and database, relative to the project dir.
pub const BOARD_DIR: &str = ".taskboard";

/// Config file name inside [`BOARD_DIR`].
pub const CONFIG_FILE: &str = "taskboard.toml";

/// Environment variable that overrides `[server] port`.
pub const PORT_ENV: &str = "TASKBOARD_PORT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database path, relative to the project dir unless absolute.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS and bind on all interfaces.
    #[serde(default)]
    pub dev: bool,
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(BOARD_DIR).join("board.db")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveSection {
    /// Delay after the last keystroke before a save is issued.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long after a local edit remote pushes are ignored.
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: u64,
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_grace_window_ms() -> u64 {
    2000
}

impl Default for AutosaveSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            grace_window_ms: default_grace_window_ms(),
        }
    }
}

impl AutosaveSection {
    pub fn to_autosave_config(&self) -> AutosaveConfig {
        AutosaveConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            grace_window: Duration::from_millis(self.grace_window_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

/// The complete taskboard.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskboardToml {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub autosave: AutosaveSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TaskboardToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Load from `<board_dir>/taskboard.toml`, or defaults if it is missing.
    pub fn load_or_default(board_dir: &Path) -> Result<Self> {
        let config_path = board_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let autosave = &self.autosave;

        if autosave.debounce_ms == 0 {
            warnings.push("autosave.debounce_ms is 0: every keystroke will be saved".to_string());
        }
        if autosave.grace_window_ms == 0 {
            warnings.push(
                "autosave.grace_window_ms is 0: remote updates may overwrite local edits"
                    .to_string(),
            );
        }
        if autosave.grace_window_ms <= autosave.debounce_ms {
            warnings.push(format!(
                "autosave.grace_window_ms ({}) should exceed debounce_ms ({}), or a client's own save echo can overwrite newer keystrokes",
                autosave.grace_window_ms, autosave.debounce_ms
            ));
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.filter).is_err() {
            warnings.push(format!(
                "Invalid logging.filter '{}'",
                self.logging.filter
            ));
        }

        warnings
    }
}

/// Resolved configuration: the file plus environment and CLI overrides.
#[derive(Debug, Clone)]
pub struct TaskboardConfig {
    pub project_dir: PathBuf,
    pub board_dir: PathBuf,
    pub toml: TaskboardToml,
    /// CLI override: force debug logging.
    pub verbose: bool,
    pub cli_port: Option<u16>,
    pub cli_db_path: Option<PathBuf>,
    pub cli_dev: bool,
}

impl TaskboardConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve project directory {}", project_dir.display()))?;
        let board_dir = project_dir.join(BOARD_DIR);
        let toml = TaskboardToml::load_or_default(&board_dir)?;

        Ok(Self {
            project_dir,
            board_dir,
            toml,
            verbose: false,
            cli_port: None,
            cli_db_path: None,
            cli_dev: false,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.board_dir.join(CONFIG_FILE)
    }

    /// Port (CLI → env → file).
    pub fn port(&self) -> Result<u16> {
        resolve_port(self.cli_port, std::env::var(PORT_ENV).ok(), self.toml.server.port)
    }

    /// Database path (CLI → file), resolved against the project dir.
    pub fn db_path(&self) -> PathBuf {
        let path = self
            .cli_db_path
            .clone()
            .unwrap_or_else(|| self.toml.server.db_path.clone());
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn dev(&self) -> bool {
        self.cli_dev || self.toml.server.dev
    }

    /// Logging settings with `--verbose` applied.
    pub fn logging(&self) -> LoggingConfig {
        let mut logging = self.toml.logging.clone();
        if self.verbose {
            logging.filter = "debug".to_string();
        }
        logging
    }

    pub fn autosave(&self) -> AutosaveConfig {
        self.toml.autosave.to_autosave_config()
    }
}

fn resolve_port(cli: Option<u16>, env: Option<String>, file: u16) -> Result<u16> {
    if let Some(port) = cli {
        return Ok(port);
    }
    match env {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value '{}'", PORT_ENV, raw)),
        None => Ok(file),
    }
}
