//! Board server command — `taskboard serve`.

use anyhow::Result;
use std::path::PathBuf;

use taskboard::board::server::{ServerConfig, start_server};
use taskboard::config::TaskboardConfig;
use taskboard::telemetry::init_tracing;

pub async fn cmd_serve(
    project_dir: &std::path::Path,
    verbose: bool,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let mut config = TaskboardConfig::new(project_dir.to_path_buf())?;
    config.verbose = verbose;
    config.cli_port = port;
    config.cli_db_path = db_path;
    config.cli_dev = dev;

    init_tracing(&config.logging());
    for warning in config.toml.validate() {
        tracing::warn!("{}", warning);
    }

    start_server(ServerConfig {
        port: config.port()?,
        db_path: config.db_path(),
        dev_mode: config.dev(),
        autosave: config.autosave(),
    })
    .await
}
