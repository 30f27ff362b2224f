//! Harbor command-line entry point
//!
//! Loads the TOML configuration, applies command-line overrides, sets up
//! logging and runs one command against the server manager.

mod app;
mod cli;
mod config;
mod logging;
mod signals;
mod terminal;

use anyhow::anyhow;
use app::Application;
use cli::CliArgs;
use config::AppConfig;
use tracing::{error, warn};

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse()?;

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

    logging::setup_logging(&config.logging)?;

    let app = Application::new(&config).await?;

    tokio::select! {
        result = app.run(args.command) => match result {
            Ok(output) => {
                print!("{output}");
                Ok(())
            }
            Err(e) => {
                error!("Command failed: {:#}", e);
                Err(e)
            }
        },
        signal = signals::shutdown_signal() => {
            signal?;
            warn!("Interrupted; the current command was cancelled");
            std::process::exit(130);
        }
    }
}
