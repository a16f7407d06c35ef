//! Agentbox host daemon (agentboxd).
//!
//! The central daemon on the host: desktop notifications and clipboard for
//! containers, port tunneling in both directions, terminal session
//! streaming, and completion data for the CLI.

mod app;
mod control;
mod external;
mod ipc;
mod utils;

use agentbox_core::{init_logging, init_logging_with_file, Config, Paths};
use clap::Parser;

/// Agentbox daemon command-line interface.
#[derive(Parser)]
#[command(name = "agentboxd")]
#[command(about = "Agentbox host daemon for container communication")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); overrides the config.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Also log to the daemon log file.
    #[arg(long)]
    log_to_file: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = Paths::new()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.unwrap_or_else(|| config.log_level.clone());
    if cli.log_to_file {
        init_logging_with_file(&level, &paths.daemon_log_file())?;
    } else {
        init_logging(&level);
    }

    app::run_daemon(config, paths).await
}
