//! linkrelay entry point.

mod app;
mod config;
mod gateway;
mod telegram;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Relays files shared through object-storage links to a Telegram chat.
#[derive(Debug, Parser)]
#[command(name = "linkrelay", version)]
struct Cli {
    /// Configuration file (defaults to the per-user config path).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print events and results as JSON lines.
    #[arg(long)]
    json: bool,

    /// Messages to process, one job each. The first link in each is used.
    #[arg(required = true, value_name = "TEXT")]
    messages: Vec<String>,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries results.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting linkrelay");

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::info!(
        staging_root = %config.staging_root,
        gateway = %config.gateway.url,
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    let all_ok = rt.block_on(app::run(config, cli.messages, cli.json))?;

    Ok(if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
