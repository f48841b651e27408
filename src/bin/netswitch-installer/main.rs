//! netswitch-installer CLI entry point.

mod cli;
mod shutdown;

use clap::Parser;
use cli::Cli;
use color_eyre::Section;
use netswitch_installer::{Error, GithubClient, Reconciler, SystemHost};
use shutdown::Shutdown;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    info!("netswitch-installer v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config = cli.into_config()?;
    let client = GithubClient::from_env(
        &config.api_base,
        Duration::from_secs(config.download.timeout_secs),
    )?;
    if !client.is_authenticated() {
        info!("No GitHub token set; using anonymous API access");
    }

    // Handlers go in before any work so no signal can skip cleanup
    let mut shutdown = Shutdown::register()?;

    // Dropping the run on a signal also drops its download directory
    let reconciler = Reconciler::new(&config, &SystemHost, &client);
    let result = tokio::select! {
        result = reconciler.run() => result,
        name = shutdown.recv() => {
            warn!("Received {}, aborting", name);
            Err(Error::Interrupted)
        }
    };

    let report = result.map_err(into_report)?;
    info!("Done: {}", report);
    Ok(())
}

fn into_report(error: Error) -> color_eyre::Report {
    let hint = error.hint();
    let report = color_eyre::Report::new(error);
    match hint {
        Some(hint) => report.suggestion(hint),
        None => report,
    }
}
