//! Entry point for the mtbo-event-scraper CLI

use clap::Parser;
use mtbo_event_scraper::cli::{Cli, CliError, Commands};
use mtbo_event_scraper::shutdown::ShutdownCoordinator;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing; `LOG_FORMAT=json` switches to JSON lines
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mtbo_event_scraper=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn report(e: &CliError) -> i32 {
    error!(exit_code = e.exit_code(), "Command failed: {e}");
    eprintln!("Error: {e}");
    if let Some(hint) = e.suggestion() {
        eprintln!("Hint: {hint}");
    }
    e.exit_code()
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - finishing without saving the current year");
                shutdown.request_shutdown();
            }
        }
    });

    let code = match &cli.command {
        Commands::Scrape(args) => match args.execute(cli.output_format, shutdown).await {
            Ok(_) => 0,
            Err(e) => report(&e),
        },
        Commands::Purge(args) => match args.execute(cli.output_format) {
            Ok(_) => 0,
            Err(e) => report(&e),
        },
        Commands::Sources(cmd) => match cmd.execute() {
            Ok(()) => 0,
            Err(e) => {
                error!("Command failed: {e:#}");
                eprintln!("Error: {e:#}");
                1
            }
        },
    };

    std::process::exit(code);
}
