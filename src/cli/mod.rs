//! CLI command implementations

use clap::{Parser, Subcommand};
use std::str::FromStr;

pub mod error;
pub mod purge;
pub mod scrape;
pub mod sources;

pub use error::CliError;
pub use purge::PurgeArgs;
pub use scrape::ScrapeArgs;
pub use sources::SourcesCommand;

/// MTBO event scraper
#[derive(Parser, Debug)]
#[command(name = "mtbo-event-scraper")]
#[command(about = "Scrape MTBO events from Eventor into a year-partitioned dataset", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Result output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch events for a date range and merge them into the dataset
    Scrape(ScrapeArgs),

    /// Inspect the source registry
    Sources(SourcesCommand),

    /// Remove events by id from every partition
    Purge(PurgeArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}. Valid options: json, human")),
        }
    }
}
