//! CLI command for listing the registered sources

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use crate::fetcher::ParserRegistry;
use crate::registry::SourceRegistry;

/// Sources subcommand
#[derive(Debug, Args)]
pub struct SourcesCommand {
    #[command(subcommand)]
    action: SourcesAction,
}

/// Sources actions
#[derive(Debug, clap::Subcommand)]
enum SourcesAction {
    /// List all registered sources
    List {
        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },
}

/// Output format for sources command
#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

impl SourcesCommand {
    /// Execute the sources command
    pub fn execute(&self) -> Result<()> {
        match &self.action {
            SourcesAction::List { format } => self.execute_list(format),
        }
    }

    fn execute_list(&self, format: &OutputFormat) -> Result<()> {
        let registry = SourceRegistry::load_embedded().context("Failed to load source registry")?;
        let parsers = ParserRegistry::with_builtin();

        let rows: Vec<serde_json::Value> = registry
            .list_all()
            .into_iter()
            .map(|source| {
                json!({
                    "code": source.code(),
                    "name": source.name(),
                    "country": source.country(),
                    "url": source.base_url(),
                    "parser": source.parser(),
                    "parser_available": parsers.get(source.parser()).is_some(),
                })
            })
            .collect();

        match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&rows).context("Failed to serialize sources")?
                );
            }
            OutputFormat::Human => {
                println!(
                    "{} sources (registry updated {}):\n",
                    rows.len(),
                    registry.last_updated()
                );
                for source in registry.list_all() {
                    let marker = if parsers.get(source.parser()).is_some() {
                        ""
                    } else {
                        " (parser not built in, use --parser)"
                    };
                    println!(
                        "{:<4} | {:<28} | {} | parser={}{marker}",
                        source.code(),
                        source.name(),
                        source.base_url(),
                        source.parser()
                    );
                }
            }
        }

        Ok(())
    }
}
