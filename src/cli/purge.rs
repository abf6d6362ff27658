//! Purge command: drop events by id from the dataset

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use super::{CliError, OutputFormat};
use crate::identifier::EventId;
use crate::store::PartitionStore;

/// Arguments for `purge`
#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// Dataset root holding mtbo_events.json
    #[arg(long, default_value = "data/events")]
    pub output: PathBuf,

    /// Event ids to remove (e.g. SWE_50597)
    #[arg(required = true)]
    pub ids: Vec<String>,
}

impl PurgeArgs {
    /// Validate the ids, then remove them from every partition
    pub fn execute(&self, format: OutputFormat) -> Result<Vec<String>, CliError> {
        for id in &self.ids {
            EventId::parse(id)?;
        }
        if !self.output.join(crate::store::INDEX_FILE).exists() {
            return Err(CliError::Configuration(format!(
                "no dataset found at {}",
                self.output.display()
            )));
        }

        let store = PartitionStore::open(&self.output)?;
        let removed = store.purge(&self.ids)?;
        info!(removed = removed.len(), "Purge complete");

        match format {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({ "requested": self.ids, "removed": removed })
            ),
            OutputFormat::Human => {
                println!("Removed {} of {} event(s)", removed.len(), self.ids.len());
                for id in &removed {
                    println!("  {id}");
                }
            }
        }
        Ok(removed)
    }
}
