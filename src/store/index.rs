//! Umbrella index over all partitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

use super::{StoreError, SCHEMA_VERSION};

/// Index entry for one year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Partition path relative to the index directory
    pub path: String,
    /// Number of events in the partition
    pub count: usize,
    /// Last time the partition content changed
    pub last_updated_at: String,
    /// SHA-256 of the partition file bytes
    pub fingerprint: String,
    /// Events per source code
    #[serde(default)]
    pub sources: BTreeMap<String, usize>,
}

/// Saved state of one partition, as handed to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionUpdate {
    /// Partition path relative to the index directory
    pub path: String,
    /// Number of events written
    pub count: usize,
    /// SHA-256 of the written bytes
    pub fingerprint: String,
    /// Events per source code
    pub sources: BTreeMap<String, usize>,
    /// Whether the file content changed
    pub changed: bool,
}

/// Aggregate entry for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Events across all partitions
    pub count: usize,
    /// Last time any of its partitions changed
    pub last_updated_at: String,
}

/// On-disk layout of `<root>/mtbo_events.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UmbrellaIndex {
    /// Layout version
    pub schema_version: String,
    /// Last time a run touched the index
    #[serde(default)]
    pub last_run_at: Option<String>,
    /// Directory the partitions live in
    pub data_root: String,
    /// Partitions keyed by year
    #[serde(default)]
    pub partitions: BTreeMap<String, PartitionEntry>,
    /// Aggregates keyed by source code
    #[serde(default)]
    pub sources: BTreeMap<String, SourceEntry>,
}

impl UmbrellaIndex {
    /// Empty index for a data root
    pub fn empty(data_root: &str) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            last_run_at: None,
            data_root: data_root.to_string(),
            partitions: BTreeMap::new(),
            sources: BTreeMap::new(),
        }
    }

    /// Read the index, or an empty one if the file does not exist
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, invalid JSON and foreign major versions.
    pub fn load(path: &Path, data_root: &str) -> Result<Self, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No index yet, starting empty");
                return Ok(Self::empty(data_root));
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let index: UmbrellaIndex = serde_json::from_str(&content).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to deserialize index");
            StoreError::Corrupt {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;
        super::check_schema_version(&index.schema_version)?;
        Ok(index)
    }

    /// Record the just-saved state of a partition
    ///
    /// `last_updated_at` only moves when the content changed or the entry is
    /// new; count and fingerprint always reflect the file.
    pub fn record_partition(&mut self, year: i32, update: PartitionUpdate, now: &str) {
        let key = year.to_string();
        let previous = self.partitions.get(&key);

        let last_updated_at = match previous {
            Some(p) if !update.changed && p.fingerprint == update.fingerprint => {
                p.last_updated_at.clone()
            }
            _ => now.to_string(),
        };

        let mut touched: Vec<String> = Vec::new();
        if update.changed {
            touched.extend(update.sources.keys().cloned());
            if let Some(p) = previous {
                touched.extend(p.sources.keys().cloned());
            }
        }

        self.partitions.insert(
            key,
            PartitionEntry {
                path: update.path,
                count: update.count,
                last_updated_at,
                fingerprint: update.fingerprint,
                sources: update.sources,
            },
        );
        self.recompute_sources(&touched, now);
    }

    /// Drop a partition that no longer holds any events
    pub fn remove_partition(&mut self, year: i32, now: &str) {
        if let Some(previous) = self.partitions.remove(&year.to_string()) {
            let touched: Vec<String> = previous.sources.into_keys().collect();
            self.recompute_sources(&touched, now);
        }
    }

    /// Total events across partitions
    pub fn total_events(&self) -> usize {
        self.partitions.values().map(|p| p.count).sum()
    }

    fn recompute_sources(&mut self, touched: &[String], now: &str) {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.partitions.values() {
            for (code, n) in &entry.sources {
                *counts.entry(code.clone()).or_default() += n;
            }
        }

        let mut sources = BTreeMap::new();
        for (code, count) in counts {
            let last_updated_at = match self.sources.get(&code) {
                Some(previous) if !touched.contains(&code) => previous.last_updated_at.clone(),
                _ => now.to_string(),
            };
            sources.insert(code, SourceEntry { count, last_updated_at });
        }
        self.sources = sources;
    }
}
