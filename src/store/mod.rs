//! Partitioned event storage
//!
//! Events live in one JSON file per calendar year (`<root>/<year>/events.json`)
//! and are summarised by an umbrella index (`<root>/mtbo_events.json`).
//!
//! A year is the unit of durability: [`PartitionStore::commit`] merges a
//! batch into the partition, writes it only if its bytes changed (atomically,
//! through a temp file), then updates the index under an exclusive lock.
//! Interrupting a run never leaves a half-written file behind, and rerunning
//! a merge is always safe.

use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::Event;

pub mod atomic;
pub mod diff;
pub mod index;
pub mod lock;
pub mod partition;

pub use diff::ChangeStats;
pub use index::{PartitionEntry, PartitionUpdate, SourceEntry, UmbrellaIndex};
pub use lock::IndexLock;
pub use partition::{MergeOutcome, PartitionFile, PartitionMeta, SourceMeta, SourceRestriction};

/// Layout version written into the index and every partition
pub const SCHEMA_VERSION: &str = "2.0";

/// Index file name inside the data root
pub const INDEX_FILE: &str = "mtbo_events.json";

/// Partition file name inside each year directory
pub const PARTITION_FILE: &str = "events.json";

/// Storage errors; all of them abort the run
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("IO error at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// File exists but cannot be parsed
    #[error("corrupt file {path}: {message}")]
    Corrupt {
        /// Offending file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Layout written by an incompatible version
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Index lock failure
    #[error("lock error: {0}")]
    Lock(String),

    /// Event handed to the wrong partition
    #[error("event {id} starts in {actual}, not in partition {year}")]
    PartitionMismatch {
        /// Event id
        id: String,
        /// Target partition
        year: i32,
        /// Year of the event's start date
        actual: i32,
    },
}

impl StoreError {
    /// Wrap an IO error with its path
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Correction hint shown with the error
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Io { .. } => "Check that the output directory exists, is writable and has free space",
            Self::Serialization(_) | Self::PartitionMismatch { .. } => {
                "This is a bug; please report it with the log output"
            }
            Self::Corrupt { .. } => {
                "Restore the file from version control or delete it to rebuild that year"
            }
            Self::SchemaVersionMismatch { .. } => {
                "The dataset was written by an incompatible version; migrate or use a new --output"
            }
            Self::Lock(_) => "Another scraper run is writing this dataset; wait for it to finish",
        }
    }
}

/// Accept any minor revision of the current major version
pub(crate) fn check_schema_version(found: &str) -> Result<(), StoreError> {
    let major = |v: &str| v.split('.').next().map(str::to_string);
    if major(found) != major(SCHEMA_VERSION) {
        return Err(StoreError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Current time as the RFC 3339 string stored in timestamps
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Result of writing a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Absolute partition path
    pub path: PathBuf,
    /// Whether the file was (re)written
    pub written: bool,
    /// SHA-256 of the partition bytes
    pub fingerprint: String,
    /// Number of events in the file
    pub count: usize,
    /// Events per source code
    pub sources: BTreeMap<String, usize>,
}

/// Result of committing a batch into one year
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// Partition year
    pub year: i32,
    /// Changes relative to the previous dataset
    pub stats: ChangeStats,
    /// Save result, `None` when the year had nothing to store
    pub saved: Option<SaveOutcome>,
}

/// Year-partitioned event store
#[derive(Debug, Clone)]
pub struct PartitionStore {
    root: PathBuf,
    sources: BTreeMap<String, SourceMeta>,
}

impl PartitionStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self {
            root,
            sources: BTreeMap::new(),
        })
    }

    /// Register source metadata written into partition files
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceMeta>) -> Self {
        for meta in sources {
            self.sources.insert(meta.code.clone(), meta);
        }
        self
    }

    /// Data root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the umbrella index
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    /// Path of a year's partition
    pub fn partition_path(&self, year: i32) -> PathBuf {
        self.root.join(year.to_string()).join(PARTITION_FILE)
    }

    fn relative_partition_path(year: i32) -> String {
        format!("{year}/{PARTITION_FILE}")
    }

    fn data_root(&self) -> String {
        self.root.display().to_string()
    }

    /// Load the umbrella index (empty if absent)
    pub fn load_index(&self) -> Result<UmbrellaIndex, StoreError> {
        UmbrellaIndex::load(&self.index_path(), &self.data_root())
    }

    fn read_partition_file(&self, year: i32) -> Result<Option<PartitionFile>, StoreError> {
        let path = self.partition_path(year);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let file: PartitionFile =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;
        check_schema_version(&file.schema_version)?;
        Ok(Some(file))
    }

    /// Load a year's events (empty if the partition does not exist)
    pub fn load_partition(&self, year: i32) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .read_partition_file(year)?
            .map(|file| file.events)
            .unwrap_or_default())
    }

    /// Merge `incoming` into the stored events of `year` without writing
    ///
    /// # Errors
    ///
    /// [`StoreError::PartitionMismatch`] if an incoming event starts in
    /// another year.
    pub fn merge(
        &self,
        year: i32,
        incoming: Vec<Event>,
        restriction: Option<&SourceRestriction>,
    ) -> Result<MergeOutcome, StoreError> {
        if let Some(stray) = incoming.iter().find(|e| e.year() != year) {
            return Err(StoreError::PartitionMismatch {
                id: stray.id.clone(),
                year,
                actual: stray.year(),
            });
        }

        let existing = self.load_partition(year)?;
        Ok(partition::merge_events(
            existing,
            incoming,
            restriction,
            &now_timestamp(),
        ))
    }

    /// Write a year's events if they differ from what is on disk
    pub fn save_partition(&self, year: i32, events: &[Event]) -> Result<SaveOutcome, StoreError> {
        let path = self.partition_path(year);
        let existing_meta = self
            .read_partition_file(year)?
            .map(|file| file.meta)
            .unwrap_or_default();

        let mut sources: BTreeMap<String, usize> = BTreeMap::new();
        for event in events {
            *sources.entry(event.source_code().to_string()).or_default() += 1;
        }

        let file = PartitionFile {
            schema_version: SCHEMA_VERSION.to_string(),
            meta: PartitionMeta {
                sources: sources
                    .keys()
                    .map(|code| self.source_meta(code, &existing_meta))
                    .collect(),
            },
            events: events.to_vec(),
        };

        let bytes = atomic::to_pretty_json(&file)?;
        let fingerprint = atomic::fingerprint(&bytes);
        let written = atomic::write_if_changed(&path, &bytes)?;

        if written {
            info!(year, path = %path.display(), count = events.len(), "Partition updated");
        } else {
            debug!(year, "Partition unchanged");
        }

        Ok(SaveOutcome {
            path,
            written,
            fingerprint,
            count: events.len(),
            sources,
        })
    }

    fn source_meta(&self, code: &str, existing: &PartitionMeta) -> SourceMeta {
        self.sources
            .get(code)
            .or_else(|| existing.sources.iter().find(|s| s.code == code))
            .cloned()
            .unwrap_or_else(|| SourceMeta {
                code: code.to_string(),
                name: code.to_string(),
                url: String::new(),
            })
    }

    /// Record a saved partition in the umbrella index
    ///
    /// Re-reads the index under the exclusive lock so concurrent writers of
    /// other years are not lost.
    pub fn update_index(&self, year: i32, saved: &SaveOutcome) -> Result<(), StoreError> {
        let index_path = self.index_path();
        let mut lock = IndexLock::open(&index_path)?;

        lock.exclusive(|| {
            let mut index = self.load_index()?;
            let now = now_timestamp();
            index.record_partition(
                year,
                PartitionUpdate {
                    path: Self::relative_partition_path(year),
                    count: saved.count,
                    fingerprint: saved.fingerprint.clone(),
                    sources: saved.sources.clone(),
                    changed: saved.written,
                },
                &now,
            );
            index.last_run_at = Some(now);
            index.data_root = self.data_root();

            let bytes = atomic::to_pretty_json(&index)?;
            atomic::write_atomic(&index_path, &bytes)
        })?;

        debug!(year, count = saved.count, fingerprint = %saved.fingerprint, "Index updated");
        Ok(())
    }

    /// Delete a partition that lost its last event and drop it from the index
    pub fn drop_partition(&self, year: i32) -> Result<(), StoreError> {
        let path = self.partition_path(year);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&path, e)),
        }
        if let Some(dir) = path.parent() {
            // Leaves the directory alone if anything else lives there
            let _ = std::fs::remove_dir(dir);
        }

        let index_path = self.index_path();
        let mut lock = IndexLock::open(&index_path)?;
        lock.exclusive(|| {
            let mut index = self.load_index()?;
            let now = now_timestamp();
            index.remove_partition(year, &now);
            index.last_run_at = Some(now);
            index.data_root = self.data_root();

            let bytes = atomic::to_pretty_json(&index)?;
            atomic::write_atomic(&index_path, &bytes)
        })?;

        info!(year, "Partition emptied and removed");
        Ok(())
    }

    /// Merge, save and index one year's batch
    ///
    /// Events that moved here from another year are removed from their old
    /// partition after this one is safely written.
    pub fn commit(
        &self,
        year: i32,
        incoming: Vec<Event>,
        restriction: Option<&SourceRestriction>,
    ) -> Result<CommitOutcome, StoreError> {
        let incoming_ids: BTreeSet<String> = incoming
            .iter()
            .filter(|e| restriction.map_or(true, |r| e.source_code() == r.source))
            .map(|e| e.id.clone())
            .collect();

        let outcome = self.merge(year, incoming, restriction)?;
        let mut stats = outcome.stats;

        if outcome.events.is_empty() && !self.partition_path(year).exists() {
            debug!(year, "Nothing to store for year");
            return Ok(CommitOutcome {
                year,
                stats,
                saved: None,
            });
        }

        let saved = self.save_partition(year, &outcome.events)?;
        self.update_index(year, &saved)?;

        // Written the new home first: a crash here duplicates, never loses
        let relocated = self.remove_ids(&incoming_ids, Some(year))?;
        if !relocated.is_empty() {
            info!(year, moved = relocated.len(), "Events moved between partitions");
            let moved = relocated.len().min(stats.new);
            stats.new -= moved;
            stats.changed += moved;
        }

        Ok(CommitOutcome {
            year,
            stats,
            saved: Some(saved),
        })
    }

    /// Remove events by id from every partition
    ///
    /// Returns the ids that were actually found and removed.
    pub fn purge(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let ids: BTreeSet<String> = ids.iter().cloned().collect();
        let removed = self.remove_ids(&ids, None)?;
        info!(requested = ids.len(), removed = removed.len(), "Purge finished");
        Ok(removed)
    }

    fn remove_ids(
        &self,
        ids: &BTreeSet<String>,
        except_year: Option<i32>,
    ) -> Result<Vec<String>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let years: Vec<i32> = self
            .load_index()?
            .partitions
            .keys()
            .filter_map(|k| match k.parse::<i32>() {
                Ok(year) => Some(year),
                Err(_) => {
                    warn!(key = %k, "Ignoring index partition with non-numeric year");
                    None
                }
            })
            .filter(|year| Some(*year) != except_year)
            .collect();

        let mut removed = Vec::new();
        for year in years {
            let events = self.load_partition(year)?;
            let before = events.len();
            let (gone, kept): (Vec<Event>, Vec<Event>) =
                events.into_iter().partition(|e| ids.contains(&e.id));
            if kept.len() == before {
                continue;
            }

            let gone_ids: HashSet<&str> = gone.iter().map(|e| e.id.as_str()).collect();
            debug!(year, removed = ?gone_ids, "Removing events from partition");
            if kept.is_empty() {
                self.drop_partition(year)?;
            } else {
                let saved = self.save_partition(year, &kept)?;
                self.update_index(year, &saved)?;
            }
            removed.extend(gone.into_iter().map(|e| e.id));
        }

        Ok(removed)
    }
}
