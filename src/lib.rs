//! # MTBO Event Scraper Library
//!
//! Repeatedly harvests mountain-bike orienteering events from Eventor-style
//! sources that sit behind anti-bot protection, and accumulates them into a
//! year-partitioned JSON dataset that survives interrupted and repeated runs.
//!
//! ## Features
//!
//! - **Challenge Handling**: Two-tier fetching; plain HTTP first, browser
//!   automation only when a Cloudflare managed challenge is detected
//! - **Pacing**: Randomized delays between requests, slower for history backfills
//! - **Retry**: Exponential backoff for transient network failures
//! - **Partitioned Storage**: One JSON file per calendar year plus an umbrella index
//! - **Safe Writes**: Diff-guarded, atomic (temp file + rename) partition writes
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use mtbo_event_scraper::downloader::{ScrapeExecutor, SegmentPlanner};
//! use mtbo_event_scraper::fetcher::{FetchClient, FetchConfig};
//! use mtbo_event_scraper::store::PartitionStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(FetchClient::from_config(&FetchConfig::default())?);
//! let store = PartitionStore::open("data/events")?;
//! let sources = Vec::new(); // registered `EventSource` implementations
//! let executor = ScrapeExecutor::new(store, sources);
//!
//! let plan = SegmentPlanner::default().plan(
//!     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
//!     chrono::Utc::now().date_naive(),
//! )?;
//! let report = executor.run(&plan).await?;
//! println!("{}", report.stats);
//! # let _ = client;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`fetcher`] - Fetch client, cookie cache, challenge solver and event sources
//! - [`downloader`] - Segment planning, pacing and run orchestration
//! - [`store`] - Partitioned persistence with merge, diff-guarded writes and index
//! - [`registry`] - Embedded descriptors of supported sources
//! - [`identifier`] - Event id parsing (`SWE_12345`, `MAN_SWE_ORINGEN2025`)

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CLI command implementations
pub mod cli;

/// Segment planning, pacing and orchestration
pub mod downloader;

/// Fetching from remote sources
pub mod fetcher;

/// Event identifier parsing
pub mod identifier;

/// Metrics collection
pub mod metrics;

/// Registry of supported sources
pub mod registry;

/// Graceful shutdown coordination
pub mod shutdown;

/// Partitioned event storage
pub mod store;

pub use identifier::EventId;

/// A single orienteering event as stored in a partition.
///
/// The storage layer only looks at `id` and `start_date`; everything else is
/// carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Globally unique id (`SWE_12345`, `MAN_SWE_ORINGEN2025`)
    pub id: String,
    /// Event name
    pub name: String,
    /// First day of the event, selects the partition
    pub start_date: NaiveDate,
    /// Last day of the event for multi-day events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Sanction status (e.g. "Planned", "Sanctioned", "Cancelled")
    pub status: String,
    /// Organising clubs or federations
    #[serde(default)]
    pub organisers: Vec<String>,
    /// Classification tags (event level, championship type, ...)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Individual races of the event
    #[serde(default)]
    pub stages: Vec<Stage>,
    /// Event-level links
    #[serde(default)]
    pub links: Vec<Link>,
    /// Event-level documents (invitations, bulletins)
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Parser-specific fields preserved verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// One race/stage within an event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    /// Stage name ("Stage 1", "Middle")
    #[serde(default)]
    pub name: String,
    /// Discipline or distance ("Long", "Middle", "Sprint")
    pub discipline: String,
    /// Local start date-time in ISO 8601
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    /// Venue position
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Stage-level links (entry, start and result lists)
    #[serde(default)]
    pub links: Vec<Link>,
    /// Stage-level documents
    #[serde(default)]
    pub documents: Vec<Document>,
}

/// Venue position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    /// Venue name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Latitude (WGS84)
    pub lat: f64,
    /// Longitude (WGS84)
    pub lon: f64,
}

/// Hyperlink attached to an event or stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    /// Link kind ("EntryList", "StartList", "ResultList", "Livelox", ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Absolute or source-relative URL
    pub url: String,
    /// Link title as shown by the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// When this link was first seen with its current content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<String>,
}

/// Document attached to an event or stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    /// Display name
    pub name: String,
    /// Download URL
    pub url: String,
    /// Document kind ("Invitation", "Bulletin", ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Publication date if the source shows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

/// Listing-level summary of an event, used to drive the detail fetch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventSummary {
    /// Event id as it will appear in the dataset
    pub id: String,
    /// Owning source code
    pub source: String,
    /// Event name from the listing
    #[serde(default)]
    pub name: String,
    /// Start date from the listing
    pub start_date: NaiveDate,
    /// Detail page URL, absolute or relative to the source base URL
    pub url: String,
}

impl Event {
    /// Calendar year of `start_date`, the partition key
    pub fn year(&self) -> i32 {
        self.start_date.year()
    }

    /// Source code owning this event (the id prefix before the first `_`)
    pub fn source_code(&self) -> &str {
        self.id.split('_').next().unwrap_or_default()
    }

    /// Validate required fields before the event is handed to the store
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Err(e) = EventId::parse(&self.id) {
            return Err(ValidationError::new(
                &self.id,
                "id",
                "SOURCE_LOCALID or SOURCE_COUNTRY_SHORTNAMEYEAR",
                e.to_string(),
            ));
        }

        if self.name.trim().is_empty() {
            return Err(ValidationError::new(&self.id, "name", "non-empty name", ""));
        }

        if self.status.trim().is_empty() {
            return Err(ValidationError::new(&self.id, "status", "non-empty status", ""));
        }

        if let Some(end) = self.end_date {
            if end < self.start_date {
                return Err(ValidationError::new(
                    &self.id,
                    "end_date",
                    format!("date on or after {}", self.start_date),
                    end.to_string(),
                ));
            }
        }

        for (i, stage) in self.stages.iter().enumerate() {
            if stage.discipline.trim().is_empty() {
                return Err(ValidationError::new(
                    &self.id,
                    format!("stages[{i}].discipline"),
                    "non-empty discipline",
                    "",
                ));
            }
        }

        let stage_links = self.stages.iter().flat_map(|s| s.links.iter());
        if let Some(link) = self.links.iter().chain(stage_links).find(|l| l.url.is_empty()) {
            return Err(ValidationError::new(
                &self.id,
                "links.url",
                "non-empty url",
                format!("link of type {}", link.kind),
            ));
        }

        Ok(())
    }
}

/// A record rejected before merge
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid event {event_id}: field '{field}' expected {expected}, received '{received}'")]
pub struct ValidationError {
    /// Id of the rejected event (may itself be malformed)
    pub event_id: String,
    /// Offending field
    pub field: String,
    /// What the field should contain
    pub expected: String,
    /// What was received (truncated)
    pub received: String,
}

impl ValidationError {
    fn new(
        event_id: &str,
        field: impl Into<String>,
        expected: impl Into<String>,
        received: impl Into<String>,
    ) -> Self {
        let mut received: String = received.into();
        if received.len() > 200 {
            let mut cut = 200;
            while !received.is_char_boundary(cut) {
                cut -= 1;
            }
            received.truncate(cut);
        }
        Self {
            event_id: event_id.to_string(),
            field: field.into(),
            expected: expected.into(),
            received,
        }
    }

    /// Correction hint shown next to the error
    pub fn suggestion(&self) -> String {
        format!(
            "The parser produced an invalid '{}' field; check the source page or update the parser",
            self.field
        )
    }
}
