//! Run planning and orchestration
//!
//! # Overview
//!
//! A run turns a date range into stored events:
//!
//! 1. **Planning**: [`SegmentPlanner`] splits the range into calendar-year
//!    [`Segment`]s and picks a [`PacingMode`]
//! 2. **Fetching**: each segment's sources deliver listings and details
//!    through the shared fetch client, paced by [`Pacer`]
//! 3. **Storing**: [`ScrapeExecutor`] validates the records and commits the
//!    segment to the partition store before moving on
//!
//! # Quick Start
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use mtbo_event_scraper::downloader::{ScrapeExecutor, SegmentPlanner};
//! use mtbo_event_scraper::fetcher::EventSource;
//! use mtbo_event_scraper::store::PartitionStore;
//! use std::sync::Arc;
//!
//! # async fn example(sources: Vec<Arc<dyn EventSource>>) -> Result<(), Box<dyn std::error::Error>> {
//! let today = chrono::Utc::now().date_naive();
//! let plan = SegmentPlanner::default().plan(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
//!     today,
//! )?;
//!
//! let executor = ScrapeExecutor::new(PartitionStore::open("data/events")?, sources);
//! let report = executor.run(&plan).await?;
//! println!("{}", report.stats);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Network failures abort only the segment they hit and are listed in the
//! [`RunReport`]. Bypass failures, storage failures and cancellation end the
//! run with a [`RunError`].

pub mod config;
pub mod executor;
pub mod rate_limit;
pub mod segment;

pub use executor::{RunReport, ScrapeExecutor, SegmentOutcome, SegmentReport, SegmentWorker};
pub use rate_limit::{Pacer, PacingWindow};
pub use segment::{PacingMode, Plan, PlanError, Segment, SegmentPlanner};

use crate::fetcher::FetchError;
use crate::store::StoreError;

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Challenge bypass or client setup failed
    #[error("fetch error: {0}")]
    Fetch(FetchError),

    /// Partition store failure
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Shutdown requested
    #[error("run cancelled after {completed} segment(s)")]
    Cancelled {
        /// Segments fully processed before cancellation
        completed: usize,
    },
}

impl RunError {
    /// Correction hint shown with the error
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Fetch(e) => e.suggestion(),
            Self::Store(e) => e.suggestion(),
            Self::Cancelled { .. } => "Rerun the same command; completed years are kept",
        }
    }
}
