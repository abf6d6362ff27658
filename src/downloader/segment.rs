//! Segment planning
//!
//! A requested date range is processed one calendar year at a time. Each
//! [`Segment`] maps to exactly one partition, so a finished segment is a
//! durable checkpoint for the whole run.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::config::HISTORY_LOOKBACK_DAYS;

/// Request pacing profile, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    /// Incremental runs around the current date
    Standard,
    /// Backfills reaching further into the past
    History,
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PacingMode::Standard => "standard",
            PacingMode::History => "history",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(PacingMode::Standard),
            "history" => Ok(PacingMode::History),
            _ => Err(format!("Invalid pacing mode: {s}. Valid options: standard, history")),
        }
    }
}

/// A date range clipped to a single calendar year (both ends inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Calendar year, also the partition key
    pub year: i32,
    /// First day (inclusive)
    pub start: NaiveDate,
    /// Last day (inclusive)
    pub end: NaiveDate,
}

impl Segment {
    /// Whether a date falls inside this segment
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}..{})", self.year, self.start, self.end)
    }
}

/// Ordered segments plus the pacing mode for the whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// First requested day
    pub start: NaiveDate,
    /// Last requested day
    pub end: NaiveDate,
    /// Segments in ascending year order
    pub segments: Vec<Segment>,
    /// Pacing applied to every request of the run
    pub pacing: PacingMode,
}

/// Splits date ranges into year segments and picks the pacing mode
#[derive(Debug, Clone)]
pub struct SegmentPlanner {
    lookback: chrono::Duration,
}

impl Default for SegmentPlanner {
    fn default() -> Self {
        Self {
            lookback: chrono::Duration::days(HISTORY_LOOKBACK_DAYS),
        }
    }
}

impl SegmentPlanner {
    /// Plan a run for `start..=end` as seen on `today`
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidRange`] when `start` is after `end`.
    pub fn plan(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<Plan, PlanError> {
        if start > end {
            return Err(PlanError::InvalidRange { start, end });
        }

        Ok(Plan {
            start,
            end,
            segments: split_into_year_segments(start, end),
            pacing: self.select_pacing(start, today),
        })
    }

    /// History pacing when `start` lies more than the lookback before `today`
    pub fn select_pacing(&self, start: NaiveDate, today: NaiveDate) -> PacingMode {
        if today.signed_duration_since(start) > self.lookback {
            PacingMode::History
        } else {
            PacingMode::Standard
        }
    }
}

/// Split an inclusive date range into calendar-year segments
pub fn split_into_year_segments(start: NaiveDate, end: NaiveDate) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current_start = start;

    while current_start <= end {
        let year = current_start.year();
        let year_end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX);
        let segment_end = year_end.min(end);

        segments.push(Segment {
            year,
            start: current_start,
            end: segment_end,
        });

        match segment_end.succ_opt() {
            Some(next) => current_start = next,
            None => break,
        }
    }

    segments
}

/// Planning errors, all of them configuration problems
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Start date after end date
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange {
        /// Requested start
        start: NaiveDate,
        /// Requested end
        end: NaiveDate,
    },
}
