//! Scrape executor
//!
//! Drives a [`Plan`] segment by segment: every source delivers its listing,
//! then details one at a time; valid records are committed to the partition
//! store before the next segment starts.

use chrono::NaiveDate;
use indicatif::ProgressBar;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::segment::{PacingMode, Plan, Segment};
use super::RunError;
use crate::fetcher::{EventSource, FetchError};
use crate::metrics::{record_partition_saved, record_rejected, SegmentMetrics};
use crate::shutdown::SharedShutdown;
use crate::store::{ChangeStats, PartitionStore, SourceRestriction};
use crate::Event;

/// How one segment ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Records were merged and saved
    Saved {
        /// Whether any partition file changed on disk
        written: bool,
    },
    /// No records and no existing partition
    Empty,
    /// Aborted by a network or listing failure; nothing was saved
    Failed {
        /// Source whose request failed
        source: String,
        /// Error description
        error: String,
    },
}

/// Result of one segment
#[derive(Debug, Clone)]
pub struct SegmentReport {
    /// The segment
    pub segment: Segment,
    /// How it ended
    pub outcome: SegmentOutcome,
    /// Valid records fetched
    pub fetched: usize,
    /// Records dropped by validation or detail parsing
    pub rejected: usize,
    /// Changes committed for this segment
    pub stats: ChangeStats,
}

/// Summary of a completed run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Per-segment results in plan order
    pub segments: Vec<SegmentReport>,
    /// Changes across all segments
    pub stats: ChangeStats,
}

impl RunReport {
    /// Segments aborted by network failures
    pub fn failed_segments(&self) -> impl Iterator<Item = &SegmentReport> {
        self.segments
            .iter()
            .filter(|s| matches!(s.outcome, SegmentOutcome::Failed { .. }))
    }

    /// Whether any segment failed
    pub fn has_failures(&self) -> bool {
        self.failed_segments().next().is_some()
    }

    /// Records fetched across the run
    pub fn fetched(&self) -> usize {
        self.segments.iter().map(|s| s.fetched).sum()
    }

    /// Records dropped across the run
    pub fn rejected(&self) -> usize {
        self.segments.iter().map(|s| s.rejected).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} segment(s), {} fetched, {} rejected, {} failed; {}",
            self.segments.len(),
            self.fetched(),
            self.rejected(),
            self.failed_segments().count(),
            self.stats
        )
    }
}

/// Records collected for one segment
#[derive(Debug, Default)]
pub struct SegmentBatch {
    /// Validated events
    pub events: Vec<Event>,
    /// Ids listed inside the segment window, whether or not they survived
    pub listed: BTreeSet<String>,
    /// Records dropped before merge
    pub rejected: usize,
}

/// Why collecting a segment stopped
#[derive(Debug)]
pub enum WorkerError {
    /// Request failed for `source`
    Fetch {
        /// Failing source
        source: String,
        /// Cause
        error: FetchError,
    },
    /// Shutdown requested mid-segment
    Cancelled,
}

/// Collects one year's records from every source
///
/// Workers share nothing but the sources (and through them the fetch
/// client), so each year is an independent unit of work.
pub struct SegmentWorker<'a> {
    segment: Segment,
    mode: PacingMode,
    sources: &'a [Arc<dyn EventSource>],
    shutdown: Option<&'a SharedShutdown>,
}

impl<'a> SegmentWorker<'a> {
    /// Create a worker for `segment`
    pub fn new(
        segment: Segment,
        mode: PacingMode,
        sources: &'a [Arc<dyn EventSource>],
        shutdown: Option<&'a SharedShutdown>,
    ) -> Self {
        Self {
            segment,
            mode,
            sources,
            shutdown,
        }
    }

    async fn guarded<F: std::future::Future>(&self, fut: F) -> Result<F::Output, WorkerError> {
        match self.shutdown {
            Some(shutdown) => shutdown
                .run_until_shutdown(fut)
                .await
                .ok_or(WorkerError::Cancelled),
            None => Ok(fut.await),
        }
    }

    /// Fetch, parse and validate every record of the segment
    pub async fn collect(&self) -> Result<SegmentBatch, WorkerError> {
        let mut batch = SegmentBatch::default();

        for source in self.sources {
            let code = source.code().to_string();
            let listing = self
                .guarded(source.fetch_listing(&self.segment, self.mode))
                .await?
                .map_err(|error| WorkerError::Fetch {
                    source: code.clone(),
                    error,
                })?;
            info!(source = %code, listed = listing.len(), "Listing fetched");

            for summary in listing {
                if !self.segment.contains(summary.start_date) {
                    debug!(id = %summary.id, start_date = %summary.start_date, "Skipping event outside segment");
                    continue;
                }
                batch.listed.insert(summary.id.clone());

                let detail = self.guarded(source.fetch_detail(&summary, self.mode)).await?;
                let event = match detail {
                    Ok(event) => event,
                    Err(FetchError::Parse { url, message }) => {
                        warn!(id = %summary.id, url = %url, error = %message, "Dropping unparseable record");
                        record_rejected("parse");
                        batch.rejected += 1;
                        continue;
                    }
                    Err(FetchError::Network {
                        url,
                        status,
                        retryable: false,
                        message,
                    }) => {
                        warn!(
                            id = %summary.id,
                            url = %url,
                            status = ?status,
                            error = %message,
                            "Dropping record whose page is gone"
                        );
                        record_rejected("gone");
                        batch.rejected += 1;
                        continue;
                    }
                    Err(error) => {
                        return Err(WorkerError::Fetch {
                            source: code.clone(),
                            error,
                        })
                    }
                };

                if let Err(e) = event.validate() {
                    warn!(
                        id = %e.event_id,
                        field = %e.field,
                        expected = %e.expected,
                        received = %e.received,
                        "Dropping invalid record"
                    );
                    record_rejected("validation");
                    batch.rejected += 1;
                    continue;
                }
                batch.events.push(event);
            }
        }

        Ok(batch)
    }
}

/// Runs plans against a set of sources and a partition store
pub struct ScrapeExecutor {
    store: PartitionStore,
    sources: Vec<Arc<dyn EventSource>>,
    restrict_to: Option<String>,
    shutdown: Option<SharedShutdown>,
    progress: Option<ProgressBar>,
}

impl ScrapeExecutor {
    /// Create an executor over `sources`
    pub fn new(store: PartitionStore, sources: Vec<Arc<dyn EventSource>>) -> Self {
        Self {
            store,
            sources,
            restrict_to: None,
            shutdown: None,
            progress: None,
        }
    }

    /// Refresh only `source`: its records no longer listed in a segment's
    /// window are deleted, other sources are left alone
    pub fn restrict_to(mut self, source: impl Into<String>) -> Self {
        self.restrict_to = Some(source.into());
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Advance `bar` once per finished segment
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Store the executor commits to
    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }

    /// Execute `plan`
    ///
    /// # Errors
    ///
    /// - [`RunError::Fetch`] when the challenge bypass fails
    /// - [`RunError::Store`] on any storage failure
    /// - [`RunError::Cancelled`] when shutdown is requested; completed
    ///   segments stay saved
    pub async fn run(&self, plan: &Plan) -> Result<RunReport, RunError> {
        info!(
            start = %plan.start,
            end = %plan.end,
            segments = plan.segments.len(),
            pacing = %plan.pacing,
            sources = self.sources.len(),
            "Starting scrape"
        );
        if let Some(bar) = &self.progress {
            bar.set_length(plan.segments.len() as u64);
        }

        let mut report = RunReport::default();
        for segment in &plan.segments {
            if self.shutdown_requested() {
                return Err(RunError::Cancelled {
                    completed: report.segments.len(),
                });
            }
            if let Some(bar) = &self.progress {
                bar.set_message(format!("{} ({})", segment.year, plan.pacing));
            }

            let span = info_span!("segment", year = segment.year);
            let segment_report = self
                .run_segment(*segment, plan.pacing, report.segments.len())
                .instrument(span)
                .await?;

            report.stats += segment_report.stats;
            report.segments.push(segment_report);
            if let Some(bar) = &self.progress {
                bar.inc(1);
            }
        }

        info!(
            new = report.stats.new,
            changed = report.stats.changed,
            deleted = report.stats.deleted,
            failed = report.failed_segments().count(),
            "Scrape finished"
        );
        Ok(report)
    }

    async fn run_segment(
        &self,
        segment: Segment,
        mode: PacingMode,
        completed: usize,
    ) -> Result<SegmentReport, RunError> {
        let metrics = SegmentMetrics::start(segment.year);
        let worker = SegmentWorker::new(segment, mode, &self.sources, self.shutdown.as_ref());

        let batch = match worker.collect().await {
            Ok(batch) => batch,
            Err(WorkerError::Cancelled) => {
                info!(year = segment.year, "Shutdown requested, segment discarded");
                return Err(RunError::Cancelled { completed });
            }
            Err(WorkerError::Fetch { source, error }) => {
                return match error {
                    FetchError::Network { .. } | FetchError::Parse { .. } => {
                        metrics.record_failure(&error.to_string());
                        Ok(SegmentReport {
                            segment,
                            outcome: SegmentOutcome::Failed {
                                source,
                                error: error.to_string(),
                            },
                            fetched: 0,
                            rejected: 0,
                            stats: ChangeStats::default(),
                        })
                    }
                    FetchError::Cloudflare { .. } | FetchError::Setup(_) => {
                        Err(RunError::Fetch(error))
                    }
                };
            }
        };

        let fetched = batch.events.len();
        let (stats, written, saved_any) = self.commit_batch(segment, batch.events, batch.listed)?;
        metrics.record_success(fetched);

        Ok(SegmentReport {
            segment,
            outcome: if saved_any {
                SegmentOutcome::Saved { written }
            } else {
                SegmentOutcome::Empty
            },
            fetched,
            rejected: batch.rejected,
            stats,
        })
    }

    /// Commit a segment's events, routing each to its start year
    fn commit_batch(
        &self,
        segment: Segment,
        events: Vec<Event>,
        listed: BTreeSet<String>,
    ) -> Result<(ChangeStats, bool, bool), RunError> {
        let mut by_year: BTreeMap<i32, Vec<Event>> = BTreeMap::new();
        by_year.entry(segment.year).or_default();
        for event in events {
            by_year.entry(event.year()).or_default().push(event);
        }

        let restriction = self.restrict_to.as_ref().map(|source| SourceRestriction {
            source: source.clone(),
            start: segment.start,
            end: segment.end,
            listed,
        });

        let mut stats = ChangeStats::default();
        let mut written = false;
        let mut saved_any = false;
        for (year, events) in by_year {
            let restriction = restriction.as_ref().filter(|_| year == segment.year);
            let outcome = self.store.commit(year, events, restriction)?;
            stats += outcome.stats;
            if let Some(saved) = outcome.saved {
                record_partition_saved(year, saved.written);
                written |= saved.written;
                saved_any = true;
            }
        }

        Ok((stats, written, saved_any))
    }
}

/// Default window when no range is given: four weeks back, 456 days long
pub fn default_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    use super::config::{DEFAULT_RANGE_DAYS, HISTORY_LOOKBACK_DAYS};
    let start = today - chrono::Duration::days(HISTORY_LOOKBACK_DAYS);
    (start, start + chrono::Duration::days(DEFAULT_RANGE_DAYS))
}
