//! Scrape command implementation

use chrono::{NaiveDate, Utc};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{CliError, OutputFormat};
use crate::downloader::config::{
    CHALLENGE_TIMEOUT_SECS, DEFAULT_RANGE_DAYS, INITIAL_BACKOFF_MS, MAX_ATTEMPTS, MAX_BACKOFF_MS,
};
use crate::downloader::executor::default_range;
use crate::downloader::{PacingWindow, Plan, RunReport, ScrapeExecutor, SegmentOutcome, SegmentPlanner};
use crate::fetcher::{
    CookieCache, DocumentParser, EventSource, FetchClient, FetchConfig, ParserRegistry, RemoteSource,
};
use crate::registry::{SourceDescriptor, SourceRegistry};
use crate::shutdown::SharedShutdown;
use crate::store::PartitionStore;

/// Arguments for `scrape`
#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// First day to fetch (YYYY-MM-DD, default: four weeks ago)
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last day to fetch (YYYY-MM-DD, default: start + 456 days)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Dataset root; partitions go to <output>/<year>/events.json
    #[arg(long, default_value = "data/events")]
    pub output: PathBuf,

    /// Refresh a single source (e.g. SWE); its records missing from the
    /// fetched window are removed
    #[arg(long)]
    pub source: Option<String>,

    /// Attempts per request on timeouts, connection errors and 5xx (1-20)
    #[arg(long, default_value_t = MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Delay window between requests for recent ranges, MIN-MAX seconds
    #[arg(long, default_value = "1-3")]
    pub standard_pacing: PacingWindow,

    /// Delay window between requests for history backfills, MIN-MAX seconds
    #[arg(long, default_value = "5-15")]
    pub history_pacing: PacingWindow,

    /// Seconds to wait for a browser challenge to resolve
    #[arg(long, default_value_t = CHALLENGE_TIMEOUT_SECS)]
    pub challenge_timeout: u64,

    /// Persist bypass credentials in this file between runs
    #[arg(long)]
    pub cookie_file: Option<PathBuf>,

    /// Discard persisted credentials older than this
    #[arg(long, default_value_t = 12)]
    pub cookie_ttl_hours: i64,

    /// Document parser for every source, overriding the registry
    #[arg(long)]
    pub parser: Option<String>,

    /// Run the challenge browser without a window
    #[arg(long, default_value_t = false)]
    pub headless: bool,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Hide the progress bar
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

/// Everything a run needs, checked before touching network or disk
struct Prepared {
    plan: Plan,
    descriptors: Vec<SourceDescriptor>,
    parsers: Vec<Arc<dyn DocumentParser>>,
}

impl ScrapeArgs {
    /// Resolve the requested range against `today`
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let (default_start, default_end) = default_range(today);
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => (start, end),
            (Some(start), None) => (start, start + chrono::Duration::days(DEFAULT_RANGE_DAYS)),
            (None, Some(end)) => (default_start, end),
            (None, None) => (default_start, default_end),
        }
    }

    /// Runtime fetch configuration from the flags
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            standard_pacing: self.standard_pacing,
            history_pacing: self.history_pacing,
            max_attempts: self.max_retries,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            jitter: true,
            challenge_timeout: Duration::from_secs(self.challenge_timeout),
            headless: self.headless,
        }
    }

    fn prepare(&self, today: NaiveDate) -> Result<Prepared, CliError> {
        let (start, end) = self.date_range(today);
        let plan = SegmentPlanner::default().plan(start, end, today)?;

        if self.output.is_file() {
            return Err(CliError::Configuration(format!(
                "output {} is a file, expected a directory",
                self.output.display()
            )));
        }
        if self.cookie_ttl_hours <= 0 {
            return Err(CliError::Configuration(
                "--cookie-ttl-hours must be positive".to_string(),
            ));
        }

        let registry = SourceRegistry::load_embedded()?;
        let descriptors: Vec<SourceDescriptor> = match &self.source {
            Some(code) => vec![registry.resolve(&code.to_uppercase())?.clone()],
            None => registry.list_all().into_iter().cloned().collect(),
        };

        let available = ParserRegistry::with_builtin();
        let parsers = descriptors
            .iter()
            .map(|descriptor| {
                let name = self.parser.as_deref().unwrap_or(descriptor.parser());
                available.get(name).ok_or_else(|| {
                    CliError::Configuration(format!(
                        "no document parser '{name}' for source {} (available: {}); pass --parser",
                        descriptor.code(),
                        available.names().join(", ")
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Prepared {
            plan,
            descriptors,
            parsers,
        })
    }

    /// Execute the scrape
    pub async fn execute(
        &self,
        format: OutputFormat,
        shutdown: SharedShutdown,
    ) -> Result<RunReport, CliError> {
        let today = Utc::now().date_naive();
        let Prepared {
            plan,
            descriptors,
            parsers,
        } = self.prepare(today)?;

        if let Some(addr) = self.metrics_addr {
            crate::metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::Configuration(e.to_string()))?;
        }

        let store = PartitionStore::open(&self.output)?
            .with_sources(descriptors.iter().map(SourceDescriptor::meta));

        let cookies = Arc::new(match &self.cookie_file {
            Some(path) => CookieCache::load(path, chrono::Duration::hours(self.cookie_ttl_hours))?,
            None => CookieCache::new(),
        });
        let client = Arc::new(FetchClient::with_cookies(&self.fetch_config(), cookies.clone())?);

        let codes: Vec<String> = descriptors.iter().map(|d| d.code().to_string()).collect();
        let sources: Vec<Arc<dyn EventSource>> = descriptors
            .into_iter()
            .zip(parsers)
            .map(|(descriptor, parser)| {
                Arc::new(RemoteSource::new(descriptor, client.clone(), parser)) as Arc<dyn EventSource>
            })
            .collect();

        let mut executor = ScrapeExecutor::new(store, sources).with_shutdown(shutdown);
        if let Some(code) = &self.source {
            executor = executor.restrict_to(code.to_uppercase());
        }
        let progress = (!self.no_progress && format == OutputFormat::Human)
            .then(|| create_progress_bar(&plan));
        if let Some(bar) = &progress {
            executor = executor.with_progress(bar.clone());
        }

        info!(
            start = %plan.start,
            end = %plan.end,
            pacing = %plan.pacing,
            sources = %codes.join(","),
            output = %self.output.display(),
            "Scrape requested"
        );
        let result = executor.run(&plan).await;

        if let Some(bar) = progress {
            bar.finish_and_clear();
        }
        if let Some(path) = &self.cookie_file {
            if let Err(e) = cookies.save(path) {
                warn!(path = %path.display(), error = %e, "Failed to persist credentials");
            }
        }

        let report = result?;
        match format {
            OutputFormat::Json => output_json(&plan, &codes, &report),
            OutputFormat::Human => output_human(&plan, &codes, &report, today),
        }

        let failed = report.failed_segments().count();
        if failed > 0 {
            return Err(CliError::SegmentsFailed { failed });
        }
        Ok(report)
    }
}

fn output_json(plan: &Plan, codes: &[String], report: &RunReport) {
    let segments: Vec<serde_json::Value> = report
        .segments
        .iter()
        .map(|s| {
            let (status, error) = match &s.outcome {
                SegmentOutcome::Saved { written: true } => ("written", None),
                SegmentOutcome::Saved { written: false } => ("unchanged", None),
                SegmentOutcome::Empty => ("empty", None),
                SegmentOutcome::Failed { source, error } => {
                    ("failed", Some(format!("{source}: {error}")))
                }
            };
            serde_json::json!({
                "year": s.segment.year,
                "status": status,
                "fetched": s.fetched,
                "rejected": s.rejected,
                "error": error,
            })
        })
        .collect();

    let output = serde_json::json!({
        "success": !report.has_failures(),
        "start_date": plan.start,
        "end_date": plan.end,
        "pacing": plan.pacing,
        "sources": codes,
        "new": report.stats.new,
        "changed": report.stats.changed,
        "deleted": report.stats.deleted,
        "segments": segments,
    });
    println!("{output}");
}

fn output_human(plan: &Plan, codes: &[String], report: &RunReport, today: NaiveDate) {
    println!("\nScrape finished: {report}");
    for failed in report.failed_segments() {
        if let SegmentOutcome::Failed { source, error } = &failed.outcome {
            eprintln!("  {} failed ({source}): {error}", failed.segment.year);
        }
    }
    if !report.stats.is_empty() {
        println!(
            "\n{}",
            report.stats.summary_message(today, plan.start, plan.end, codes)
        );
    }
}

fn create_progress_bar(plan: &Plan) -> ProgressBar {
    let pb = ProgressBar::new(plan.segments.len() as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} years {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}
