//! Run metrics
//!
//! Counters and histograms go through the `metrics` facade, so recording is
//! a no-op until [`init_metrics`] installs the Prometheus exporter
//! (`--metrics-addr`).

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

static METRICS_INITIALIZED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Install the Prometheus exporter and describe the metrics
///
/// Idempotent; a second call is a no-op.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.lock().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "fetch_requests_total",
        Unit::Count,
        "Requests sent to event sources, by outcome"
    );
    describe_counter!(
        "fetch_escalations_total",
        Unit::Count,
        "Escalations to the browser challenge tier"
    );
    describe_counter!("fetch_retries_total", Unit::Count, "Backoff retries after hard failures");
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_histogram!(
        "pacing_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for the pacing window, by mode"
    );
    describe_counter!(
        "partitions_saved_total",
        Unit::Count,
        "Partition saves, by whether the file changed"
    );
    describe_counter!(
        "events_rejected_total",
        Unit::Count,
        "Records dropped before merge, by reason"
    );
    describe_counter!("segments_total", Unit::Count, "Processed segments, by outcome");

    *initialized = true;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Whether [`init_metrics`] has completed
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.lock().await
}

/// Record a backoff before retry number `attempt`
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!("fetch_retries_total", "attempt" => attempt.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());
    debug!(attempt, backoff_ms = duration.as_millis() as u64, "Retry backoff recorded");
}

/// Record a partition save
pub fn record_partition_saved(year: i32, written: bool) {
    let outcome = if written { "written" } else { "unchanged" };
    counter!("partitions_saved_total", "outcome" => outcome).increment(1);
    debug!(year, outcome, "Partition save recorded");
}

/// Record a record dropped before merge
pub fn record_rejected(reason: &'static str) {
    counter!("events_rejected_total", "reason" => reason).increment(1);
}

/// Timing and outcome of one segment
pub struct SegmentMetrics {
    year: i32,
    start_time: Instant,
}

impl SegmentMetrics {
    /// Start tracking the segment for `year`
    pub fn start(year: i32) -> Self {
        Self {
            year,
            start_time: Instant::now(),
        }
    }

    /// Segment merged and saved
    pub fn record_success(&self, events: usize) {
        counter!("segments_total", "outcome" => "saved").increment(1);
        info!(
            year = self.year,
            events,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Segment completed"
        );
    }

    /// Segment aborted, later segments continue
    pub fn record_failure(&self, error: &str) {
        counter!("segments_total", "outcome" => "failed").increment(1);
        error!(
            year = self.year,
            error = %error,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Segment failed"
        );
    }
}
