//! Randomized request pacing
//!
//! Eventor instances behind Cloudflare flag clients that hit them at a steady
//! cadence. Every request therefore starts a random delay after the start of
//! the previous one, drawn from the window of the active [`PacingMode`].

use metrics::histogram;
use rand::Rng;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use super::config::{HISTORY_PACING_SECS, STANDARD_PACING_SECS};
use super::segment::PacingMode;

/// Inclusive range a pacing delay is drawn from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingWindow {
    /// Shortest delay
    pub min: Duration,
    /// Longest delay
    pub max: Duration,
}

impl PacingWindow {
    /// Build a window from seconds
    pub fn from_secs(min: f64, max: f64) -> Self {
        Self {
            min: Duration::from_secs_f64(min.max(0.0)),
            max: Duration::from_secs_f64(max.max(0.0)),
        }
    }

    /// Default window for standard runs
    pub fn standard() -> Self {
        Self::from_secs(STANDARD_PACING_SECS.0, STANDARD_PACING_SECS.1)
    }

    /// Default window for history backfills
    pub fn history() -> Self {
        Self::from_secs(HISTORY_PACING_SECS.0, HISTORY_PACING_SECS.1)
    }

    /// Draw a delay uniformly from the window
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

impl fmt::Display for PacingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}s", self.min.as_secs_f64(), self.max.as_secs_f64())
    }
}

impl FromStr for PacingWindow {
    type Err = String;

    /// Parse `MIN-MAX` in seconds, e.g. `1-3` or `2.5-8`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid pacing window '{s}'. Expected MIN-MAX in seconds"))?;
        let min: f64 = min
            .trim()
            .parse()
            .map_err(|_| format!("Invalid pacing minimum '{min}'"))?;
        let max: f64 = max
            .trim()
            .parse()
            .map_err(|_| format!("Invalid pacing maximum '{max}'"))?;
        if min < 0.0 || max < min {
            return Err(format!(
                "Invalid pacing window '{s}'. Need 0 <= MIN <= MAX"
            ));
        }
        Ok(Self::from_secs(min, max))
    }
}

/// Spaces out request starts according to the pacing mode
#[derive(Debug)]
pub struct Pacer {
    standard: PacingWindow,
    history: PacingWindow,
    last_start: Mutex<Option<Instant>>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(PacingWindow::standard(), PacingWindow::history())
    }
}

impl Pacer {
    /// Create a pacer with explicit windows
    pub fn new(standard: PacingWindow, history: PacingWindow) -> Self {
        Self {
            standard,
            history,
            last_start: Mutex::new(None),
        }
    }

    /// Window used for the given mode
    pub fn window(&self, mode: PacingMode) -> PacingWindow {
        match mode {
            PacingMode::Standard => self.standard,
            PacingMode::History => self.history,
        }
    }

    /// Wait until the next request may start and mark it as started
    ///
    /// The first request goes out immediately. Returns the time spent waiting.
    pub async fn pace(&self, mode: PacingMode) -> Duration {
        let mut last_start = self.last_start.lock().await;

        let waited = match *last_start {
            Some(previous) => {
                let target = previous + self.window(mode).sample();
                let now = Instant::now();
                if target > now {
                    debug!(mode = %mode, delay_ms = (target - now).as_millis() as u64, "Pacing request");
                    sleep_until(target).await;
                    target - now
                } else {
                    Duration::ZERO
                }
            }
            None => Duration::ZERO,
        };

        *last_start = Some(Instant::now());
        histogram!("pacing_wait_seconds", "mode" => mode.to_string()).record(waited.as_secs_f64());
        waited
    }
}
