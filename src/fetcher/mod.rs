//! Fetching from remote event sources
//!
//! [`FetchClient`] is the resilience layer: pacing, retry with backoff and
//! the two-tier Cloudflare bypass. [`EventSource`] is the capability the
//! orchestrator drives; [`RemoteSource`] implements it on top of a
//! `FetchClient` and a [`DocumentParser`].

use async_trait::async_trait;
use std::time::Duration;

use crate::downloader::config::{
    CHALLENGE_TIMEOUT_SECS, INITIAL_BACKOFF_MS, MAX_ATTEMPTS, MAX_BACKOFF_MS,
};
use crate::downloader::rate_limit::PacingWindow;
use crate::downloader::segment::{PacingMode, Segment};
use crate::{Event, EventSummary};

pub mod challenge;
pub mod client;
pub mod cookies;
pub mod parser;
pub mod remote;
pub mod retry_formatter;
pub mod transport;

pub use challenge::{ChallengeError, ChallengeSolver, ChromeSolver};
pub use client::{FetchClient, RetryPolicy};
pub use cookies::{Cookie, CookieCache, Credential};
pub use parser::{DocumentParser, JsonDocumentParser, ParseError, ParserRegistry};
pub use remote::RemoteSource;
pub use transport::{FetchResponse, ReqwestTransport, Transport, TransportError};

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Request failed at the network or HTTP level
    #[error("network error for {url}: {message}")]
    Network {
        /// Requested URL
        url: String,
        /// HTTP status if a response was received
        status: Option<u16>,
        /// Whether a later run may succeed
        retryable: bool,
        /// Failure description
        message: String,
    },

    /// Anti-bot challenge could not be passed
    #[error("cloudflare {challenge} challenge at {url}: {message}")]
    Cloudflare {
        /// Requested URL
        url: String,
        /// Challenge kind reported by the edge
        challenge: String,
        /// Failure description
        message: String,
    },

    /// Document could not be parsed
    #[error("parse error for {url}: {message}")]
    Parse {
        /// URL of the document
        url: String,
        /// Parser message
        message: String,
    },

    /// Client could not be constructed
    #[error("fetch client setup failed: {0}")]
    Setup(String),
}

impl FetchError {
    /// Whether the failure is transient
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { retryable, .. } => *retryable,
            FetchError::Cloudflare { .. } | FetchError::Parse { .. } | FetchError::Setup(_) => {
                false
            }
        }
    }

    /// Correction hint shown with the error
    pub fn suggestion(&self) -> &'static str {
        match self {
            FetchError::Network { retryable: true, .. } => {
                "The source kept failing; check connectivity or rerun later, finished years are kept"
            }
            FetchError::Network { retryable: false, .. } => {
                "The source rejected the request; check the source registry entry and parameters"
            }
            FetchError::Cloudflare { .. } => {
                "Run the browser tier with a visible window (omit --headless) or wait before retrying"
            }
            FetchError::Parse { .. } => "The page layout may have changed; update the parser",
            FetchError::Setup(_) => "Check the TLS setup and browser installation",
        }
    }
}

/// Result type for fetcher operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Runtime knobs of the fetch layer
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Pacing window for standard runs
    pub standard_pacing: PacingWindow,
    /// Pacing window for history backfills
    pub history_pacing: PacingWindow,
    /// Attempts per request on hard failures
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Add random jitter to backoff delays
    pub jitter: bool,
    /// Upper bound for a browser challenge
    pub challenge_timeout: Duration,
    /// Run the challenge browser without a window
    pub headless: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            standard_pacing: PacingWindow::standard(),
            history_pacing: PacingWindow::history(),
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            jitter: true,
            challenge_timeout: Duration::from_secs(CHALLENGE_TIMEOUT_SECS),
            headless: false,
        }
    }
}

/// A source of events the orchestrator can drive
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Source code, the id prefix of every event it yields
    fn code(&self) -> &str;

    /// Fetch listing-level summaries of events inside a segment
    async fn fetch_listing(
        &self,
        segment: &Segment,
        mode: PacingMode,
    ) -> FetchResult<Vec<EventSummary>>;

    /// Fetch and parse the full record behind a summary
    async fn fetch_detail(&self, summary: &EventSummary, mode: PacingMode) -> FetchResult<Event>;
}
