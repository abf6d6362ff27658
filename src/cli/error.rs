//! CLI error types and exit codes

use crate::downloader::{PlanError, RunError};
use crate::fetcher::FetchError;
use crate::identifier::IdentifierError;
use crate::registry::RegistryError;
use crate::store::StoreError;

/// Process exit code for configuration errors
pub const EXIT_CONFIGURATION: i32 = 2;
/// Process exit code for network or challenge-bypass failures
pub const EXIT_NETWORK: i32 = 3;
/// Process exit code for storage failures
pub const EXIT_STORAGE: i32 = 4;
/// Process exit code after Ctrl+C
pub const EXIT_CANCELLED: i32 = 130;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Invalid argument combination, path or parser selection
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed event id
    #[error("identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    /// Unknown source or broken registry
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Invalid date range
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Fetch layer could not be set up
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Run aborted
    #[error(transparent)]
    Run(#[from] RunError),

    /// Storage failure outside a run
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Run completed but some segments were aborted
    #[error("{failed} segment(s) failed; rerun to fill them in")]
    SegmentsFailed {
        /// Number of aborted segments
        failed: usize,
    },
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Identifier(_) | Self::Registry(_) | Self::Plan(_) => {
                EXIT_CONFIGURATION
            }
            Self::Fetch(FetchError::Setup(_)) | Self::Run(RunError::Fetch(FetchError::Setup(_))) => 1,
            Self::Fetch(_) | Self::SegmentsFailed { .. } => EXIT_NETWORK,
            Self::Run(RunError::Fetch(_)) => EXIT_NETWORK,
            Self::Run(RunError::Store(_)) | Self::Store(_) => EXIT_STORAGE,
            Self::Run(RunError::Cancelled { .. }) => EXIT_CANCELLED,
        }
    }

    /// Correction hint, if there is a useful one
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Configuration(_) => Some("Run with --help to see the accepted options"),
            Self::Identifier(_) => {
                Some("Ids look like SWE_50597 or MAN_SWE_ORINGEN2025")
            }
            Self::Registry(_) => Some("Run `sources list` to see the known source codes"),
            Self::Plan(_) => Some("--start-date must not be after --end-date"),
            Self::Fetch(e) => Some(e.suggestion()),
            Self::Run(e) => Some(e.suggestion()),
            Self::Store(e) => Some(e.suggestion()),
            Self::SegmentsFailed { .. } => None,
        }
    }
}
