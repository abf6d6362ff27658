//! Failure classification and retry log messages for the fetch client.

use reqwest::StatusCode;
use std::time::Duration;

use super::transport::TransportError;

/// Classification of request failures for retry decisions and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Network timeout or connection stalled long enough to trigger a timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 408 request timeout
    RequestTimeout,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 403 without a challenge page
    Forbidden,
    /// Other client errors (4xx)
    ClientError(u16),
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Classify a received status that is neither success nor a challenge.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => Self::RequestTimeout,
            429 => Self::RateLimit,
            403 => Self::Forbidden,
            s if StatusCode::from_u16(s).map(|c| c.is_server_error()).unwrap_or(false) => {
                Self::ServerError(s)
            }
            s if (400..500).contains(&s) => Self::ClientError(s),
            _ => Self::NetworkGeneric,
        }
    }

    /// Classify a failure where no response arrived.
    pub fn from_transport(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::NetworkTimeout,
            TransportError::Connect(_) => Self::NetworkOffline,
            TransportError::Other(_) => Self::NetworkGeneric,
        }
    }

    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RequestTimeout => "request timeout (408)",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::Forbidden => "access forbidden (403)",
            Self::ClientError(code) => match code {
                404 => "resource not found",
                410 => "resource gone",
                _ => "client error",
            },
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented after final failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::RequestTimeout | Self::RateLimit => {
                "Slow down with a wider --standard-pacing or --history-pacing window"
            }
            Self::ServerError(_) => "The source may be experiencing issues, try again later",
            Self::Forbidden => "The source blocked the request outright; wait before retrying",
            Self::ClientError(_) => "Review the source registry entry and request parameters",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the failure is worth another attempt within the same call.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Forbidden | Self::ClientError(_))
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Original error message for details
    pub error_message: String,
    /// URL that failed
    pub url: String,
}

impl RetryContext {
    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt + 1,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.url
        )
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!("Request failed after {} attempts", self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  URL: {}", self.url),
            "  Suggestions:".to_string(),
        ];
        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        vec![
            self.error_type.suggestion().to_string(),
            format!("Try increasing --max-retries (current: {})", self.max_attempts),
        ]
    }
}
