//! Resilient fetch client
//!
//! Every call is paced, sent through the primary transport with any cached
//! credential, and classified:
//!
//! - 2xx: body returned
//! - 403 from a Cloudflare edge with a challenge page: escalate to the
//!   browser tier once, then retry with the earned credential
//! - timeouts, connection errors, 408, 429, 5xx: exponential backoff up to
//!   the attempt ceiling
//! - any other 4xx: fail immediately

use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::challenge::{ChallengeSolver, ChromeSolver};
use super::cookies::CookieCache;
use super::retry_formatter::{RetryContext, RetryErrorType};
use super::transport::{FetchResponse, ReqwestTransport, Transport};
use super::{FetchConfig, FetchError, FetchResult};
use crate::downloader::config::{backoff_with, with_jitter};
use crate::downloader::rate_limit::Pacer;
use crate::downloader::segment::PacingMode;
use crate::metrics::record_retry_backoff;

/// Body fragments that identify a Cloudflare challenge page
const CHALLENGE_MARKERS: &[&str] = &["Just a moment", "cType: 'managed'", "challenge-platform"];

/// Backoff policy for hard failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl RetryPolicy {
    /// Delay before the retry following `failures` consecutive hard failures
    pub fn backoff(&self, failures: u32) -> Duration {
        let base = backoff_with(
            failures.saturating_sub(1),
            self.initial_backoff.as_millis() as u64,
            self.max_backoff.as_millis() as u64,
        );
        if self.jitter {
            with_jitter(base)
        } else {
            base
        }
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            jitter: config.jitter,
        }
    }
}

/// How a single attempt ended
enum Attempt {
    Success(String),
    Challenge(String),
    Hard {
        status: Option<u16>,
        error_type: RetryErrorType,
        message: String,
    },
    Permanent {
        status: u16,
        error_type: RetryErrorType,
    },
}

/// Two-tier fetch client shared by all sources of a run
pub struct FetchClient {
    transport: Arc<dyn Transport>,
    solver: Arc<dyn ChallengeSolver>,
    cookies: Arc<CookieCache>,
    pacer: Pacer,
    retry: RetryPolicy,
    challenge_timeout: Duration,
}

impl FetchClient {
    /// Assemble a client from its collaborators
    pub fn new(
        transport: Arc<dyn Transport>,
        solver: Arc<dyn ChallengeSolver>,
        cookies: Arc<CookieCache>,
        config: &FetchConfig,
    ) -> Self {
        Self {
            transport,
            solver,
            cookies,
            pacer: Pacer::new(config.standard_pacing, config.history_pacing),
            retry: RetryPolicy::from(config),
            challenge_timeout: config.challenge_timeout,
        }
    }

    /// reqwest transport, Chromium solver and a fresh cookie cache
    pub fn from_config(config: &FetchConfig) -> FetchResult<Self> {
        Self::with_cookies(config, Arc::new(CookieCache::new()))
    }

    /// Production collaborators around an existing cookie cache
    pub fn with_cookies(config: &FetchConfig, cookies: Arc<CookieCache>) -> FetchResult<Self> {
        let transport = ReqwestTransport::new().map_err(|e| FetchError::Setup(e.to_string()))?;
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(ChromeSolver::new(config.headless)),
            cookies,
            config,
        ))
    }

    /// Credential store used by this client
    pub fn cookies(&self) -> &Arc<CookieCache> {
        &self.cookies
    }

    /// Fetch `url` with query `params`, returning the body text
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] with `retryable = true` after the attempt
    ///   ceiling of hard failures, `retryable = false` on other 4xx
    /// - [`FetchError::Cloudflare`] when the browser tier fails or the
    ///   challenge persists after one escalation
    pub async fn fetch(
        &self,
        url: &str,
        params: &[(&str, String)],
        mode: PacingMode,
    ) -> FetchResult<String> {
        let full_url = build_url(url, params)?;
        let domain = full_url.host_str().unwrap_or_default().to_string();
        let url = full_url.as_str();

        self.pacer.pace(mode).await;

        let mut hard_failures = 0u32;
        let mut escalated = false;

        loop {
            let credential = self.cookies.get(&domain);
            debug!(url, with_credential = credential.is_some(), "Sending request");

            let attempt = match self.transport.get(url, credential.as_ref()).await {
                Ok(response) => classify(response),
                Err(e) => Attempt::Hard {
                    status: None,
                    error_type: RetryErrorType::from_transport(&e),
                    message: e.to_string(),
                },
            };

            match attempt {
                Attempt::Success(body) => {
                    counter!("fetch_requests_total", "outcome" => "success").increment(1);
                    if hard_failures > 0 {
                        info!(url, attempts = hard_failures + 1, "Request succeeded after retry");
                    }
                    return Ok(body);
                }
                Attempt::Challenge(challenge) => {
                    counter!("fetch_requests_total", "outcome" => "challenge").increment(1);
                    if escalated {
                        warn!(url, challenge = %challenge, "Challenge persisted after escalation");
                        return Err(FetchError::Cloudflare {
                            url: url.to_string(),
                            challenge,
                            message: "challenge still served after browser escalation".to_string(),
                        });
                    }
                    escalated = true;

                    if credential.is_some() {
                        info!(domain = %domain, "Cached credential rejected, escalating again");
                        self.cookies.invalidate(&domain);
                    } else {
                        info!(domain = %domain, challenge = %challenge, "Challenge detected, escalating to browser");
                    }

                    counter!("fetch_escalations_total").increment(1);
                    let fresh = self
                        .solver
                        .solve(url, self.challenge_timeout)
                        .await
                        .map_err(|e| FetchError::Cloudflare {
                            url: url.to_string(),
                            challenge: challenge.clone(),
                            message: e.to_string(),
                        })?;
                    self.cookies.put(&domain, fresh);
                }
                Attempt::Hard {
                    status,
                    error_type,
                    message,
                } => {
                    counter!("fetch_requests_total", "outcome" => "hard_failure").increment(1);
                    hard_failures += 1;
                    let backoff = self.retry.backoff(hard_failures);
                    let context = RetryContext {
                        attempt: hard_failures,
                        max_attempts: self.retry.max_attempts,
                        error_type,
                        backoff_duration: backoff,
                        error_message: message.clone(),
                        url: url.to_string(),
                    };

                    if hard_failures >= self.retry.max_attempts {
                        warn!("{}", context.format_failure());
                        return Err(FetchError::Network {
                            url: url.to_string(),
                            status,
                            retryable: true,
                            message: format!(
                                "{} after {hard_failures} attempts: {message}",
                                error_type.description()
                            ),
                        });
                    }

                    warn!("{}", context.format_retry());
                    record_retry_backoff(backoff, hard_failures);
                    tokio::time::sleep(backoff).await;
                }
                Attempt::Permanent { status, error_type } => {
                    counter!("fetch_requests_total", "outcome" => "rejected").increment(1);
                    warn!(url, status, "Request rejected: {}", error_type.description());
                    return Err(FetchError::Network {
                        url: url.to_string(),
                        status: Some(status),
                        retryable: false,
                        message: format!("HTTP {status}: {}", error_type.description()),
                    });
                }
            }
        }
    }
}

fn build_url(url: &str, params: &[(&str, String)]) -> FetchResult<reqwest::Url> {
    let parsed = if params.is_empty() {
        reqwest::Url::parse(url)
    } else {
        reqwest::Url::parse_with_params(url, params)
    };
    let parsed = parsed.map_err(|e| FetchError::Network {
        url: url.to_string(),
        status: None,
        retryable: false,
        message: format!("invalid URL: {e}"),
    })?;
    if parsed.host_str().is_none() {
        return Err(FetchError::Network {
            url: url.to_string(),
            status: None,
            retryable: false,
            message: "URL has no host".to_string(),
        });
    }
    Ok(parsed)
}

fn classify(response: FetchResponse) -> Attempt {
    if (200..300).contains(&response.status) {
        return Attempt::Success(response.body);
    }
    if let Some(challenge) = detect_challenge(&response) {
        return Attempt::Challenge(challenge);
    }

    let error_type = RetryErrorType::from_status(response.status);
    if error_type.is_retryable() {
        Attempt::Hard {
            status: Some(response.status),
            error_type,
            message: format!("HTTP {}", response.status),
        }
    } else {
        Attempt::Permanent {
            status: response.status,
            error_type,
        }
    }
}

/// Challenge kind if the response is a Cloudflare soft-block
pub fn detect_challenge(response: &FetchResponse) -> Option<String> {
    if response.status != 403 {
        return None;
    }

    let mitigated = response.header("cf-mitigated");
    let from_cloudflare = mitigated.is_some()
        || response
            .header("server")
            .map(|s| s.to_lowercase().contains("cloudflare"))
            .unwrap_or(false);
    if !from_cloudflare {
        return None;
    }

    if !CHALLENGE_MARKERS.iter().any(|m| response.body.contains(m)) {
        return None;
    }

    Some(mitigated.unwrap_or("managed").to_string())
}
