//! Browser escalation tier
//!
//! When the primary transport hits a managed challenge, a real Chromium
//! instance opens the site, waits for the interstitial to clear and hands
//! back its cookies and user agent.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cookies::{Cookie, Credential};

/// Page titles shown while a challenge is still running
const CHALLENGE_TITLES: &[&str] = &["Just a moment", "Checking your browser", "Attention Required"];

/// Poll interval while waiting for the challenge to clear
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Browser tier failures
#[derive(Debug, thiserror::Error)]
pub enum ChallengeError {
    /// Browser could not be started
    #[error("browser launch failed: {0}")]
    Launch(String),

    /// Challenge still showing when the wait ran out
    #[error("challenge not solved within {0:?}")]
    Timeout(Duration),

    /// Browser-side failure while solving
    #[error("browser error: {0}")]
    Browser(String),
}

/// Solves anti-bot challenges for a URL
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    /// Pass the challenge guarding `url` and return the earned credential
    async fn solve(&self, url: &str, timeout: Duration) -> Result<Credential, ChallengeError>;
}

/// Whether a page title still belongs to the challenge interstitial
pub fn is_challenge_title(title: &str) -> bool {
    CHALLENGE_TITLES.iter().any(|marker| title.contains(marker))
}

/// Chromium-driven solver
#[derive(Debug, Clone, Default)]
pub struct ChromeSolver {
    headless: bool,
}

impl ChromeSolver {
    /// Create a solver; managed challenges pass more reliably with a window
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }

    async fn wait_for_clearance(browser: &Browser, url: &str) -> Result<Credential, ChallengeError> {
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| ChallengeError::Browser(e.to_string()))?;

        let mut polls = 0u32;
        loop {
            let title = page
                .get_title()
                .await
                .map_err(|e| ChallengeError::Browser(e.to_string()))?
                .unwrap_or_default();
            if !is_challenge_title(&title) {
                debug!(title = %title, polls, "Challenge cleared");
                return Self::extract_credential(&page).await;
            }
            if polls % 10 == 0 {
                debug!(polls, "Waiting for challenge to clear");
            }
            polls += 1;
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn extract_credential(page: &Page) -> Result<Credential, ChallengeError> {
        let cookies: Vec<Cookie> = page
            .get_cookies()
            .await
            .map_err(|e| ChallengeError::Browser(e.to_string()))?
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
            })
            .collect();

        let user_agent: String = page
            .evaluate("navigator.userAgent")
            .await
            .map_err(|e| ChallengeError::Browser(e.to_string()))?
            .into_value()
            .map_err(|e| ChallengeError::Browser(e.to_string()))?;

        Ok(Credential {
            cookies,
            user_agent,
            acquired_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ChallengeSolver for ChromeSolver {
    async fn solve(&self, url: &str, timeout: Duration) -> Result<Credential, ChallengeError> {
        let origin = origin_of(url);
        info!(origin = %origin, headless = self.headless, "Opening browser to pass challenge");

        let mut builder = BrowserConfig::builder().no_sandbox();
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(ChallengeError::Launch)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ChallengeError::Launch(e.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let result = match tokio::time::timeout(timeout, Self::wait_for_clearance(&browser, &origin)).await
        {
            Ok(result) => result,
            Err(_) => Err(ChallengeError::Timeout(timeout)),
        };

        if let Err(e) = browser.close().await {
            warn!(error = %e, "Failed to close browser");
        }
        let _ = browser.wait().await;
        handler_task.abort();

        if let Ok(credential) = &result {
            info!(
                origin = %origin,
                cookies = credential.cookies.len(),
                "Browser passed challenge"
            );
        }
        result
    }
}

/// `scheme://host[:port]/` of a URL; the challenge is solved on the site root
fn origin_of(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => format!("{}/", parsed.origin().ascii_serialization()),
        Err(_) => url.to_string(),
    }
}
