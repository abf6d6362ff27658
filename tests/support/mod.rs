//! Scripted fakes shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mtbo_event_scraper::downloader::{PacingMode, PacingWindow, Segment};
use mtbo_event_scraper::fetcher::{
    ChallengeError, ChallengeSolver, Cookie, CookieCache, Credential, EventSource, FetchClient,
    FetchConfig, FetchError, FetchResponse, FetchResult, Transport, TransportError,
};
use mtbo_event_scraper::{Event, EventSummary};

pub const CHALLENGE_PAGE: &str =
    "<html><title>Just a moment...</title><script>window._cf_chl_opt={cType: 'managed'}</script></html>";

/// A request as seen by [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub url: String,
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
}

/// Transport answering from a queue; repeats the last answer when drained
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<FetchResponse, TransportError>>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<FetchResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        credential: Option<&Credential>,
    ) -> Result<FetchResponse, TransportError> {
        self.seen.lock().unwrap().push(SeenRequest {
            url: url.to_string(),
            cookie: credential.map(Credential::cookie_header),
            user_agent: credential.map(|c| c.user_agent.clone()),
        });

        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().expect("empty transport script")
        }
    }
}

pub fn ok(body: &str) -> Result<FetchResponse, TransportError> {
    Ok(FetchResponse {
        status: 200,
        headers: HeaderMap::new(),
        body: body.to_string(),
    })
}

pub fn status(code: u16) -> Result<FetchResponse, TransportError> {
    Ok(FetchResponse {
        status: code,
        headers: HeaderMap::new(),
        body: format!("HTTP {code}"),
    })
}

pub fn challenge() -> Result<FetchResponse, TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert("server", HeaderValue::from_static("cloudflare"));
    headers.insert("cf-mitigated", HeaderValue::from_static("challenge"));
    Ok(FetchResponse {
        status: 403,
        headers,
        body: CHALLENGE_PAGE.to_string(),
    })
}

pub fn timeout() -> Result<FetchResponse, TransportError> {
    Err(TransportError::Timeout("operation timed out".to_string()))
}

pub fn credential(value: &str) -> Credential {
    Credential {
        cookies: vec![Cookie {
            name: "cf_clearance".to_string(),
            value: value.to_string(),
        }],
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) HeadlessChrome/124.0".to_string(),
        acquired_at: Utc::now(),
    }
}

/// Solver handing out numbered credentials, or always failing
pub struct FakeSolver {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeSolver {
    pub fn passing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for FakeSolver {
    async fn solve(&self, _url: &str, timeout: Duration) -> Result<Credential, ChallengeError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(ChallengeError::Timeout(timeout));
        }
        Ok(credential(&format!("clearance-{n}")))
    }
}

/// Fetch config without jitter; pacing windows collapsed to zero
pub fn fast_config() -> FetchConfig {
    FetchConfig {
        standard_pacing: PacingWindow::from_secs(0.0, 0.0),
        history_pacing: PacingWindow::from_secs(0.0, 0.0),
        jitter: false,
        ..FetchConfig::default()
    }
}

pub fn client(
    transport: Arc<ScriptedTransport>,
    solver: Arc<FakeSolver>,
    config: &FetchConfig,
) -> FetchClient {
    FetchClient::new(transport, solver, Arc::new(CookieCache::new()), config)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn event(id: &str, start: NaiveDate) -> Event {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": format!("MTBO {id}"),
        "start_date": start,
        "status": "Planned",
        "stages": [{"name": "Long", "discipline": "Long"}],
    }))
    .unwrap()
}

/// What [`StaticSource`] answers for one segment year
#[derive(Clone)]
pub enum Listing {
    Events(Vec<Event>),
    Fail(fn(&str) -> FetchError),
}

pub fn network_failure(url: &str) -> FetchError {
    FetchError::Network {
        url: url.to_string(),
        status: Some(503),
        retryable: true,
        message: "service unavailable after 3 attempts".to_string(),
    }
}

pub fn bypass_failure(url: &str) -> FetchError {
    FetchError::Cloudflare {
        url: url.to_string(),
        challenge: "managed".to_string(),
        message: "challenge still served after browser escalation".to_string(),
    }
}

/// In-memory event source keyed by segment year
pub struct StaticSource {
    code: String,
    listings: HashMap<i32, Listing>,
    broken_details: Vec<String>,
    gone_details: Vec<String>,
    pub detail_calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            listings: HashMap::new(),
            broken_details: Vec::new(),
            gone_details: Vec::new(),
            detail_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_year(mut self, year: i32, listing: Listing) -> Self {
        self.listings.insert(year, listing);
        self
    }

    /// Detail pages of `id` fail to parse
    pub fn with_broken_detail(mut self, id: &str) -> Self {
        self.broken_details.push(id.to_string());
        self
    }

    /// Detail pages of `id` answer 404
    pub fn with_gone_detail(mut self, id: &str) -> Self {
        self.gone_details.push(id.to_string());
        self
    }

    fn url(&self, year: i32) -> String {
        format!("https://eventor.test/{}/{year}", self.code)
    }
}

#[async_trait]
impl EventSource for StaticSource {
    fn code(&self) -> &str {
        &self.code
    }

    async fn fetch_listing(
        &self,
        segment: &Segment,
        _mode: PacingMode,
    ) -> FetchResult<Vec<EventSummary>> {
        match self.listings.get(&segment.year) {
            None => Ok(Vec::new()),
            Some(Listing::Fail(make)) => Err(make(&self.url(segment.year))),
            Some(Listing::Events(events)) => Ok(events
                .iter()
                .map(|e| EventSummary {
                    id: e.id.clone(),
                    source: self.code.clone(),
                    name: e.name.clone(),
                    start_date: e.start_date,
                    url: format!("/Events/Show/{}", e.id),
                })
                .collect()),
        }
    }

    async fn fetch_detail(&self, summary: &EventSummary, _mode: PacingMode) -> FetchResult<Event> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.broken_details.contains(&summary.id) {
            return Err(FetchError::Parse {
                url: summary.url.clone(),
                message: "unexpected page layout".to_string(),
            });
        }
        if self.gone_details.contains(&summary.id) {
            return Err(FetchError::Network {
                url: summary.url.clone(),
                status: Some(404),
                retryable: false,
                message: "HTTP 404".to_string(),
            });
        }
        self.listings
            .values()
            .filter_map(|l| match l {
                Listing::Events(events) => Some(events),
                Listing::Fail(_) => None,
            })
            .flatten()
            .find(|e| e.id == summary.id)
            .cloned()
            .ok_or_else(|| FetchError::Parse {
                url: summary.url.clone(),
                message: "not found".to_string(),
            })
    }
}
