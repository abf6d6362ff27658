//! Primary HTTP transport
//!
//! The transport performs a single GET and reports what came back. It makes
//! no retry or challenge decisions; those belong to the fetch client.

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use std::time::Duration;

use super::cookies::Credential;

/// HTTP connect timeout (seconds) - time to establish TCP connection
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Desktop Chrome user agent used until a browser credential replaces it
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// A received HTTP response, whatever its status
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Decoded body text
    pub body: String,
}

impl FetchResponse {
    /// Header value as text, if present and valid
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Failures where no HTTP response was received
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Request timed out
    #[error("timeout: {0}")]
    Timeout(String),
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),
    /// Anything else (TLS, body decoding, ...)
    #[error("request failed: {0}")]
    Other(String),
}

/// Issues plain HTTP requests
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url`, replaying `credential` when given
    async fn get(
        &self,
        url: &str,
        credential: Option<&Credential>,
    ) -> Result<FetchResponse, TransportError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build the transport with fixed timeouts and browser-like headers
    pub fn new() -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-GB,en;q=0.9"));
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .user_agent(DEFAULT_USER_AGENT)
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        credential: Option<&Credential>,
    ) -> Result<FetchResponse, TransportError> {
        let mut request = self.client.get(url);
        if let Some(credential) = credential {
            request = request
                .header(header::COOKIE, credential.cookie_header())
                .header(header::USER_AGENT, credential.user_agent.as_str());
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
