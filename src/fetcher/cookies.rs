//! Per-domain bypass credentials
//!
//! A credential is what the browser tier leaves behind after passing a
//! challenge: the session cookies plus the user agent they were issued to.
//! Both must be replayed together or Cloudflare rejects the cookies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::store::{atomic, StoreError};

/// A single session cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name
    pub name: String,
    /// Cookie value
    pub value: String,
}

/// Session cookies with the user agent that earned them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Cookies to send
    pub cookies: Vec<Cookie>,
    /// User agent to send alongside
    pub user_agent: String,
    /// When the challenge was passed
    pub acquired_at: DateTime<Utc>,
}

impl Credential {
    /// Value for a `Cookie` request header
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CookieFile {
    schema_version: String,
    domains: BTreeMap<String, Credential>,
}

const COOKIE_FILE_VERSION: &str = "1";

/// Process-scoped credential store keyed by domain
///
/// Entries never expire during a run. A credential that stops working is
/// detected by the fetch client and replaced.
#[derive(Debug, Default)]
pub struct CookieCache {
    entries: Mutex<HashMap<String, Credential>>,
}

impl CookieCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Credential>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Credential for a domain, if one was obtained
    pub fn get(&self, domain: &str) -> Option<Credential> {
        self.lock().get(domain).cloned()
    }

    /// Store or replace the credential for a domain
    pub fn put(&self, domain: &str, credential: Credential) {
        debug!(domain, cookies = credential.cookies.len(), "Caching credential");
        self.lock().insert(domain.to_string(), credential);
    }

    /// Drop the credential for a domain
    pub fn invalidate(&self, domain: &str) {
        if self.lock().remove(domain).is_some() {
            debug!(domain, "Invalidated credential");
        }
    }

    /// Number of cached domains
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no credentials are cached
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Load persisted credentials, dropping those older than `ttl`
    ///
    /// A missing file yields an empty cache. An unreadable or foreign file is
    /// ignored with a warning; the next escalation overwrites it.
    pub fn load(path: &Path, ttl: chrono::Duration) -> Result<Self, StoreError> {
        let cache = Self::new();
        if !path.exists() {
            return Ok(cache);
        }

        let content = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
        let file: CookieFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable cookie file");
                return Ok(cache);
            }
        };
        if file.schema_version != COOKIE_FILE_VERSION {
            warn!(
                path = %path.display(),
                version = %file.schema_version,
                "Ignoring cookie file with unknown schema version"
            );
            return Ok(cache);
        }

        let now = Utc::now();
        let mut entries = cache.lock();
        for (domain, credential) in file.domains {
            if now - credential.acquired_at <= ttl {
                entries.insert(domain, credential);
            } else {
                debug!(domain = %domain, "Dropping expired credential");
            }
        }
        info!(path = %path.display(), domains = entries.len(), "Loaded persisted credentials");
        drop(entries);

        Ok(cache)
    }

    /// Persist all credentials atomically
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let file = CookieFile {
            schema_version: COOKIE_FILE_VERSION.to_string(),
            domains: self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let bytes = atomic::to_pretty_json(&file)?;
        atomic::write_atomic(path, &bytes)?;
        debug!(path = %path.display(), domains = file.domains.len(), "Saved credentials");
        Ok(())
    }
}
