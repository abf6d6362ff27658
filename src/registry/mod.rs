//! Source registry for the supported Eventor instances
//!
//! The registry is embedded at compile time and describes, per source code,
//! where the listing lives, which query parameters select MTBO events, and
//! which document parser understands the pages.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::store::SourceMeta;

/// Embedded registry data
const REGISTRY_JSON: &str = include_str!("sources.json");

/// Global registry instance (loaded once)
static REGISTRY: Lazy<Result<SourceRegistry, RegistryError>> =
    Lazy::new(|| SourceRegistry::from_json(REGISTRY_JSON));

/// Registry of known event sources keyed by source code
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    #[allow(dead_code)]
    schema_version: String,
    last_updated: String,
    sources: HashMap<String, SourceDescriptor>,
}

impl SourceRegistry {
    /// Load the embedded registry
    ///
    /// This is a singleton operation - the registry is loaded once and cached.
    pub fn load() -> Result<&'static Self, &'static RegistryError> {
        REGISTRY.as_ref()
    }

    /// Load embedded registry, returning an owned copy
    pub fn load_embedded() -> Result<Self, RegistryError> {
        Self::from_json(REGISTRY_JSON)
    }

    /// Parse registry from JSON string
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry = serde_json::from_str(json)
            .map_err(|e| RegistryError::ParseError(format!("Failed to parse registry: {e}")))?;

        let mut sources = HashMap::new();
        for source in raw.sources {
            if sources.contains_key(&source.code) {
                return Err(RegistryError::ParseError(format!(
                    "duplicate source code {}",
                    source.code
                )));
            }
            sources.insert(source.code.clone(), source);
        }

        Ok(Self {
            schema_version: raw.schema_version,
            last_updated: raw.last_updated,
            sources,
        })
    }

    /// Date the embedded registry was last revised
    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    /// Look up a source by code
    pub fn get(&self, code: &str) -> Option<&SourceDescriptor> {
        self.sources.get(code)
    }

    /// Resolve a source code, failing for unknown codes
    pub fn resolve(&self, code: &str) -> Result<&SourceDescriptor, RegistryError> {
        self.get(code).ok_or_else(|| {
            let mut known: Vec<&str> = self.sources.keys().map(String::as_str).collect();
            known.sort_unstable();
            RegistryError::NotFound(format!(
                "unknown source '{code}'. Known sources: {}",
                known.join(", ")
            ))
        })
    }

    /// All sources ordered by code
    pub fn list_all(&self) -> Vec<&SourceDescriptor> {
        let mut all: Vec<&SourceDescriptor> = self.sources.values().collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }
}

/// Static description of one remote source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    code: String,
    name: String,
    #[serde(default)]
    country: Option<String>,
    base_url: String,
    listing_path: String,
    parser: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

impl SourceDescriptor {
    /// Build a descriptor by hand (tests, ad-hoc sources)
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        base_url: impl Into<String>,
        parser: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            country: None,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            listing_path: "/Events".to_string(),
            parser: parser.into(),
            params: BTreeMap::new(),
        }
    }

    /// Source code, also the event id prefix
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// ISO alpha-3 country, `None` for international sources
    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Name of the document parser for this source's pages
    pub fn parser(&self) -> &str {
        &self.parser
    }

    /// Absolute URL of the event listing
    pub fn listing_url(&self) -> String {
        format!("{}{}", self.base_url(), self.listing_path)
    }

    /// Query parameters selecting MTBO events between two dates
    pub fn listing_params(&self, start: NaiveDate, end: NaiveDate) -> Vec<(&str, String)> {
        self.params
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .chain([
                ("startDate", start.format("%Y-%m-%d").to_string()),
                ("endDate", end.format("%Y-%m-%d").to_string()),
            ])
            .collect()
    }

    /// Query parameters for a detail page: the display culture, unless
    /// `url` already selects one
    pub fn detail_params(&self, url: &str) -> Vec<(&str, String)> {
        match self.params.get("culture") {
            Some(culture) if !url.contains("culture=") => vec![("culture", culture.clone())],
            _ => Vec::new(),
        }
    }

    /// Resolve a source-relative link against the base URL
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else if url.starts_with('/') {
            format!("{}{}", self.base_url(), url)
        } else {
            format!("{}/{}", self.base_url(), url)
        }
    }

    /// Metadata block written into partition files
    pub fn meta(&self) -> SourceMeta {
        SourceMeta {
            code: self.code.clone(),
            name: self.name.clone(),
            url: self.base_url().to_string(),
        }
    }
}

/// Raw registry structure for deserialization
#[derive(Debug, Deserialize)]
struct RawRegistry {
    schema_version: String,
    last_updated: String,
    sources: Vec<SourceDescriptor>,
}

/// Errors that can occur when working with the registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to parse registry JSON
    #[error("registry parse error: {0}")]
    ParseError(String),

    /// Source not found in registry
    #[error("source not found: {0}")]
    NotFound(String),
}
