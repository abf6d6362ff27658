//! Document parsers
//!
//! Turning a source's pages into events is pluggable. The crate ships a JSON
//! parser for sources (and fixtures) that already serve normalized records;
//! HTML parsers for the Eventor sites register under their own names.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{Event, EventSummary};

/// Parser failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(pub String);

/// Extracts events from retrieved documents
pub trait DocumentParser: Send + Sync {
    /// Name the registry refers to
    fn name(&self) -> &str;

    /// Parse a listing page into summaries owned by `source`
    fn parse_listing(&self, source: &str, body: &str) -> Result<Vec<EventSummary>, ParseError>;

    /// Parse a detail page into a full event
    fn parse_detail(&self, summary: &EventSummary, body: &str) -> Result<Event, ParseError>;
}

/// Parsers by name
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn DocumentParser>>,
}

impl ParserRegistry {
    /// Registry holding the built-in parsers
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(JsonDocumentParser));
        registry
    }

    /// Add or replace a parser
    pub fn register(&mut self, parser: Arc<dyn DocumentParser>) {
        self.parsers.insert(parser.name().to_string(), parser);
    }

    /// Look up a parser by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn DocumentParser>> {
        self.parsers.get(name).cloned()
    }

    /// Registered parser names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Parses listings and details served as JSON
///
/// Listings are arrays of `{id, name, start_date, url}`; ids without the
/// source prefix get it added. Details are single event objects whose id is
/// forced to the summary's.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentParser;

#[derive(Debug, Deserialize)]
struct ListingEntry {
    id: serde_json::Value,
    #[serde(default)]
    name: String,
    start_date: chrono::NaiveDate,
    url: String,
}

impl DocumentParser for JsonDocumentParser {
    fn name(&self) -> &str {
        "json"
    }

    fn parse_listing(&self, source: &str, body: &str) -> Result<Vec<EventSummary>, ParseError> {
        let entries: Vec<ListingEntry> = serde_json::from_str(body)
            .map_err(|e| ParseError(format!("invalid listing JSON: {e}")))?;

        let prefix = format!("{source}_");
        entries
            .into_iter()
            .map(|entry| {
                let raw_id = match &entry.id {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    other => return Err(ParseError(format!("unsupported listing id {other}"))),
                };
                let id = if raw_id.starts_with(&prefix) {
                    raw_id
                } else {
                    format!("{prefix}{raw_id}")
                };
                Ok(EventSummary {
                    id,
                    source: source.to_string(),
                    name: entry.name,
                    start_date: entry.start_date,
                    url: entry.url,
                })
            })
            .collect()
    }

    fn parse_detail(&self, summary: &EventSummary, body: &str) -> Result<Event, ParseError> {
        let mut value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| ParseError(format!("invalid detail JSON: {e}")))?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| ParseError("detail document is not a JSON object".to_string()))?;
        object.insert("id".to_string(), serde_json::Value::String(summary.id.clone()));
        if !object.contains_key("name") && !summary.name.is_empty() {
            object.insert("name".to_string(), serde_json::Value::String(summary.name.clone()));
        }
        if !object.contains_key("start_date") {
            object.insert(
                "start_date".to_string(),
                serde_json::Value::String(summary.start_date.to_string()),
            );
        }

        serde_json::from_value(value).map_err(|e| ParseError(format!("invalid event: {e}")))
    }
}
