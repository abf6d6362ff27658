//! Event identifier parsing and validation
//!
//! Two id shapes exist in the dataset:
//! - `{SOURCE}_{LOCALID}` for events fetched from a remote source (`SWE_12345`)
//! - `{SOURCE}_{COUNTRY}_{SHORTNAME}{YEAR}` for manually authored events
//!   (`MAN_SWE_ORINGEN2025`)
//!
//! Ids are never normalized: the merge is keyed by the exact string.

use std::fmt;

/// Parsed event identifier
///
/// # Examples
///
/// ```
/// use mtbo_event_scraper::identifier::EventId;
///
/// let id = EventId::parse("SWE_50597").unwrap();
/// assert_eq!(id.source(), "SWE");
///
/// let manual = EventId::parse("MAN_SWE_ORINGEN2025").unwrap();
/// assert_eq!(manual.source(), "MAN");
/// assert_eq!(manual.year(), Some(2025));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventId {
    /// Remotely fetched event
    Remote {
        /// Source code (`SWE`, `NOR`, `IOF`)
        source: String,
        /// Id local to the source
        local_id: String,
    },
    /// Manually authored event
    Manual {
        /// Source code (usually `MAN`)
        source: String,
        /// ISO 3166-1 alpha-3 country code
        country: String,
        /// Short event name without the year
        short_name: String,
        /// Event year
        year: i32,
    },
}

impl EventId {
    /// Parse an id string
    ///
    /// # Errors
    ///
    /// Returns an error if the id does not match either shape.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let parts: Vec<&str> = s.split('_').collect();

        let source = parts[0];
        if !is_code(source, 2..=5) {
            return Err(IdentifierError::InvalidFormat(format!(
                "source code must be 2-5 uppercase letters, got '{source}'"
            )));
        }

        match parts.len() {
            2 => {
                let local_id = parts[1];
                if local_id.is_empty()
                    || !local_id
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-')
                {
                    return Err(IdentifierError::InvalidFormat(format!(
                        "local id must be alphanumeric, got '{local_id}'"
                    )));
                }
                Ok(Self::Remote {
                    source: source.to_string(),
                    local_id: local_id.to_string(),
                })
            }
            3 => {
                let country = parts[1];
                if !is_code(country, 3..=3) {
                    return Err(IdentifierError::InvalidFormat(format!(
                        "country must be an alpha-3 code, got '{country}'"
                    )));
                }

                let tail = parts[2];
                if tail.len() <= 4 || !tail.is_ascii() {
                    return Err(IdentifierError::InvalidFormat(format!(
                        "expected SHORTNAME followed by a 4-digit year, got '{tail}'"
                    )));
                }
                let (short_name, year) = tail.split_at(tail.len() - 4);
                let year: i32 = year
                    .parse()
                    .ok()
                    .filter(|_| year.chars().all(|c| c.is_ascii_digit()))
                    .ok_or_else(|| {
                        IdentifierError::InvalidFormat(format!(
                            "manual id must end with a 4-digit year, got '{tail}'"
                        ))
                    })?;
                if !short_name.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(IdentifierError::InvalidFormat(format!(
                        "short name must be alphanumeric, got '{short_name}'"
                    )));
                }

                Ok(Self::Manual {
                    source: source.to_string(),
                    country: country.to_string(),
                    short_name: short_name.to_string(),
                    year,
                })
            }
            _ => Err(IdentifierError::InvalidFormat(format!(
                "expected SOURCE_LOCALID or SOURCE_COUNTRY_SHORTNAMEYEAR, got '{s}'"
            ))),
        }
    }

    /// Build a remote id from its parts
    pub fn remote(source: &str, local_id: impl fmt::Display) -> Self {
        Self::Remote {
            source: source.to_string(),
            local_id: local_id.to_string(),
        }
    }

    /// Get the owning source code
    pub fn source(&self) -> &str {
        match self {
            Self::Remote { source, .. } | Self::Manual { source, .. } => source,
        }
    }

    /// Year encoded in a manual id
    pub fn year(&self) -> Option<i32> {
        match self {
            Self::Remote { .. } => None,
            Self::Manual { year, .. } => Some(*year),
        }
    }

    /// Whether this id belongs to a manually authored event
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { source, local_id } => write!(f, "{source}_{local_id}"),
            Self::Manual {
                source,
                country,
                short_name,
                year,
            } => write!(f, "{source}_{country}_{short_name}{year:04}"),
        }
    }
}

fn is_code(s: &str, len: std::ops::RangeInclusive<usize>) -> bool {
    len.contains(&s.len()) && s.chars().all(|c| c.is_ascii_uppercase())
}

/// Errors that can occur during identifier parsing
#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    /// Invalid identifier format
    #[error("identifier error: {0}")]
    InvalidFormat(String),
}
