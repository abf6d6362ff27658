//! Per-year partition files and the merge that updates them

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::diff::ChangeStats;
use crate::{Event, Link};

/// Source block in a partition's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Source code
    pub code: String,
    /// Display name
    pub name: String,
    /// Source home page
    pub url: String,
}

/// Partition metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    /// Sources with events in this partition
    #[serde(default)]
    pub sources: Vec<SourceMeta>,
}

/// On-disk layout of `<root>/<year>/events.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFile {
    /// Layout version
    pub schema_version: String,
    /// Metadata block
    #[serde(default)]
    pub meta: PartitionMeta,
    /// Events ordered by `(start_date, id)`
    #[serde(default)]
    pub events: Vec<Event>,
}

/// Limits an update to one source's records inside a date window
///
/// Records of that source in the window that are missing from the incoming
/// batch and from `listed` are deleted; everything else is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRestriction {
    /// Source being refreshed
    pub source: String,
    /// First day of the refreshed window
    pub start: NaiveDate,
    /// Last day of the refreshed window
    pub end: NaiveDate,
    /// Ids the source still lists, including records dropped before merge
    pub listed: BTreeSet<String>,
}

impl SourceRestriction {
    /// Whether the restriction covers this event
    pub fn covers(&self, event: &Event) -> bool {
        event.source_code() == self.source
            && event.start_date >= self.start
            && event.start_date <= self.end
    }
}

/// Result of merging a batch into a partition
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Merged events, ordered by `(start_date, id)`
    pub events: Vec<Event>,
    /// What the merge did relative to the existing partition
    pub stats: ChangeStats,
}

/// Merge `incoming` over `existing`
///
/// Records are keyed by id: an incoming record replaces the existing one
/// with the same id or is inserted. Nothing is deleted unless a
/// [`SourceRestriction`] is given. `now` stamps links seen for the first time.
pub fn merge_events(
    existing: Vec<Event>,
    incoming: Vec<Event>,
    restriction: Option<&SourceRestriction>,
    now: &str,
) -> MergeOutcome {
    let before = existing.clone();
    let mut by_id: BTreeMap<String, Event> =
        existing.into_iter().map(|e| (e.id.clone(), e)).collect();

    let incoming: Vec<Event> = match restriction {
        Some(r) => incoming
            .into_iter()
            .filter(|e| e.source_code() == r.source)
            .collect(),
        None => incoming,
    };

    if let Some(r) = restriction {
        let incoming_ids: HashSet<String> = incoming.iter().map(|e| e.id.clone()).collect();
        by_id.retain(|id, event| {
            !r.covers(event) || incoming_ids.contains(id) || r.listed.contains(id)
        });
    }

    for mut event in incoming {
        let previous = by_id.get(&event.id);
        carry_link_timestamps(&mut event, previous, now);
        by_id.insert(event.id.clone(), event);
    }

    let mut events: Vec<Event> = by_id.into_values().collect();
    sort_events(&mut events);

    let stats = ChangeStats::between(&before, &events);
    MergeOutcome { events, stats }
}

/// Order by `(start_date, id)`
pub fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| (a.start_date, &a.id).cmp(&(b.start_date, &b.id)));
}

/// Copy `last_updated_at` from matching links of the previous version
///
/// Stages are matched by name, falling back to position.
pub fn carry_link_timestamps(event: &mut Event, previous: Option<&Event>, now: &str) {
    let old_links = previous.map(|p| p.links.as_slice()).unwrap_or_default();
    merge_link_timestamps(&mut event.links, old_links, now);

    for (i, stage) in event.stages.iter_mut().enumerate() {
        let name = stage.name.clone();
        let old_stage = previous.and_then(|p| {
            p.stages
                .iter()
                .find(|s| !name.is_empty() && s.name == name)
                .or_else(|| p.stages.get(i))
        });
        let old_links = old_stage.map(|s| s.links.as_slice()).unwrap_or_default();
        merge_link_timestamps(&mut stage.links, old_links, now);
    }
}

fn merge_link_timestamps(links: &mut [Link], old_links: &[Link], now: &str) {
    for link in links.iter_mut().filter(|l| l.last_updated_at.is_none()) {
        let inherited = old_links
            .iter()
            .find(|old| old.kind == link.kind && old.url == link.url && old.title == link.title)
            .and_then(|old| old.last_updated_at.clone());
        link.last_updated_at = Some(inherited.unwrap_or_else(|| now.to_string()));
    }
}
