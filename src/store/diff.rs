//! Change statistics between dataset states

use chrono::NaiveDate;
use std::collections::HashMap;
use std::fmt;
use std::ops::AddAssign;

use crate::Event;

/// Counts of new, changed and deleted events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeStats {
    /// Ids that did not exist before
    pub new: usize,
    /// Ids whose record differs from before
    pub changed: usize,
    /// Ids that no longer exist
    pub deleted: usize,
}

impl ChangeStats {
    /// Compare two versions of the same partition
    pub fn between(old: &[Event], new: &[Event]) -> Self {
        let old_map: HashMap<&str, &Event> = old.iter().map(|e| (e.id.as_str(), e)).collect();
        let new_map: HashMap<&str, &Event> = new.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut stats = Self::default();
        for (id, event) in &new_map {
            match old_map.get(id) {
                None => stats.new += 1,
                Some(previous) if *previous != *event => stats.changed += 1,
                Some(_) => {}
            }
        }
        stats.deleted = old_map.keys().filter(|id| !new_map.contains_key(*id)).count();
        stats
    }

    /// Whether anything changed
    pub fn is_empty(&self) -> bool {
        self.new == 0 && self.changed == 0 && self.deleted == 0
    }

    /// Commit-style summary of a run
    pub fn summary_message(
        &self,
        today: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
        sources: &[String],
    ) -> String {
        let mut details = vec![format!("Range: {start} to {end}")];
        if !sources.is_empty() {
            details.push(format!("Sources: {}", sources.join(", ")));
        }
        format!("Update MTBO events: {today}\n{self}\n{}", details.join(", "))
    }
}

impl AddAssign for ChangeStats {
    fn add_assign(&mut self, other: Self) {
        self.new += other.new;
        self.changed += other.changed;
        self.deleted += other.deleted;
    }
}

impl fmt::Display for ChangeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "New: {}, Changed: {}, Deleted: {}",
            self.new, self.changed, self.deleted
        )
    }
}
