//! Retention policy over remote snapshots — pure computation, no I/O.

use crate::remote::RemoteSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// The newest N snapshots are exempt from the count-based rule
    pub keep_latest: usize,
    /// Snapshots older than this are deleted regardless of the count rule
    pub max_age_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_latest: 3,
            max_age_days: 30,
        }
    }
}

impl RetentionPolicy {
    /// Select which snapshots to delete after a successful upload.
    ///
    /// Two rules, applied independently, results unioned and deduplicated
    /// by snapshot id:
    /// 1. everything beyond the `keep_latest` newest (by modified time);
    /// 2. everything older than `max_age_days`, even inside the newest set.
    pub fn select_for_deletion(
        &self,
        snapshots: &[RemoteSnapshot],
        now: DateTime<Utc>,
    ) -> Vec<RemoteSnapshot> {
        let mut sorted: Vec<&RemoteSnapshot> = snapshots.iter().collect();
        sorted.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));

        let cutoff = now - chrono::Duration::days(self.max_age_days);
        let mut seen = HashSet::new();
        let mut doomed = Vec::new();

        for (rank, snapshot) in sorted.iter().enumerate() {
            let beyond_kept = rank >= self.keep_latest;
            let too_old = snapshot.modified_time < cutoff;
            if (beyond_kept || too_old) && seen.insert(snapshot.id.clone()) {
                doomed.push((*snapshot).clone());
            }
        }
        doomed
    }
}
