use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod format;
pub mod store;

pub use store::{ItemStore, MarkOutcome, StoreError, UpsertOutcome};

/// Number of closed items averaged when no explicit sample size is configured.
pub const DEFAULT_SAMPLE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub external_id: String,
    pub added_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_active(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Time the item spent in the backlog, or `None` while it is still active.
    pub fn completion_duration(&self) -> Option<Duration> {
        let removed_at = self.removed_at?;
        let elapsed = removed_at.signed_duration_since(self.added_at);
        Some(elapsed.to_std().unwrap_or(Duration::ZERO))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub external_id: String,
    /// `None` when the remote did not say when the item was saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_created_at: Option<DateTime<Utc>>,
}

impl SnapshotEntry {
    pub fn new(external_id: impl Into<String>, remote_created_at: DateTime<Utc>) -> Self {
        Self {
            external_id: external_id.into(),
            remote_created_at: Some(remote_created_at),
        }
    }

    pub fn undated(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            remote_created_at: None,
        }
    }
}

/// The complete remote saved-set at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entries: Vec<SnapshotEntry>,
    /// Open count as reported by the remote. Only ever used as a display hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_open_count: Option<u64>,
}

impl Snapshot {
    pub fn new(entries: Vec<SnapshotEntry>) -> Self {
        Self {
            entries,
            reported_open_count: None,
        }
    }

    pub fn with_reported_open_count(mut self, count: u64) -> Self {
        self.reported_open_count = Some(count);
        self
    }

    /// Normalized identifiers mapped to their creation time. Entries with a
    /// blank identifier are dropped and duplicates collapse to the last one seen.
    pub fn normalized(&self) -> BTreeMap<String, Option<DateTime<Utc>>> {
        let mut out = BTreeMap::new();
        for entry in &self.entries {
            if let Some(id) = normalize_external_id(&entry.external_id) {
                out.insert(id, entry.remote_created_at);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveEvent {
    Saved {
        external_id: String,
        observed_at: DateTime<Utc>,
    },
    Unsaved {
        external_id: String,
        observed_at: DateTime<Utc>,
    },
}

impl LiveEvent {
    pub fn external_id(&self) -> &str {
        match self {
            LiveEvent::Saved { external_id, .. } | LiveEvent::Unsaved { external_id, .. } => {
                external_id
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LiveEvent::Saved { .. } => "saved",
            LiveEvent::Unsaved { .. } => "unsaved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAverage {
    NoData,
    Mean { mean: Duration, samples: usize },
}

impl CompletionAverage {
    pub fn mean(&self) -> Option<Duration> {
        match self {
            CompletionAverage::NoData => None,
            CompletionAverage::Mean { mean, .. } => Some(*mean),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metrics {
    pub open_count: usize,
    pub average: CompletionAverage,
}

pub fn normalize_external_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_712_700_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn normalized_snapshot_drops_blank_ids_and_collapses_duplicates() {
        let snapshot = Snapshot::new(vec![
            SnapshotEntry::new(" 1712.0001 ", at(0)),
            SnapshotEntry::new("", at(1)),
            SnapshotEntry::new("   ", at(2)),
            SnapshotEntry::new("1712.0001", at(3)),
            SnapshotEntry::new("1712.0002", at(4)),
            SnapshotEntry::undated("1712.0003"),
        ]);

        let normalized = snapshot.normalized();
        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized.get("1712.0001"), Some(&Some(at(3))));
        assert_eq!(normalized.get("1712.0002"), Some(&Some(at(4))));
        assert_eq!(normalized.get("1712.0003"), Some(&None));
    }

    #[test]
    fn completion_duration_only_for_closed_items() {
        let mut item = Item {
            external_id: "a".to_string(),
            added_at: at(0),
            removed_at: None,
        };
        assert!(item.is_active());
        assert_eq!(item.completion_duration(), None);

        item.removed_at = Some(at(90));
        assert!(!item.is_active());
        assert_eq!(item.completion_duration(), Some(Duration::from_secs(90)));
    }
}
