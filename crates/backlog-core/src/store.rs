use crate::Item;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("invalid external id: {0:?}")]
    InvalidId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// The item existed as closed and is active again.
    Reactivated,
    /// The item was already active.
    Refreshed,
}

impl UpsertOutcome {
    /// Whether the active set grew.
    pub fn opened(self) -> bool {
        matches!(self, UpsertOutcome::Created | UpsertOutcome::Reactivated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Closed,
    AlreadyClosed,
    NotFound,
}

/// Durable table of tracked items keyed by external id.
///
/// Every mutation is persisted before the call returns, and each call is
/// atomic on its own. Callers may interleave calls from different tasks
/// freely; upserts and removals are idempotent so the table converges.
pub trait ItemStore: Send + Sync {
    /// Creates the item, or resets an existing one to active with `added_at`.
    fn upsert_active(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Creates or reactivates the item with `added_at`. An item that is
    /// already active is left untouched.
    fn ensure_active(
        &self,
        external_id: &str,
        added_at: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Closes an active item. A timestamp earlier than the item's `added_at`
    /// is clamped to `added_at`. Closing an already closed item keeps the
    /// first removal time.
    fn mark_removed(
        &self,
        external_id: &str,
        removed_at: DateTime<Utc>,
    ) -> Result<MarkOutcome, StoreError>;

    fn get(&self, external_id: &str) -> Result<Option<Item>, StoreError>;

    /// Active items, newest `added_at` first.
    fn list_active(&self) -> Result<Vec<Item>, StoreError>;

    fn count_active(&self) -> Result<usize, StoreError>;

    /// The `limit` most recently added closed items, newest first.
    fn list_recently_closed(&self, limit: usize) -> Result<Vec<Item>, StoreError>;
}
