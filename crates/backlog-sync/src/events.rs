use crate::metrics::LiveCount;
use backlog_core::{ItemStore, LiveEvent, MarkOutcome, UpsertOutcome};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The item became active (new or re-saved).
    Opened,
    /// Duplicate add for an item that was already active.
    AlreadyActive,
    Closed,
    AlreadyClosed,
    /// Removal for an item the store never saw added.
    UnknownItem,
    Failed(String),
}

impl EventOutcome {
    pub fn changed_active_set(&self) -> bool {
        matches!(self, EventOutcome::Opened | EventOutcome::Closed)
    }
}

/// Applies one live notification and nudges the display count.
///
/// Never fails: inconsistencies and store errors are logged and returned as
/// an outcome so the listener keeps running.
pub fn apply_event(store: &dyn ItemStore, live_count: &LiveCount, event: &LiveEvent) -> EventOutcome {
    match event {
        LiveEvent::Saved {
            external_id,
            observed_at,
        } => match store.upsert_active(external_id, *observed_at) {
            Ok(UpsertOutcome::Created) | Ok(UpsertOutcome::Reactivated) => {
                let count = live_count.increment();
                info!(event = "item_saved", external_id = %external_id, live_count = count);
                EventOutcome::Opened
            }
            Ok(UpsertOutcome::Refreshed) => {
                debug!(event = "duplicate_add", external_id = %external_id);
                EventOutcome::AlreadyActive
            }
            Err(err) => {
                warn!(event = "event_apply_failed", kind = "saved", external_id = %external_id, error = %err);
                EventOutcome::Failed(err.to_string())
            }
        },
        LiveEvent::Unsaved {
            external_id,
            observed_at,
        } => match store.mark_removed(external_id, *observed_at) {
            Ok(MarkOutcome::Closed) => {
                let count = live_count.decrement();
                info!(event = "item_unsaved", external_id = %external_id, live_count = count);
                EventOutcome::Closed
            }
            Ok(MarkOutcome::AlreadyClosed) => {
                debug!(event = "duplicate_remove", external_id = %external_id);
                EventOutcome::AlreadyClosed
            }
            Ok(MarkOutcome::NotFound) => {
                warn!(event = "unknown_item_removed", external_id = %external_id);
                EventOutcome::UnknownItem
            }
            Err(err) => {
                warn!(event = "event_apply_failed", kind = "unsaved", external_id = %external_id, error = %err);
                EventOutcome::Failed(err.to_string())
            }
        },
    }
}
