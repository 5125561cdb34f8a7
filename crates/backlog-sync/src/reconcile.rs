use backlog_core::{ItemStore, MarkOutcome, Snapshot, UpsertOutcome};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Upsert,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub external_id: String,
    pub phase: ReconcilePhase,
    pub error: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub seen: usize,
    pub created: usize,
    pub reactivated: usize,
    pub refreshed: usize,
    pub closed: usize,
    pub failures: Vec<ItemFailure>,
    /// Set when the active set could not be read, so no removals were applied.
    pub removal_scan_failed: bool,
    /// Post-pass active count, `None` if the count query failed.
    pub open_count: Option<usize>,
}

impl ReconcileReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.removal_scan_failed && self.open_count.is_some()
    }
}

/// Makes the store's active set equal to the snapshot's identifier set.
///
/// Items are handled one at a time; a failing item is logged and recorded in
/// the report while the rest of the pass carries on. Undated entries are
/// opened at `now` and never move the `added_at` of an item already active.
pub fn reconcile_snapshot(
    store: &dyn ItemStore,
    snapshot: &Snapshot,
    now: DateTime<Utc>,
) -> ReconcileReport {
    let wanted = snapshot.normalized();
    let mut report = ReconcileReport {
        seen: wanted.len(),
        ..ReconcileReport::default()
    };

    for (external_id, remote_created_at) in &wanted {
        let written = match remote_created_at {
            Some(created_at) => store.upsert_active(external_id, *created_at),
            None => store.ensure_active(external_id, now),
        };
        match written {
            Ok(UpsertOutcome::Created) => report.created += 1,
            Ok(UpsertOutcome::Reactivated) => report.reactivated += 1,
            Ok(UpsertOutcome::Refreshed) => report.refreshed += 1,
            Err(err) => {
                warn!(
                    event = "reconcile_item_failed",
                    phase = "upsert",
                    external_id = %external_id,
                    error = %err
                );
                report.failures.push(ItemFailure {
                    external_id: external_id.clone(),
                    phase: ReconcilePhase::Upsert,
                    error: err.to_string(),
                });
            }
        }
    }

    // Read after the upserts so the just-written items are part of the scan.
    match store.list_active() {
        Ok(active) => {
            for item in active {
                if wanted.contains_key(&item.external_id) {
                    continue;
                }
                match store.mark_removed(&item.external_id, now) {
                    Ok(MarkOutcome::Closed) => report.closed += 1,
                    Ok(outcome) => {
                        // A live event got there first.
                        debug!(
                            event = "reconcile_removal_raced",
                            external_id = %item.external_id,
                            outcome = ?outcome
                        );
                    }
                    Err(err) => {
                        warn!(
                            event = "reconcile_item_failed",
                            phase = "remove",
                            external_id = %item.external_id,
                            error = %err
                        );
                        report.failures.push(ItemFailure {
                            external_id: item.external_id.clone(),
                            phase: ReconcilePhase::Remove,
                            error: err.to_string(),
                        });
                    }
                }
            }
        }
        Err(err) => {
            warn!(event = "reconcile_scan_failed", error = %err);
            report.removal_scan_failed = true;
        }
    }

    report.open_count = match store.count_active() {
        Ok(count) => Some(count),
        Err(err) => {
            warn!(event = "reconcile_count_failed", error = %err);
            None
        }
    };

    report
}
