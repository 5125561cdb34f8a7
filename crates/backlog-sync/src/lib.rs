use backlog_core::{ItemStore, LiveEvent, Metrics, Snapshot, StoreError};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub mod events;
pub mod metrics;
pub mod reconcile;

#[cfg(test)]
mod testing;

pub use events::{apply_event, EventOutcome};
pub use metrics::{average_completion, mean_completion, open_count, LiveCount};
pub use reconcile::{reconcile_snapshot, ItemFailure, ReconcilePhase, ReconcileReport};

/// The tracked backlog: the item store plus the count shown on the display.
pub struct Backlog {
    store: Arc<dyn ItemStore>,
    live_count: LiveCount,
    /// Held while an event is applied and while a pass settles the count, so
    /// an event cannot land between the settling read and its write.
    count_guard: Mutex<()>,
    sample_size: usize,
}

impl Backlog {
    pub fn new(store: Arc<dyn ItemStore>, sample_size: usize) -> Self {
        Self {
            store,
            live_count: LiveCount::default(),
            count_guard: Mutex::new(()),
            sample_size,
        }
    }

    fn lock_count(&self) -> MutexGuard<'_, ()> {
        self.count_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &dyn ItemStore {
        self.store.as_ref()
    }

    /// Loads the display count from the store, e.g. after a restart.
    pub fn prime(&self) -> Result<usize, StoreError> {
        let count = self.store.count_active()?;
        self.live_count.set_authoritative(count);
        Ok(count)
    }

    pub fn live_count(&self) -> u64 {
        self.live_count.get()
    }

    /// Shows the remote-reported count until the next pass settles.
    pub fn note_reported_count(&self, count: u64) {
        self.live_count.set_hint(count);
    }

    pub fn reconcile(&self, snapshot: &Snapshot) -> ReconcileReport {
        self.reconcile_at(snapshot, Utc::now())
    }

    pub fn reconcile_at(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> ReconcileReport {
        if let Some(reported) = snapshot.reported_open_count {
            self.note_reported_count(reported);
        }
        let report = reconcile_snapshot(self.store.as_ref(), snapshot, now);
        {
            let _guard = self.lock_count();
            match self.store.count_active() {
                Ok(count) => self.live_count.set_authoritative(count),
                Err(err) => warn!(event = "live_count_settle_failed", error = %err),
            }
        }
        info!(
            event = "reconcile_complete",
            seen = report.seen,
            created = report.created,
            reactivated = report.reactivated,
            closed = report.closed,
            failures = report.failures.len(),
            open_count = ?report.open_count
        );
        report
    }

    pub fn apply_event(&self, event: &LiveEvent) -> EventOutcome {
        let _guard = self.lock_count();
        apply_event(self.store.as_ref(), &self.live_count, event)
    }

    /// Values for the display: the live count and the rolling average.
    pub fn metrics(&self) -> Result<Metrics, StoreError> {
        let average = average_completion(self.store.as_ref(), self.sample_size)?;
        Ok(Metrics {
            open_count: usize::try_from(self.live_count.get()).unwrap_or(usize::MAX),
            average,
        })
    }
}
