use crate::tracker::{MetricsPublisher, RefreshTrigger, SnapshotSource, Tracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Starts the periodic refresh. Returns `None` when the interval is zero.
///
/// The first tick fires one full interval after start; the startup pass is run
/// separately by the caller.
pub fn start_refresh_timer<S, P>(
    tracker: Arc<Tracker<S, P>>,
    every: Duration,
) -> Option<JoinHandle<()>>
where
    S: SnapshotSource,
    P: MetricsPublisher,
{
    if every.is_zero() {
        info!(event = "refresh_timer_disabled");
        return None;
    }
    info!(event = "refresh_timer_start", interval_secs = every.as_secs());
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            tracker.refresh(RefreshTrigger::Timer).await;
        }
    }))
}
