use backlog_core::{LiveEvent, Metrics, Snapshot};
use backlog_sync::{Backlog, EventOutcome, ReconcileReport};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Where full snapshots come from.
pub trait SnapshotSource: Send + Sync + 'static {
    type Error: Display + Send;

    fn fetch_snapshot(&self) -> impl Future<Output = Result<Snapshot, Self::Error>> + Send;
}

/// Where computed metrics are shown.
pub trait MetricsPublisher: Send + Sync + 'static {
    type Error: Display + Send;

    fn publish(&self, metrics: &Metrics) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Startup,
    Timer,
    Http,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::Startup => "startup",
            RefreshTrigger::Timer => "timer",
            RefreshTrigger::Http => "http",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed(ReconcileReport),
    /// Another pass held the single-flight guard.
    AlreadyRunning,
    /// The snapshot could not be fetched; local state was left alone.
    Skipped(String),
}

/// Ties the backlog to its snapshot source and display. All three stimuli
/// (timer, HTTP trigger, live events) go through here.
pub struct Tracker<S, P> {
    backlog: Arc<Backlog>,
    source: S,
    publisher: P,
    in_flight: AsyncMutex<()>,
}

impl<S, P> Tracker<S, P>
where
    S: SnapshotSource,
    P: MetricsPublisher,
{
    pub fn new(backlog: Arc<Backlog>, source: S, publisher: P) -> Self {
        Self {
            backlog,
            source,
            publisher,
            in_flight: AsyncMutex::new(()),
        }
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    /// Runs one reconciliation pass unless one is already in progress.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> RefreshOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            info!(event = "refresh_skipped", trigger = trigger.as_str(), reason = "in_flight");
            return RefreshOutcome::AlreadyRunning;
        };
        info!(event = "refresh_start", trigger = trigger.as_str());

        let snapshot = match self.source.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(event = "refresh_fetch_failed", trigger = trigger.as_str(), error = %err);
                return RefreshOutcome::Skipped(err.to_string());
            }
        };

        if let Some(reported) = snapshot.reported_open_count {
            self.backlog.note_reported_count(reported);
            self.publish().await;
        }

        let backlog = self.backlog.clone();
        let report = match tokio::task::spawn_blocking(move || backlog.reconcile(&snapshot)).await {
            Ok(report) => report,
            Err(err) => {
                error!(event = "reconcile_panicked", error = %err);
                return RefreshOutcome::Skipped(format!("reconcile task failed: {err}"));
            }
        };

        self.publish().await;
        info!(
            event = "refresh_complete",
            trigger = trigger.as_str(),
            complete = report.is_complete(),
            open_count = self.backlog.live_count()
        );
        RefreshOutcome::Completed(report)
    }

    pub async fn handle_event(&self, event: LiveEvent) -> EventOutcome {
        let backlog = self.backlog.clone();
        let outcome = match tokio::task::spawn_blocking(move || backlog.apply_event(&event)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(event = "event_task_panicked", error = %err);
                return EventOutcome::Failed(err.to_string());
            }
        };
        if outcome.changed_active_set() {
            self.publish().await;
        }
        outcome
    }

    /// Pushes current metrics to the display. Failures are logged only.
    pub async fn publish(&self) {
        let backlog = self.backlog.clone();
        let metrics = match tokio::task::spawn_blocking(move || backlog.metrics()).await {
            Ok(Ok(metrics)) => metrics,
            Ok(Err(err)) => {
                warn!(event = "metrics_failed", error = %err);
                return;
            }
            Err(err) => {
                error!(event = "metrics_task_panicked", error = %err);
                return;
            }
        };
        if let Err(err) = self.publisher.publish(&metrics).await {
            warn!(event = "publish_failed", error = %err);
        }
    }
}
