//! Background trigger loop for sync cycles.

use super::SyncEngine;
use crate::connectivity::Connectivity;
use crate::remote::RemoteTaskApi;
use std::sync::Arc;
use std::time::Duration;
use tasksync_engine::SyncReport;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runs sync cycles when connectivity returns, periodically while online,
/// and on demand.
///
/// Cycles run one at a time inside the driver task. Triggers arriving
/// during a cycle collapse into a single follow-up cycle.
pub struct SyncDriver<R> {
    engine: SyncEngine<R>,
    connectivity: Connectivity,
    interval: Duration,
}

impl<R: RemoteTaskApi> SyncDriver<R> {
    pub fn new(engine: SyncEngine<R>, connectivity: Connectivity, interval: Duration) -> Self {
        Self {
            engine,
            connectivity,
            interval,
        }
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self) -> SyncHandle {
        let trigger = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (reports_tx, reports_rx) = watch::channel(None);

        let task = tokio::spawn(self.run(Arc::clone(&trigger), shutdown_rx, reports_tx));

        SyncHandle {
            trigger,
            shutdown: shutdown_tx,
            reports: reports_rx,
            task,
        }
    }

    async fn run(
        self,
        trigger: Arc<Notify>,
        mut shutdown: watch::Receiver<bool>,
        reports: watch::Sender<Option<SyncReport>>,
    ) {
        let mut online_rx = self.connectivity.subscribe();
        let mut online = *online_rx.borrow_and_update();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(online, interval_secs = self.interval.as_secs(), "sync driver started");

        loop {
            let should_run = tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                Ok(()) = online_rx.changed() => {
                    let now_online = *online_rx.borrow_and_update();
                    let regained = now_online && !online;
                    online = now_online;
                    if regained {
                        debug!("connectivity regained");
                    }
                    regained
                }

                _ = trigger.notified() => true,

                _ = ticker.tick() => online,
            };

            if should_run {
                self.cycle(&reports).await;
            }
        }

        info!("sync driver stopped");
    }

    async fn cycle(&self, reports: &watch::Sender<Option<SyncReport>>) {
        match self.engine.run_cycle().await {
            Ok(report) => {
                reports.send_replace(Some(report));
            }
            Err(err) if err.is_fatal() => {
                error!(error = %err, "sync cycle failed");
            }
            Err(err) => {
                warn!(error = %err, "sync cycle skipped");
            }
        }
    }
}

/// Control handle of a running [`SyncDriver`].
pub struct SyncHandle {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    reports: watch::Receiver<Option<SyncReport>>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask for a cycle as soon as possible.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Receiver of the latest completed cycle's report.
    pub fn subscribe_reports(&self) -> watch::Receiver<Option<SyncReport>> {
        self.reports.clone()
    }

    pub fn last_report(&self) -> Option<SyncReport> {
        self.reports.borrow().clone()
    }

    /// Stop the driver, letting a running cycle finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "sync driver task failed");
        }
    }
}
