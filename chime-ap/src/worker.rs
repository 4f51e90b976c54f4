//! Background tasks: the single playback worker and the sweeper
//!
//! The worker is the only consumer of the playback queue, which is what
//! serializes audio output. Shutdown is observed between items, never in
//! the middle of a dispatch.

use crate::pipeline::Pipeline;
use crate::playback::Dispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Running pipeline tasks
pub struct PipelineHandle {
    pipeline: Arc<Pipeline>,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Start the playback worker and the sweeper
pub fn spawn(pipeline: Arc<Pipeline>, dispatcher: Dispatcher) -> PipelineHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweep_every = Duration::from_millis(pipeline.config().sweep_interval_ms.max(1));

    let worker = tokio::spawn(run_worker(
        Arc::clone(&pipeline),
        dispatcher,
        shutdown_rx.clone(),
    ));
    let sweeper = tokio::spawn(run_sweeper(Arc::clone(&pipeline), sweep_every, shutdown_rx));

    PipelineHandle {
        pipeline,
        shutdown_tx,
        worker,
        sweeper,
    }
}

impl PipelineHandle {
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Stop accepting events, let the current dispatch finish, then discard
    /// whatever is still pending
    ///
    /// Returns the number of events discarded.
    pub async fn shutdown(self) -> usize {
        info!("Pipeline shutting down");
        self.pipeline.close();
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.worker.await {
            error!("Playback worker task failed: {}", e);
        }
        if let Err(e) = self.sweeper.await {
            error!("Sweeper task failed: {}", e);
        }

        self.pipeline.discard_pending()
    }
}

async fn run_worker(
    pipeline: Arc<Pipeline>,
    dispatcher: Dispatcher,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Playback worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        let item = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            item = pipeline.queue().dequeue_next() => item,
        };

        debug!(item = %item.id, event_type = %item.event.event_type, "Dispatching");
        let preempt = pipeline
            .queue()
            .preempt_signal()
            .unwrap_or_else(|| Arc::new(Notify::new()));
        let started_at = pipeline.clock().now();
        let outcome = dispatcher.dispatch(&item, &preempt).await;
        pipeline.queue().finish_dispatch();
        pipeline.record_dispatch(&item, &outcome, started_at);
    }
    info!("Playback worker stopped");
}

async fn run_sweeper(pipeline: Arc<Pipeline>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let report = pipeline.sweep();
                if report.flushed > 0 || report.expired > 0 {
                    debug!(flushed = report.flushed, expired = report.expired, "Sweep");
                }
            }
        }
    }
    debug!("Sweeper stopped");
}
