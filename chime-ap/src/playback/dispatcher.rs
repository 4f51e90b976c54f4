//! Dispatcher: plays one queue item through the executor
//!
//! The dispatcher owns no state beyond the item it is handed. It resolves
//! the sound, awaits the executor under the dispatch timeout, then holds
//! the configured gap before the worker may pull the next item. A
//! preemption signal cuts the gap short, and in `interrupt` mode also
//! abandons the play call itself.

use super::executor::{PlaybackExecutor, SoundResolver};
use super::queue::QueueItem;
use chime_common::config::{PreemptionMode, QueueConfig};
use chime_common::events::DispatchFailure;
use chime_common::Priority;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// How one dispatch ended
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Played { elapsed: Duration },
    Failed {
        failure: DispatchFailure,
        message: String,
    },
    /// Abandoned for a Critical arrival (`interrupt` mode only)
    Preempted,
}

pub struct Dispatcher {
    resolver: Arc<dyn SoundResolver>,
    executor: Arc<dyn PlaybackExecutor>,
    timeout: Duration,
    gap: Duration,
    preemption: PreemptionMode,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<dyn SoundResolver>,
        executor: Arc<dyn PlaybackExecutor>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            resolver,
            executor,
            timeout: config.dispatch_timeout(),
            gap: config.gap(),
            preemption: config.preemption,
        }
    }

    /// Play `item`, never returning an error
    ///
    /// Failures come back as [`DispatchOutcome::Failed`]; the caller audits
    /// them and moves on to the next item.
    pub async fn dispatch(&self, item: &QueueItem, preempt: &Notify) -> DispatchOutcome {
        let event = &item.event;
        let sound = match self.resolver.resolve(&event.sound_id) {
            Ok(path) => path,
            Err(e) => {
                warn!(sound_id = %event.sound_id, error = %e, "Sound resolution failed");
                return DispatchOutcome::Failed {
                    failure: DispatchFailure::PlaybackError,
                    message: e.to_string(),
                };
            }
        };

        let started = Instant::now();
        let play = tokio::time::timeout(self.timeout, self.executor.play(&sound, event.volume));

        let result = if self.preemption == PreemptionMode::Interrupt
            && event.priority < Priority::Critical
        {
            tokio::select! {
                result = play => result,
                _ = preempt.notified() => {
                    debug!(item = %item.id, "In-flight dispatch preempted");
                    return DispatchOutcome::Preempted;
                }
            }
        } else {
            play.await
        };

        let outcome = match result {
            Ok(Ok(())) => DispatchOutcome::Played {
                elapsed: started.elapsed(),
            },
            Ok(Err(e)) => DispatchOutcome::Failed {
                failure: DispatchFailure::PlaybackError,
                message: e.to_string(),
            },
            Err(_) => DispatchOutcome::Failed {
                failure: DispatchFailure::PlaybackTimeout,
                message: format!("no completion within {:?}", self.timeout),
            },
        };

        self.hold_gap(preempt).await;
        outcome
    }

    async fn hold_gap(&self, preempt: &Notify) {
        if self.gap.is_zero() {
            return;
        }
        if self.preemption == PreemptionMode::Off {
            tokio::time::sleep(self.gap).await;
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.gap) => {}
            _ = preempt.notified() => debug!("Gap skipped for Critical item"),
        }
    }
}
