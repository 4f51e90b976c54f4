//! Read-only status snapshot
//!
//! Each event type's lock is taken and released in turn, so the snapshot is
//! consistent per type but not across types.

use crate::admission::dedup::DedupEntryInfo;
use crate::admission::store::lock;
use crate::admission::{BucketSnapshot, PeriodUsage};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::Pipeline;
use crate::playback::QueueSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub accepting: bool,
    pub quiet_hours_active: bool,
    pub queue: QueueSnapshot,
    pub global: GlobalStatus,
    pub event_types: Vec<EventTypeStatus>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalStatus {
    pub tokens: Option<BucketSnapshot>,
    pub quota: Vec<PeriodUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventTypeStatus {
    pub event_type: String,
    pub plays: u64,
    pub failures: u64,
    pub last_played_secs_ago: Option<f64>,
    pub cooldown_remaining_secs: f64,
    /// Arrivals inside the trailing burst window
    pub burst_count: usize,
    pub burst_lockout_remaining_secs: Option<f64>,
    pub tokens: Option<BucketSnapshot>,
    pub quota: Vec<PeriodUsage>,
    pub dedup: Vec<DedupEntryInfo>,
    pub aggregation_pending: usize,
}

impl Pipeline {
    pub fn status(&self) -> StatusSnapshot {
        let now = self.clock.now();
        let wall = self.clock.wall();

        let event_types = self
            .store
            .shards()
            .into_iter()
            .map(|(event_type, shard)| {
                let policy = self.config.policy_for(&event_type);
                let mut state = lock(&shard);
                state.quota.roll(wall);
                if let Some(burst) = &policy.burst {
                    state.burst.prune(now, burst.window());
                }
                if let Some(bucket) = state.bucket.as_mut() {
                    bucket.refill(now);
                }
                EventTypeStatus {
                    plays: state.plays,
                    failures: state.failures,
                    last_played_secs_ago: state
                        .last_played_at
                        .map(|at| now.saturating_duration_since(at).as_secs_f64()),
                    cooldown_remaining_secs: state
                        .cooldown_remaining(now, policy.cooldown())
                        .as_secs_f64(),
                    burst_count: state.burst.len(),
                    burst_lockout_remaining_secs: state
                        .burst
                        .lockout_remaining(now)
                        .map(|d| d.as_secs_f64()),
                    tokens: state.bucket.as_ref().map(|b| b.snapshot()),
                    quota: state.quota.usage(&policy.quota),
                    dedup: state.dedup.entries(now),
                    aggregation_pending: state.aggregation.len(),
                    event_type,
                }
            })
            .collect();

        let global = {
            let mut global = self.store.global();
            global.quota.roll(wall);
            if let Some(bucket) = global.bucket.as_mut() {
                bucket.refill(now);
            }
            GlobalStatus {
                tokens: global.bucket.as_ref().map(|b| b.snapshot()),
                quota: global.quota.usage(&self.config.global.quota),
            }
        };

        StatusSnapshot {
            generated_at: chime_common::time::now(),
            accepting: !self.is_closed(),
            quiet_hours_active: self.quiet_hours.is_active(wall),
            queue: self.queue.snapshot(now),
            global,
            event_types,
            metrics: self.metrics.snapshot(),
        }
    }
}
