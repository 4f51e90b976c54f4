//! Event admission and playback pipeline
//!
//! [`Pipeline::submit`] is the single ingress point. It runs the gate chain
//! under the event type's lock, commits admitted events to the playback
//! queue, and emits one audit record per decision. The playback worker and
//! the sweeper live in [`crate::worker`].

use crate::admission::gates::{GateChain, GateContext, GateVerdict};
use crate::admission::store::{lock, AdmissionStore, TypeState};
use crate::admission::{Event, QuietHours};
use crate::db::quota_store::{QuotaRecord, QuotaScope};
use crate::error::Result;
use crate::metrics::PipelineMetrics;
use crate::playback::{DispatchOutcome, EnqueueResult, PlaybackQueue, QueueItem};
use chime_common::config::{ChimeConfig, EventPolicy};
use chime_common::events::{AuditBus, AuditDecision, AuditReason, AuditRecord, BlockReason};
use chime_common::time::Clock;
use chime_common::{NotificationEvent, SubmitOutcome};
use chrono::NaiveDateTime;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Work done by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Aggregation buffers flushed because their deadline passed
    pub flushed: usize,
    /// Dedup entries dropped because their window elapsed
    pub expired: usize,
}

pub struct Pipeline {
    pub(crate) config: Arc<ChimeConfig>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) chain: GateChain,
    pub(crate) quiet_hours: QuietHours,
    pub(crate) store: AdmissionStore,
    pub(crate) queue: PlaybackQueue,
    pub(crate) audit: AuditBus,
    pub(crate) metrics: PipelineMetrics,
    /// Set once shutdown begins; submits hold the read side while gating
    closed: RwLock<bool>,
}

fn audit_for(event: &Event, decision: AuditDecision) -> AuditRecord {
    AuditRecord::new(&event.event_type, &event.sound_id, decision).with_source(event.source.clone())
}

impl Pipeline {
    /// Build a pipeline, refusing an invalid configuration
    pub fn new(config: Arc<ChimeConfig>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let quiet_hours = QuietHours::from_config(&config.quiet_hours)?;
        let store = AdmissionStore::new(&config.global, clock.now(), clock.wall());
        let queue = PlaybackQueue::new(&config.queue);
        let audit = AuditBus::new(config.audit_capacity.max(1));

        Ok(Self {
            chain: GateChain::standard(),
            quiet_hours,
            store,
            queue,
            audit,
            metrics: PipelineMetrics::new(),
            closed: RwLock::new(false),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &ChimeConfig {
        &self.config
    }

    pub fn queue(&self) -> &PlaybackQueue {
        &self.queue
    }

    pub fn store(&self) -> &AdmissionStore {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn subscribe_audit(&self) -> broadcast::Receiver<AuditRecord> {
        self.audit.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting events
    ///
    /// Waits for submits already evaluating gates to finish, so afterwards
    /// no event is half-admitted.
    pub fn close(&self) {
        let mut closed = self.closed.write().unwrap_or_else(PoisonError::into_inner);
        if !*closed {
            *closed = true;
            info!("Pipeline closed to new events");
        }
    }

    /// Run one event through admission
    ///
    /// Never blocks on playback. A due aggregation buffer for the same type
    /// is flushed before the new event is evaluated.
    pub fn submit(&self, notification: NotificationEvent) -> SubmitOutcome {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            debug!(event_type = %notification.event_type, "Submit after shutdown");
            return SubmitOutcome::Closed;
        }

        self.metrics.record_submit();
        let now = self.clock.now();
        let wall = self.clock.wall();
        let event = Event::from_notification(notification, now);
        let policy = self.config.policy_for(&event.event_type);
        let shard = self.store.shard(&event.event_type, policy, now, wall);
        let mut state = lock(&shard);

        if state.aggregation.is_due(now) {
            if let Some(aggregate) = state.aggregation.flush() {
                let (event_type, count) = (aggregate.event_type.clone(), aggregate.count);
                let flushed = self.commit(&mut state, policy, aggregate, now, wall);
                debug!(%event_type, count, outcome = ?flushed, "Flushed stale aggregation");
            }
        }

        let mut ctx = GateContext {
            event,
            now,
            wall,
            policy,
            limits: &self.config.global,
            quiet_hours: &self.quiet_hours,
            state: &mut *state,
            store: &self.store,
        };
        let verdict = self.chain.evaluate(&mut ctx);
        let event = ctx.event;

        let outcome = match verdict {
            GateVerdict::Allow => self.commit(&mut state, policy, event, now, wall),
            GateVerdict::Block(reason) => {
                self.emit(audit_for(&event, AuditDecision::Blocked).with_reason(reason));
                SubmitOutcome::Blocked { reason }
            }
            GateVerdict::Defer(reason) => {
                self.emit(audit_for(&event, AuditDecision::Merged).with_reason(reason));
                SubmitOutcome::Merged { reason }
            }
        };
        drop(state);
        drop(closed);
        outcome
    }

    /// Enqueue an event that passed every gate
    ///
    /// Quotas are re-checked under the global lock, since another type may
    /// have spent the last global unit since the quota gate ran, and are
    /// only charged once the queue has accepted the item.
    fn commit(
        &self,
        state: &mut TypeState,
        policy: &EventPolicy,
        event: Event,
        now: Instant,
        wall: NaiveDateTime,
    ) -> SubmitOutcome {
        let mut global = self.store.global();
        let spent = state
            .quota
            .exhausted(&policy.quota, wall)
            .or_else(|| global.quota.exhausted(&self.config.global.quota, wall));
        if let Some(period) = spent {
            drop(global);
            self.emit(
                audit_for(&event, AuditDecision::Blocked)
                    .with_reason(BlockReason::QuotaExceeded)
                    .with_detail(format!("{} quota spent", period.as_str())),
            );
            return SubmitOutcome::Blocked {
                reason: BlockReason::QuotaExceeded,
            };
        }

        let dedup_entry = (!policy.dedup_window().is_zero()).then(|| event.clone());
        let item = QueueItem::new(event, now);
        let item_id = item.id;
        let admitted = audit_for(&item.event, AuditDecision::Admitted)
            .with_occurrences(item.event.count);
        let priority = item.event.priority;

        match self.queue.enqueue(item) {
            EnqueueResult::Rejected(item) => {
                drop(global);
                let policy = self.queue.drop_policy();
                warn!(event_type = %item.event.event_type, %policy, "Queue full, event refused");
                self.emit(
                    audit_for(&item.event, AuditDecision::Rejected)
                        .with_reason(AuditReason::DropPolicyApplied)
                        .with_detail(format!("queue full, drop policy {}", policy)),
                );
                SubmitOutcome::QueueFull { policy }
            }
            EnqueueResult::Queued { evicted } => {
                state.quota.consume(wall);
                global.quota.consume(wall);
                drop(global);
                state.last_admitted_at = Some(now);
                if let Some(entry) = &dedup_entry {
                    state.dedup.record(entry, now);
                }

                info!(
                    event_type = %state.event_type,
                    %priority,
                    item = %item_id,
                    "Event admitted"
                );
                self.emit(admitted);
                if let Some(victim) = evicted {
                    warn!(event_type = %victim.event.event_type, item = %victim.id, "Queued event evicted");
                    // Later duplicates must start a new entry, not merge into this one
                    victim.event.counter().abandon();
                    self.emit(
                        audit_for(&victim.event, AuditDecision::Evicted)
                            .with_reason(AuditReason::DropPolicyApplied)
                            .with_occurrences(victim.event.occurrences())
                            .with_detail(format!(
                                "queue full, drop policy {}",
                                self.queue.drop_policy()
                            )),
                    );
                }
                SubmitOutcome::Admitted { item_id }
            }
        }
    }

    /// Flush due aggregation buffers and expire stale dedup entries
    pub fn sweep(&self) -> SweepReport {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        let mut report = SweepReport::default();
        if *closed {
            return report;
        }

        let now = self.clock.now();
        let wall = self.clock.wall();
        for (event_type, shard) in self.store.shards() {
            let policy = self.config.policy_for(&event_type);
            let mut state = lock(&shard);
            if state.aggregation.is_due(now) {
                if let Some(aggregate) = state.aggregation.flush() {
                    self.commit(&mut state, policy, aggregate, now, wall);
                    report.flushed += 1;
                }
            }
            report.expired += state.dedup.expire(now, policy.dedup_window());
        }
        report
    }

    /// Update state and audit after the worker's dispatch returns
    ///
    /// `started_at` is when the worker began the dispatch; a successful play
    /// stamps it as the type's last play, so cooldown does not grow with
    /// the sound's length. Failures roll nothing back: cooldown and quota
    /// stay charged.
    pub fn record_dispatch(
        &self,
        item: &QueueItem,
        outcome: &DispatchOutcome,
        started_at: Instant,
    ) {
        let event = &item.event;
        let occurrences = event.occurrences();
        match outcome {
            DispatchOutcome::Played { elapsed } => {
                self.store.record_played(&event.event_type, started_at);
                info!(
                    event_type = %event.event_type,
                    sound_id = %event.sound_id,
                    occurrences,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Dispatched"
                );
                self.emit(audit_for(event, AuditDecision::Dispatched).with_occurrences(occurrences));
            }
            DispatchOutcome::Failed { failure, message } => {
                self.store.record_failed(&event.event_type);
                warn!(
                    event_type = %event.event_type,
                    sound_id = %event.sound_id,
                    ?failure,
                    error = %message,
                    "Dispatch failed"
                );
                self.emit(
                    audit_for(event, AuditDecision::DispatchFailed)
                        .with_reason(*failure)
                        .with_detail(message.clone())
                        .with_occurrences(occurrences),
                );
            }
            DispatchOutcome::Preempted => {
                self.store.record_failed(&event.event_type);
                info!(event_type = %event.event_type, "Dispatch preempted by Critical event");
                self.emit(
                    audit_for(event, AuditDecision::DispatchFailed)
                        .with_reason(AuditReason::Preempted)
                        .with_occurrences(occurrences),
                );
            }
        }
    }

    /// Audit everything still queued or buffered as discarded
    ///
    /// Called once the worker has stopped. Returns the number of events
    /// discarded.
    pub fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        for item in self.queue.drain() {
            self.emit(
                audit_for(&item.event, AuditDecision::Discarded)
                    .with_reason(AuditReason::Shutdown)
                    .with_occurrences(item.event.occurrences()),
            );
            discarded += 1;
        }
        for (_, shard) in self.store.shards() {
            let buffered = lock(&shard).aggregation.discard();
            for event in buffered {
                self.emit(
                    audit_for(&event, AuditDecision::Discarded)
                        .with_reason(AuditReason::Shutdown)
                        .with_detail("pending aggregation"),
                );
                discarded += 1;
            }
        }
        if discarded > 0 {
            info!(discarded, "Discarded pending events at shutdown");
        }
        discarded
    }

    /// Quota counters with a non-zero count, for persistence
    pub fn quota_usage(&self) -> Vec<QuotaRecord> {
        let mut records = Vec::new();
        for (event_type, shard) in self.store.shards() {
            let policy = self.config.policy_for(&event_type);
            let usage = lock(&shard).quota.usage(&policy.quota);
            records.extend(usage.into_iter().filter(|u| u.used > 0).map(|u| QuotaRecord {
                scope: QuotaScope::EventType(event_type.clone()),
                period: u.period,
                period_start: u.period_start,
                used: u.used,
            }));
        }
        let usage = self.store.global().quota.usage(&self.config.global.quota);
        records.extend(usage.into_iter().filter(|u| u.used > 0).map(|u| QuotaRecord {
            scope: QuotaScope::Global,
            period: u.period,
            period_start: u.period_start,
            used: u.used,
        }));
        records
    }

    /// Load persisted quota counters; records from past periods are ignored
    pub fn restore_quota_usage(&self, records: &[QuotaRecord]) {
        let now = self.clock.now();
        let wall = self.clock.wall();
        for record in records {
            match &record.scope {
                QuotaScope::Global => {
                    let mut global = self.store.global();
                    global.quota.roll(wall);
                    global.quota.restore(record.period, record.period_start, record.used);
                }
                QuotaScope::EventType(event_type) => {
                    let policy = self.config.policy_for(event_type);
                    let shard = self.store.shard(event_type, policy, now, wall);
                    let mut state = lock(&shard);
                    state.quota.roll(wall);
                    state.quota.restore(record.period, record.period_start, record.used);
                }
            }
        }
        debug!(records = records.len(), "Quota usage restored");
    }

    fn emit(&self, record: AuditRecord) {
        debug!(
            event_type = %record.event_type,
            decision = %record.decision,
            reason = ?record.reason,
            "Audit"
        );
        self.metrics.observe(&record);
        self.audit.emit_lossy(record);
    }
}
