//! Admission gate chain
//!
//! Gates run in a fixed order and the first non-`Allow` verdict ends the
//! chain:
//!
//! 1. quiet hours
//! 2. quota (checked here, charged only when the event is enqueued)
//! 3. burst detection
//! 4. token bucket (per type, then global)
//! 5. cooldown
//! 6. dedup
//! 7. aggregation
//!
//! Every gate runs under the lock of the event's type shard. Gates that
//! touch global counters take the global lock briefly inside that.

use super::dedup::DedupVerdict;
use super::event::Event;
use super::quiet_hours::QuietHours;
use super::store::{AdmissionStore, TypeState};
use chime_common::config::{EventPolicy, GlobalLimits};
use chime_common::events::{BlockReason, MergeReason};
use chime_common::Priority;
use chrono::NaiveDateTime;
use std::time::Instant;
use tracing::debug;

/// Outcome of a single gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Allow,
    Block(BlockReason),
    /// Absorbed; the event produces no queue entry of its own
    Defer(MergeReason),
}

/// Everything a gate may read or update
pub struct GateContext<'a> {
    /// May be replaced by the aggregation gate with a flushed aggregate
    pub event: Event,
    pub now: Instant,
    pub wall: NaiveDateTime,
    pub policy: &'a EventPolicy,
    pub limits: &'a GlobalLimits,
    pub quiet_hours: &'a QuietHours,
    pub state: &'a mut TypeState,
    pub store: &'a AdmissionStore,
}

pub trait Gate: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict;
}

pub struct QuietHoursGate;

impl Gate for QuietHoursGate {
    fn name(&self) -> &'static str {
        "quiet_hours"
    }

    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        if !ctx.quiet_hours.is_active(ctx.wall) {
            return GateVerdict::Allow;
        }
        if ctx.event.priority == Priority::Critical && ctx.quiet_hours.critical_override() {
            return GateVerdict::Allow;
        }
        GateVerdict::Block(BlockReason::QuietHours)
    }
}

pub struct QuotaGate;

impl Gate for QuotaGate {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        if ctx.state.quota.exhausted(&ctx.policy.quota, ctx.wall).is_some() {
            return GateVerdict::Block(BlockReason::QuotaExceeded);
        }
        if ctx.limits.quota.is_unlimited() {
            return GateVerdict::Allow;
        }
        let mut global = ctx.store.global();
        if global.quota.exhausted(&ctx.limits.quota, ctx.wall).is_some() {
            return GateVerdict::Block(BlockReason::QuotaExceeded);
        }
        GateVerdict::Allow
    }
}

pub struct BurstGate;

impl Gate for BurstGate {
    fn name(&self) -> &'static str {
        "burst"
    }

    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        let Some(config) = &ctx.policy.burst else {
            return GateVerdict::Allow;
        };
        match ctx.state.burst.admit(ctx.now, config) {
            Ok(()) => GateVerdict::Allow,
            Err(reason) => GateVerdict::Block(reason),
        }
    }
}

/// Per-type and global token buckets
///
/// Both buckets are refilled and checked before either is charged, so a
/// rejection never leaks a token.
pub struct TokenBucketGate;

impl Gate for TokenBucketGate {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        let now = ctx.now;
        if let Some(bucket) = ctx.state.bucket.as_mut() {
            bucket.refill(now);
            if !bucket.has_token() {
                return GateVerdict::Block(BlockReason::RateLimited);
            }
        }

        let mut global = ctx.store.global();
        if let Some(bucket) = global.bucket.as_mut() {
            bucket.refill(now);
            if !bucket.has_token() {
                return GateVerdict::Block(BlockReason::RateLimited);
            }
            bucket.consume();
        }
        if let Some(bucket) = ctx.state.bucket.as_mut() {
            bucket.consume();
        }
        GateVerdict::Allow
    }
}

pub struct CooldownGate;

impl Gate for CooldownGate {
    fn name(&self) -> &'static str {
        "cooldown"
    }

    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        let cooldown = ctx.policy.cooldown();
        if cooldown.is_zero() {
            return GateVerdict::Allow;
        }
        if ctx.state.cooldown_remaining(ctx.now, cooldown).is_zero() {
            GateVerdict::Allow
        } else {
            GateVerdict::Block(BlockReason::Cooldown)
        }
    }
}

pub struct DedupGate;

impl Gate for DedupGate {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        let window = ctx.policy.dedup_window();
        if window.is_zero() {
            return GateVerdict::Allow;
        }
        match ctx.state.dedup.check(&ctx.event, ctx.now, window) {
            DedupVerdict::Fresh => GateVerdict::Allow,
            DedupVerdict::Duplicate { count } => {
                debug!(
                    event_type = %ctx.event.event_type,
                    sound_id = %ctx.event.sound_id,
                    count,
                    "Duplicate merged"
                );
                GateVerdict::Defer(MergeReason::Dedup)
            }
        }
    }
}

/// Buffers events and lets the aggregate through once the buffer fills
pub struct AggregationGate;

impl Gate for AggregationGate {
    fn name(&self) -> &'static str {
        "aggregation"
    }

    fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        let Some(config) = &ctx.policy.aggregation else {
            return GateVerdict::Allow;
        };
        match ctx.state.aggregation.push(ctx.event.clone(), ctx.now, config) {
            Some(aggregate) => {
                debug!(
                    event_type = %aggregate.event_type,
                    count = aggregate.count,
                    "Aggregation buffer full, flushing"
                );
                ctx.event = aggregate;
                GateVerdict::Allow
            }
            None => GateVerdict::Defer(MergeReason::Aggregation),
        }
    }
}

/// Ordered list of gates
pub struct GateChain {
    gates: Vec<Box<dyn Gate>>,
}

impl GateChain {
    /// The fixed production order
    pub fn standard() -> Self {
        Self {
            gates: vec![
                Box::new(QuietHoursGate),
                Box::new(QuotaGate),
                Box::new(BurstGate),
                Box::new(TokenBucketGate),
                Box::new(CooldownGate),
                Box::new(DedupGate),
                Box::new(AggregationGate),
            ],
        }
    }

    /// Run gates in order until one does not allow the event
    pub fn evaluate(&self, ctx: &mut GateContext<'_>) -> GateVerdict {
        for gate in &self.gates {
            let verdict = gate.evaluate(ctx);
            if verdict != GateVerdict::Allow {
                debug!(
                    gate = gate.name(),
                    event_type = %ctx.event.event_type,
                    verdict = ?verdict,
                    "Gate stopped event"
                );
                return verdict;
            }
        }
        GateVerdict::Allow
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.gates.iter().map(|g| g.name()).collect()
    }
}

impl Default for GateChain {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::store::lock;
    use chime_common::config::{
        AggregationConfig, BurstConfig, QuietHoursConfig, QuietWindow, QuotaConfig,
        TokenBucketConfig,
    };
    use chime_common::NotificationEvent;
    use chrono::NaiveDate;
    use std::time::Duration;

    struct Harness {
        store: AdmissionStore,
        policy: EventPolicy,
        limits: GlobalLimits,
        quiet: QuietHours,
        chain: GateChain,
        t0: Instant,
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 4)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    impl Harness {
        fn new(policy: EventPolicy, limits: GlobalLimits) -> Self {
            let t0 = Instant::now();
            Self {
                store: AdmissionStore::new(&limits, t0, noon()),
                policy,
                limits,
                quiet: QuietHours::default(),
                chain: GateChain::standard(),
                t0,
            }
        }

        fn submit_at(&self, secs: f64, priority: Priority) -> (GateVerdict, Event) {
            let now = self.t0 + Duration::from_secs_f64(secs);
            let shard = self.store.shard("stop", &self.policy, self.t0, noon());
            let mut state = lock(&shard);
            let mut ctx = GateContext {
                event: Event::from_notification(
                    NotificationEvent::new("stop", "bundled:stop").with_priority(priority),
                    now,
                ),
                now,
                wall: noon(),
                policy: &self.policy,
                limits: &self.limits,
                quiet_hours: &self.quiet,
                state: &mut *state,
                store: &self.store,
            };
            let verdict = self.chain.evaluate(&mut ctx);
            (verdict, ctx.event)
        }

        fn submit(&self, secs: f64) -> GateVerdict {
            self.submit_at(secs, Priority::Normal).0
        }
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            GateChain::standard().names(),
            vec![
                "quiet_hours",
                "quota",
                "burst",
                "token_bucket",
                "cooldown",
                "dedup",
                "aggregation"
            ]
        );
    }

    #[test]
    fn test_empty_policy_allows_everything() {
        let h = Harness::new(EventPolicy::default(), GlobalLimits::default());
        for i in 0..50 {
            assert_eq!(h.submit(i as f64 * 0.01), GateVerdict::Allow);
        }
    }

    #[test]
    fn test_quiet_hours_with_critical_override() {
        let mut h = Harness::new(EventPolicy::default(), GlobalLimits::default());
        h.quiet = QuietHours::from_config(&QuietHoursConfig {
            windows: vec![QuietWindow::new("11:00", "13:00")],
            critical_override: true,
        })
        .unwrap();

        assert_eq!(
            h.submit_at(0.0, Priority::High).0,
            GateVerdict::Block(BlockReason::QuietHours)
        );
        assert_eq!(h.submit_at(0.0, Priority::Critical).0, GateVerdict::Allow);
    }

    #[test]
    fn test_quota_is_checked_not_charged() {
        let policy = EventPolicy {
            quota: QuotaConfig {
                hourly: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        assert_eq!(h.submit(0.0), GateVerdict::Allow);
        assert_eq!(h.submit(1.0), GateVerdict::Allow);

        let shard = h.store.existing("stop").unwrap();
        lock(&shard).quota.consume(noon());
        assert_eq!(h.submit(2.0), GateVerdict::Block(BlockReason::QuotaExceeded));
    }

    #[test]
    fn test_global_quota_blocks_every_type() {
        let limits = GlobalLimits {
            quota: QuotaConfig {
                daily: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };
        let h = Harness::new(EventPolicy::default(), limits);
        h.store.global().quota.consume(noon());
        assert_eq!(h.submit(0.0), GateVerdict::Block(BlockReason::QuotaExceeded));
    }

    #[test]
    fn test_burst_then_lockout() {
        let policy = EventPolicy {
            burst: Some(BurstConfig {
                limit: 3,
                window_secs: 10.0,
                lockout_secs: 15.0,
            }),
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        assert_eq!(h.submit(0.0), GateVerdict::Allow);
        assert_eq!(h.submit(1.0), GateVerdict::Allow);
        assert_eq!(h.submit(2.0), GateVerdict::Allow);
        assert_eq!(h.submit(3.0), GateVerdict::Block(BlockReason::BurstExceeded));
        assert_eq!(h.submit(10.0), GateVerdict::Block(BlockReason::BurstLockout));
        assert_eq!(h.submit(20.0), GateVerdict::Allow);
    }

    #[test]
    fn test_token_bucket_rejection_keeps_global_token() {
        let policy = EventPolicy {
            rate_limit: Some(TokenBucketConfig {
                capacity: 1,
                refill_per_sec: 0.0,
            }),
            ..Default::default()
        };
        let limits = GlobalLimits {
            rate_limit: Some(TokenBucketConfig {
                capacity: 5,
                refill_per_sec: 0.0,
            }),
            ..Default::default()
        };
        let h = Harness::new(policy, limits);

        assert_eq!(h.submit(0.0), GateVerdict::Allow);
        assert_eq!(h.submit(0.1), GateVerdict::Block(BlockReason::RateLimited));

        let global = h.store.global();
        assert_eq!(global.bucket.as_ref().unwrap().tokens(), 4.0);
    }

    #[test]
    fn test_token_bucket_refills() {
        let policy = EventPolicy {
            rate_limit: Some(TokenBucketConfig {
                capacity: 1,
                refill_per_sec: 1.0,
            }),
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        assert_eq!(h.submit(0.0), GateVerdict::Allow);
        assert_eq!(h.submit(0.5), GateVerdict::Block(BlockReason::RateLimited));
        assert_eq!(h.submit(1.5), GateVerdict::Allow);
    }

    #[test]
    fn test_cooldown_uses_admission_reservation() {
        let policy = EventPolicy {
            cooldown_secs: 5.0,
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        assert_eq!(h.submit(0.0), GateVerdict::Allow);

        let shard = h.store.existing("stop").unwrap();
        lock(&shard).last_admitted_at = Some(h.t0);

        assert_eq!(h.submit(3.0), GateVerdict::Block(BlockReason::Cooldown));
        assert_eq!(h.submit(6.0), GateVerdict::Allow);
    }

    #[test]
    fn test_dedup_defers_duplicate() {
        let policy = EventPolicy {
            dedup_window_secs: 2.0,
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        let (first, original) = h.submit_at(0.0, Priority::Normal);
        assert_eq!(first, GateVerdict::Allow);

        // Enqueue is what records the entry
        let shard = h.store.existing("stop").unwrap();
        lock(&shard).dedup.record(&original, h.t0);

        assert_eq!(h.submit(1.0), GateVerdict::Defer(MergeReason::Dedup));
        assert_eq!(original.occurrences(), 2);
    }

    #[test]
    fn test_dedup_ignores_events_never_enqueued() {
        let policy = EventPolicy {
            dedup_window_secs: 2.0,
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        assert_eq!(h.submit(0.0), GateVerdict::Allow);
        assert_eq!(h.submit(1.0), GateVerdict::Allow);
    }

    #[test]
    fn test_aggregation_flush_replaces_event() {
        let policy = EventPolicy {
            aggregation: Some(AggregationConfig {
                max_count: 3,
                flush_after_secs: 5.0,
            }),
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        assert_eq!(h.submit(0.0), GateVerdict::Defer(MergeReason::Aggregation));
        assert_eq!(h.submit(0.5), GateVerdict::Defer(MergeReason::Aggregation));

        let (verdict, event) = h.submit_at(1.0, Priority::Normal);
        assert_eq!(verdict, GateVerdict::Allow);
        assert_eq!(event.count, 3);
        assert_eq!(event.arrival_time, h.t0);
    }

    #[test]
    fn test_first_blocking_gate_wins() {
        let policy = EventPolicy {
            cooldown_secs: 60.0,
            burst: Some(BurstConfig {
                limit: 1,
                window_secs: 60.0,
                lockout_secs: 0.0,
            }),
            ..Default::default()
        };
        let h = Harness::new(policy, GlobalLimits::default());
        assert_eq!(h.submit(0.0), GateVerdict::Allow);
        lock(&h.store.existing("stop").unwrap()).last_admitted_at = Some(h.t0);
        // Burst runs before cooldown
        assert_eq!(h.submit(1.0), GateVerdict::Block(BlockReason::BurstExceeded));
    }
}
