//! Pipeline counters
//!
//! Updated from every audit record the pipeline emits, so the counts and
//! the audit stream cannot disagree.

use chime_common::events::{AuditDecision, AuditReason, AuditRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::admission::store::lock;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    submitted: AtomicU64,
    admitted: AtomicU64,
    blocked: AtomicU64,
    merged: AtomicU64,
    evicted: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failed: AtomicU64,
    discarded: AtomicU64,
    by_reason: Mutex<BTreeMap<String, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub admitted: u64,
    pub blocked: u64,
    pub merged: u64,
    pub evicted: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub dispatch_failed: u64,
    pub discarded: u64,
    /// Count per reason code, e.g. `cooldown` or `playback_timeout`
    pub by_reason: BTreeMap<String, u64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe(&self, record: &AuditRecord) {
        let counter = match record.decision {
            AuditDecision::Admitted => &self.admitted,
            AuditDecision::Blocked => &self.blocked,
            AuditDecision::Merged => &self.merged,
            AuditDecision::Evicted => &self.evicted,
            AuditDecision::Rejected => &self.rejected,
            AuditDecision::Dispatched => &self.dispatched,
            AuditDecision::DispatchFailed => &self.dispatch_failed,
            AuditDecision::Discarded => &self.discarded,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(reason) = record.reason {
            *lock(&self.by_reason).entry(reason_code(reason)).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            by_reason: lock(&self.by_reason).clone(),
        }
    }
}

fn reason_code(reason: AuditReason) -> String {
    serde_json::to_value(reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_common::events::BlockReason;

    #[test]
    fn test_observe_counts_decisions_and_reasons() {
        let metrics = PipelineMetrics::new();
        metrics.record_submit();
        metrics.record_submit();
        metrics.observe(&AuditRecord::new("stop", "s", AuditDecision::Admitted));
        metrics.observe(
            &AuditRecord::new("stop", "s", AuditDecision::Blocked)
                .with_reason(BlockReason::Cooldown),
        );

        let snap = metrics.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.admitted, 1);
        assert_eq!(snap.blocked, 1);
        assert_eq!(snap.by_reason.get("cooldown"), Some(&1));
    }
}
