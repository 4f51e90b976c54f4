//! Event types for the chime event system
//!
//! Provides the notification wire types, the audit record emitted for every
//! admission and dispatch decision, and the AuditBus that fans those records
//! out to loggers, metrics collectors and SSE clients.

mod audit_types;
mod notification_types;

pub use audit_types::{AuditDecision, AuditReason, BlockReason, DispatchFailure, MergeReason};
pub use notification_types::{NotificationEvent, Priority, SubmitOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One audit record per gate decision or dispatch result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_type: String,
    pub sound_id: String,
    pub source: Option<String>,
    pub decision: AuditDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<AuditReason>,
    /// Free-form detail, e.g. the executor's error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Number of merged occurrences this record stands for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        event_type: impl Into<String>,
        sound_id: impl Into<String>,
        decision: AuditDecision,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            sound_id: sound_id.into(),
            source: None,
            decision,
            reason: None,
            detail: None,
            occurrences: None,
            timestamp: crate::time::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<AuditReason>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_source(mut self, source: Option<String>) -> Self {
        self.source = source;
        self
    }

    pub fn with_occurrences(mut self, occurrences: u32) -> Self {
        self.occurrences = Some(occurrences);
        self
    }
}

/// Broadcast bus for audit records
///
/// Every subscriber receives every record emitted after it subscribed.
/// Slow subscribers lag and lose the oldest records rather than stalling
/// the pipeline.
pub struct AuditBus {
    tx: broadcast::Sender<AuditRecord>,
    capacity: usize,
}

impl AuditBus {
    /// Creates a new AuditBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use chime_common::events::AuditBus;
    ///
    /// let bus = AuditBus::new(256);
    /// assert_eq!(bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future audit records
    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.tx.subscribe()
    }

    /// Emit a record, ignoring the case where nobody is listening
    ///
    /// # Examples
    ///
    /// ```
    /// use chime_common::events::{AuditBus, AuditDecision, AuditRecord};
    ///
    /// let bus = AuditBus::new(16);
    /// bus.emit_lossy(AuditRecord::new("stop", "bundled:stop", AuditDecision::Admitted));
    /// ```
    pub fn emit_lossy(&self, record: AuditRecord) {
        let _ = self.tx.send(record);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AuditBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_audit_bus_delivers_to_subscribers() {
        let bus = AuditBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(
            AuditRecord::new("stop", "bundled:stop", AuditDecision::Blocked)
                .with_reason(BlockReason::Cooldown),
        );

        let record = rx.recv().await.unwrap();
        assert_eq!(record.event_type, "stop");
        assert_eq!(record.decision, AuditDecision::Blocked);
        assert_eq!(record.reason, Some(AuditReason::Cooldown));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = AuditBus::new(8);
        bus.emit_lossy(AuditRecord::new("stop", "bundled:stop", AuditDecision::Admitted));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_audit_record_serialization_skips_empty_fields() {
        let record = AuditRecord::new("stop", "bundled:stop", AuditDecision::Merged)
            .with_reason(MergeReason::Dedup);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["decision"], "merged");
        assert_eq!(json["reason"], "dedup");
        assert!(json.get("detail").is_none());
        assert!(json.get("occurrences").is_none());
    }
}
