//! Audit decision and reason codes

use serde::{Deserialize, Serialize};

/// Why a gate blocked an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    QuietHours,
    QuotaExceeded,
    BurstExceeded,
    BurstLockout,
    RateLimited,
    Cooldown,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockReason::QuietHours => "quiet_hours",
            BlockReason::QuotaExceeded => "quota_exceeded",
            BlockReason::BurstExceeded => "burst_exceeded",
            BlockReason::BurstLockout => "burst_lockout",
            BlockReason::RateLimited => "rate_limited",
            BlockReason::Cooldown => "cooldown",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event was absorbed instead of enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeReason {
    Dedup,
    Aggregation,
}

impl std::fmt::Display for MergeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeReason::Dedup => write!(f, "dedup"),
            MergeReason::Aggregation => write!(f, "aggregation"),
        }
    }
}

/// Why a dispatch did not complete successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchFailure {
    PlaybackError,
    PlaybackTimeout,
}

/// Kind of decision an audit record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Admitted,
    Blocked,
    Merged,
    /// Queued item dropped by the oldest/lowest policy
    Evicted,
    /// Incoming item refused by the reject-new policy
    Rejected,
    Dispatched,
    DispatchFailed,
    /// Admitted but never played because the pipeline shut down
    Discarded,
}

impl std::fmt::Display for AuditDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuditDecision::Admitted => "admitted",
            AuditDecision::Blocked => "blocked",
            AuditDecision::Merged => "merged",
            AuditDecision::Evicted => "evicted",
            AuditDecision::Rejected => "rejected",
            AuditDecision::Dispatched => "dispatched",
            AuditDecision::DispatchFailed => "dispatch_failed",
            AuditDecision::Discarded => "discarded",
        };
        f.write_str(s)
    }
}

/// Reason code attached to an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    QuietHours,
    QuotaExceeded,
    BurstExceeded,
    BurstLockout,
    RateLimited,
    Cooldown,
    Dedup,
    Aggregation,
    PlaybackError,
    PlaybackTimeout,
    DropPolicyApplied,
    Preempted,
    Shutdown,
}

impl From<BlockReason> for AuditReason {
    fn from(reason: BlockReason) -> Self {
        match reason {
            BlockReason::QuietHours => AuditReason::QuietHours,
            BlockReason::QuotaExceeded => AuditReason::QuotaExceeded,
            BlockReason::BurstExceeded => AuditReason::BurstExceeded,
            BlockReason::BurstLockout => AuditReason::BurstLockout,
            BlockReason::RateLimited => AuditReason::RateLimited,
            BlockReason::Cooldown => AuditReason::Cooldown,
        }
    }
}

impl From<MergeReason> for AuditReason {
    fn from(reason: MergeReason) -> Self {
        match reason {
            MergeReason::Dedup => AuditReason::Dedup,
            MergeReason::Aggregation => AuditReason::Aggregation,
        }
    }
}

impl From<DispatchFailure> for AuditReason {
    fn from(failure: DispatchFailure) -> Self {
        match failure {
            DispatchFailure::PlaybackError => AuditReason::PlaybackError,
            DispatchFailure::PlaybackTimeout => AuditReason::PlaybackTimeout,
        }
    }
}
