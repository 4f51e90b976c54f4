//! Notification event wire types
//!
//! What event sources send to the daemon, and what they get back.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use uuid::Uuid;

use super::audit_types::{BlockReason, MergeReason};
use crate::config::DropPolicy;

/// Scheduling priority of a notification
///
/// Ordering is by urgency: `Critical > High > Normal > Low > Background`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

impl Priority {
    /// Numeric urgency, higher is more urgent
    pub fn rank(self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
            Priority::Background => 0,
        }
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
            Priority::Background => write!(f, "background"),
        }
    }
}

impl FromStr for Priority {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            "background" => Ok(Priority::Background),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown priority '{}'",
                other
            ))),
        }
    }
}

/// One notification occurrence as submitted by a hook, monitor or user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Logical channel, e.g. "stop" or "permission_prompt"
    pub event_type: String,
    /// Opaque sound reference, e.g. "bundled:stop"
    pub sound_id: String,
    /// Playback volume; clamped to 0.0-1.0 at ingress
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(default)]
    pub priority: Priority,
    /// Origin tag, only used for audit
    #[serde(default)]
    pub source: Option<String>,
}

impl NotificationEvent {
    pub fn new(event_type: impl Into<String>, sound_id: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            sound_id: sound_id.into(),
            volume: None,
            priority: Priority::Normal,
            source: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Result of submitting an event to the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Event (or the aggregate it completed) was enqueued for playback
    Admitted { item_id: Uuid },
    /// A gate refused the event
    Blocked { reason: BlockReason },
    /// Event was absorbed into an existing or pending event
    Merged { reason: MergeReason },
    /// Queue was full and the reject-new policy refused the event
    QueueFull { policy: DropPolicy },
    /// Pipeline is shutting down
    Closed,
}

impl SubmitOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, SubmitOutcome::Admitted { .. })
    }
}
