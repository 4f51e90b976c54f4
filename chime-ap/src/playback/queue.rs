//! Priority queue of admitted events
//!
//! Items are ordered by priority (highest first), then enqueue time, then a
//! sequence number so that items enqueued in the same instant keep their
//! submission order. Many submitters enqueue concurrently; exactly one
//! worker consumes via [`PlaybackQueue::dequeue_next`].
//!
//! The queue also tracks the single item currently dispatching, which is
//! what lets a Critical enqueue signal preemption.

use crate::admission::store::lock;
use crate::admission::Event;
use chime_common::config::{DropPolicy, PreemptionMode, QueueConfig};
use chime_common::Priority;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

/// An admitted event waiting for dispatch
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: Uuid,
    pub event: Event,
    pub enqueued_at: Instant,
    seq: u64,
}

impl QueueItem {
    pub fn new(event: Event, enqueued_at: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            enqueued_at,
            seq: 0,
        }
    }

    fn key(&self) -> QueueKey {
        QueueKey {
            urgency: Reverse(self.event.priority),
            enqueued_at: self.enqueued_at,
            seq: self.seq,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    urgency: Reverse<Priority>,
    enqueued_at: Instant,
    seq: u64,
}

/// Result of [`PlaybackQueue::enqueue`]
#[derive(Debug)]
pub enum EnqueueResult {
    /// Stored; `evicted` holds the item the drop policy removed to make room
    Queued { evicted: Option<QueueItem> },
    /// Refused by the drop policy; the incoming item is handed back
    Rejected(QueueItem),
}

#[derive(Debug)]
struct InFlight {
    id: Uuid,
    event_type: String,
    sound_id: String,
    priority: Priority,
    started_at: Instant,
    preempt: Arc<Notify>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: BTreeMap<QueueKey, QueueItem>,
    next_seq: u64,
    in_flight: Option<InFlight>,
}

/// Waiting item, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct QueuedInfo {
    pub id: Uuid,
    pub event_type: String,
    pub sound_id: String,
    pub priority: Priority,
    pub count: u32,
    pub waiting_secs: f64,
}

/// Item currently dispatching, for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct DispatchingInfo {
    pub id: Uuid,
    pub event_type: String,
    pub sound_id: String,
    pub priority: Priority,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub capacity: usize,
    pub drop_policy: DropPolicy,
    pub preemption: PreemptionMode,
    pub preemptions: u64,
    pub dispatching: Option<DispatchingInfo>,
    pub items: Vec<QueuedInfo>,
}

pub struct PlaybackQueue {
    state: Mutex<QueueState>,
    available: Notify,
    capacity: usize,
    drop_policy: DropPolicy,
    preemption: PreemptionMode,
    preemptions: AtomicU64,
}

impl PlaybackQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            capacity: config.capacity.max(1),
            drop_policy: config.drop_policy,
            preemption: config.preemption,
            preemptions: AtomicU64::new(0),
        }
    }

    /// Insert an item, applying the drop policy when full
    pub fn enqueue(&self, mut item: QueueItem) -> EnqueueResult {
        let mut state = lock(&self.state);
        item.seq = state.next_seq;
        state.next_seq += 1;

        let mut evicted = None;
        if state.items.len() >= self.capacity {
            match self.victim(&state, &item) {
                Some(key) => evicted = state.items.remove(&key),
                None => return EnqueueResult::Rejected(item),
            }
        }

        if item.event.priority == Priority::Critical && self.preemption != PreemptionMode::Off {
            if let Some(in_flight) = state.in_flight.as_ref() {
                if in_flight.priority < Priority::Critical {
                    debug!(
                        in_flight = %in_flight.id,
                        critical = %item.id,
                        "Signalling preemption of in-flight dispatch"
                    );
                    in_flight.preempt.notify_one();
                    self.preemptions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        state.items.insert(item.key(), item);
        drop(state);
        self.available.notify_one();
        EnqueueResult::Queued { evicted }
    }

    /// Key of the item to evict for `incoming`, or `None` to refuse it
    fn victim(&self, state: &QueueState, incoming: &QueueItem) -> Option<QueueKey> {
        match self.drop_policy {
            DropPolicy::RejectNew => None,
            DropPolicy::Oldest => state
                .items
                .keys()
                .min_by_key(|k| (k.enqueued_at, k.seq))
                .copied(),
            DropPolicy::Lowest => {
                let lowest = state
                    .items
                    .keys()
                    .min_by_key(|k| (k.urgency.0, k.enqueued_at, k.seq))
                    .copied()?;
                // An incoming item below everything queued is the lowest itself
                if incoming.event.priority < lowest.urgency.0 {
                    None
                } else {
                    Some(lowest)
                }
            }
        }
    }

    /// Pop the head item without waiting and mark it as dispatching
    pub fn try_dequeue(&self) -> Option<QueueItem> {
        let mut state = lock(&self.state);
        let (_, item) = state.items.pop_first()?;
        state.in_flight = Some(InFlight {
            id: item.id,
            event_type: item.event.event_type.clone(),
            sound_id: item.event.sound_id.clone(),
            priority: item.event.priority,
            started_at: Instant::now(),
            preempt: Arc::new(Notify::new()),
        });
        Some(item)
    }

    /// Wait for the next item
    ///
    /// Cancel-safe: an item is only removed once it is being returned.
    pub async fn dequeue_next(&self) -> QueueItem {
        loop {
            if let Some(item) = self.try_dequeue() {
                return item;
            }
            self.available.notified().await;
        }
    }

    /// Preemption signal for the item currently dispatching
    pub fn preempt_signal(&self) -> Option<Arc<Notify>> {
        lock(&self.state)
            .in_flight
            .as_ref()
            .map(|f| Arc::clone(&f.preempt))
    }

    /// Clear the dispatching marker once the dispatcher returns
    pub fn finish_dispatch(&self) {
        lock(&self.state).in_flight = None;
    }

    pub fn is_dispatching(&self) -> bool {
        lock(&self.state).in_flight.is_some()
    }

    /// Remove every waiting item, in dispatch order
    pub fn drain(&self) -> Vec<QueueItem> {
        let mut state = lock(&self.state);
        std::mem::take(&mut state.items).into_values().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn drop_policy(&self) -> DropPolicy {
        self.drop_policy
    }

    pub fn snapshot(&self, now: Instant) -> QueueSnapshot {
        let state = lock(&self.state);
        QueueSnapshot {
            depth: state.items.len(),
            capacity: self.capacity,
            drop_policy: self.drop_policy,
            preemption: self.preemption,
            preemptions: self.preemptions.load(Ordering::Relaxed),
            dispatching: state.in_flight.as_ref().map(|f| DispatchingInfo {
                id: f.id,
                event_type: f.event_type.clone(),
                sound_id: f.sound_id.clone(),
                priority: f.priority,
                elapsed_secs: Instant::now()
                    .saturating_duration_since(f.started_at)
                    .as_secs_f64(),
            }),
            items: state
                .items
                .values()
                .map(|item| QueuedInfo {
                    id: item.id,
                    event_type: item.event.event_type.clone(),
                    sound_id: item.event.sound_id.clone(),
                    priority: item.event.priority,
                    count: item.event.count,
                    waiting_secs: now.saturating_duration_since(item.enqueued_at).as_secs_f64(),
                })
                .collect(),
        }
    }
}
