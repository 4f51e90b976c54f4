//! Pipeline-internal event representation

use chime_common::{NotificationEvent, Priority};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared count of occurrences folded into one event
///
/// Created with a value of 1 at ingress. Duplicates absorbed by the dedup
/// gate bump the counter of the event they merged into, even after that
/// event has been enqueued. A counter whose event left the queue without
/// playing is marked abandoned and takes no further duplicates.
#[derive(Debug, Clone)]
pub struct OccurrenceCounter(Arc<CounterInner>);

#[derive(Debug)]
struct CounterInner {
    count: AtomicU32,
    abandoned: AtomicBool,
}

impl OccurrenceCounter {
    pub fn new() -> Self {
        Self(Arc::new(CounterInner {
            count: AtomicU32::new(1),
            abandoned: AtomicBool::new(false),
        }))
    }

    /// Record one more occurrence, returning the new total
    pub fn bump(&self) -> u32 {
        self.0.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u32 {
        self.0.count.load(Ordering::SeqCst)
    }

    /// The owning event will never play (evicted)
    pub fn abandon(&self) {
        self.0.abandoned.store(true, Ordering::SeqCst);
    }

    pub fn is_abandoned(&self) -> bool {
        self.0.abandoned.load(Ordering::SeqCst)
    }
}

impl Default for OccurrenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// An event after ingress: volume clamped, arrival stamped
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub sound_id: String,
    /// 0.0-1.0
    pub volume: f32,
    pub priority: Priority,
    /// Monotonic ingress time
    pub arrival_time: Instant,
    pub source: Option<String>,
    /// Number of events coalesced into this one (aggregation)
    pub count: u32,
    counters: Vec<OccurrenceCounter>,
}

impl Event {
    /// Convert a submitted notification into a pipeline event
    pub fn from_notification(notification: NotificationEvent, arrival_time: Instant) -> Self {
        let volume = notification.volume.unwrap_or(1.0);
        let volume = if volume.is_nan() { 1.0 } else { volume.clamp(0.0, 1.0) };
        Self {
            event_type: notification.event_type,
            sound_id: notification.sound_id,
            volume,
            priority: notification.priority,
            arrival_time,
            source: notification.source,
            count: 1,
            counters: vec![OccurrenceCounter::new()],
        }
    }

    /// Coalesce buffered events into one
    ///
    /// The result carries the first event's sound, volume and priority, the
    /// earliest arrival time, and `count` equal to the number of events.
    /// Returns `None` for an empty buffer.
    pub fn aggregate(events: Vec<Event>) -> Option<Event> {
        let count = events.len() as u32;
        let mut iter = events.into_iter();
        let mut first = iter.next()?;
        for event in iter {
            first.arrival_time = first.arrival_time.min(event.arrival_time);
            first.counters.extend(event.counters);
        }
        first.count = count;
        Some(first)
    }

    /// Primary occurrence counter, the one dedup bumps
    pub fn counter(&self) -> &OccurrenceCounter {
        &self.counters[0]
    }

    /// Total occurrences represented, including merged duplicates
    pub fn occurrences(&self) -> u32 {
        self.counters.iter().map(OccurrenceCounter::get).sum()
    }
}
