//! Aggregation buffer for coalescing bursts of one event type
//!
//! Buffered events are not enqueued individually. The buffer flushes into a
//! single synthesized event when it reaches `max_count` or when its deadline
//! passes, whichever comes first. The deadline is a plain value refreshed on
//! every append and checked lazily (next submit of the type, or the sweeper).

use super::event::Event;
use chime_common::config::AggregationConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct AggregationBuffer {
    pending: Vec<Event>,
    deadline: Option<Instant>,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `event`; returns the aggregate if this append filled the buffer
    pub fn push(&mut self, event: Event, now: Instant, config: &AggregationConfig) -> Option<Event> {
        self.pending.push(event);
        self.deadline = Some(now + config.flush_after());
        if self.pending.len() >= config.max_count {
            return self.flush();
        }
        None
    }

    /// Whether the deadline has elapsed with events still pending
    pub fn is_due(&self, now: Instant) -> bool {
        !self.pending.is_empty() && self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Coalesce everything pending into one event
    pub fn flush(&mut self) -> Option<Event> {
        self.deadline = None;
        Event::aggregate(std::mem::take(&mut self.pending))
    }

    /// Throw pending events away, returning them for auditing
    pub fn discard(&mut self) -> Vec<Event> {
        self.deadline = None;
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn time_to_deadline(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}
