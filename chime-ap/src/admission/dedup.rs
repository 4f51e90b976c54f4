//! Duplicate suppression keyed by `(event type, sound)`
//!
//! One buffer exists per event type, so entries are keyed by sound id.
//! A hit inside the window bumps the counter of the event the duplicate
//! merged into and slides the window forward.
//!
//! Entries are only recorded for events the queue accepted. An entry whose
//! event was later evicted is dead and is replaced by the next arrival.

use super::event::{Event, OccurrenceCounter};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct DedupEntry {
    counter: OccurrenceCounter,
    first_seen: Instant,
    last_seen: Instant,
}

/// Result of checking one event against the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// No live entry; the event may proceed
    Fresh,
    /// Merged into an existing entry; carries the new total
    Duplicate { count: u32 },
}

/// Status view of one live entry
#[derive(Debug, Clone, Serialize)]
pub struct DedupEntryInfo {
    pub sound_id: String,
    pub count: u32,
    pub age_secs: f64,
}

#[derive(Debug, Default, Clone)]
pub struct DedupBuffer {
    entries: HashMap<String, DedupEntry>,
}

impl DedupBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `event` into a live entry if there is one
    ///
    /// A miss records nothing; the caller records the event once it is
    /// actually enqueued.
    pub fn check(&mut self, event: &Event, now: Instant, window: Duration) -> DedupVerdict {
        if let Some(entry) = self.entries.get_mut(&event.sound_id) {
            let live = !entry.counter.is_abandoned()
                && now.saturating_duration_since(entry.last_seen) <= window;
            if live {
                entry.last_seen = now;
                let count = entry.counter.bump();
                return DedupVerdict::Duplicate { count };
            }
            self.entries.remove(&event.sound_id);
        }
        DedupVerdict::Fresh
    }

    /// Start a window for an enqueued event
    pub fn record(&mut self, event: &Event, now: Instant) {
        self.entries.insert(
            event.sound_id.clone(),
            DedupEntry {
                counter: event.counter().clone(),
                first_seen: now,
                last_seen: now,
            },
        );
    }

    /// Drop entries whose window has elapsed
    pub fn expire(&mut self, now: Instant, window: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !entry.counter.is_abandoned()
                && now.saturating_duration_since(entry.last_seen) <= window
        });
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self, now: Instant) -> Vec<DedupEntryInfo> {
        let mut infos: Vec<_> = self
            .entries
            .iter()
            .map(|(sound_id, entry)| DedupEntryInfo {
                sound_id: sound_id.clone(),
                count: entry.counter.get(),
                age_secs: now.saturating_duration_since(entry.first_seen).as_secs_f64(),
            })
            .collect();
        infos.sort_by(|a, b| a.sound_id.cmp(&b.sound_id));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_common::NotificationEvent;

    fn event(sound: &str, at: Instant) -> Event {
        Event::from_notification(NotificationEvent::new("stop", sound), at)
    }

    #[test]
    fn test_duplicate_within_window_bumps_original() {
        let t0 = Instant::now();
        let window = Duration::from_secs(2);
        let mut buf = DedupBuffer::new();

        let first = event("bundled:stop", t0);
        assert_eq!(buf.check(&first, t0, window), DedupVerdict::Fresh);
        buf.record(&first, t0);

        let t1 = t0 + Duration::from_secs(1);
        let second = event("bundled:stop", t1);
        assert_eq!(buf.check(&second, t1, window), DedupVerdict::Duplicate { count: 2 });
        assert_eq!(first.occurrences(), 2);
    }

    #[test]
    fn test_check_alone_records_nothing() {
        let t0 = Instant::now();
        let window = Duration::from_secs(2);
        let mut buf = DedupBuffer::new();

        assert_eq!(buf.check(&event("s", t0), t0, window), DedupVerdict::Fresh);
        assert_eq!(buf.check(&event("s", t0), t0, window), DedupVerdict::Fresh);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_window_slides_with_each_hit() {
        let t0 = Instant::now();
        let window = Duration::from_secs(2);
        let mut buf = DedupBuffer::new();
        let first = event("s", t0);
        buf.record(&first, t0);

        for s in 1..=5 {
            let t = t0 + Duration::from_millis(s * 1500);
            assert!(matches!(
                buf.check(&event("s", t), t, window),
                DedupVerdict::Duplicate { .. }
            ));
        }
        assert_eq!(first.occurrences(), 6);
    }

    #[test]
    fn test_expired_entry_is_replaced() {
        let t0 = Instant::now();
        let window = Duration::from_secs(2);
        let mut buf = DedupBuffer::new();
        let first = event("s", t0);
        buf.record(&first, t0);

        let late = t0 + Duration::from_secs(5);
        let second = event("s", late);
        assert_eq!(buf.check(&second, late, window), DedupVerdict::Fresh);
        assert!(buf.is_empty());
        assert_eq!(first.occurrences(), 1);
    }

    #[test]
    fn test_abandoned_entry_takes_no_duplicates() {
        let t0 = Instant::now();
        let window = Duration::from_secs(2);
        let mut buf = DedupBuffer::new();
        let evicted = event("s", t0);
        buf.record(&evicted, t0);
        evicted.counter().abandon();

        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(buf.check(&event("s", t1), t1, window), DedupVerdict::Fresh);
        assert_eq!(evicted.occurrences(), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_different_sounds_do_not_merge() {
        let t0 = Instant::now();
        let window = Duration::from_secs(2);
        let mut buf = DedupBuffer::new();
        let a = event("a", t0);
        buf.record(&a, t0);
        assert_eq!(buf.check(&event("b", t0), t0, window), DedupVerdict::Fresh);
        buf.record(&event("b", t0), t0);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_expire() {
        let t0 = Instant::now();
        let window = Duration::from_secs(2);
        let mut buf = DedupBuffer::new();
        buf.record(&event("a", t0), t0);
        let t1 = t0 + Duration::from_secs(2);
        buf.record(&event("b", t1), t1);
        let dead = event("c", t1);
        buf.record(&dead, t1);
        dead.counter().abandon();

        assert_eq!(buf.expire(t0 + Duration::from_secs(3), window), 2);
        assert_eq!(buf.entries(t1)[0].sound_id, "b");
    }
}
