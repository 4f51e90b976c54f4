//! Burst detection with timed lockout
//!
//! Keeps the arrival timestamps that fall inside the trailing window. When
//! one more arrival would push the count over the limit, the event type is
//! locked out for the configured duration.

use chime_common::config::BurstConfig;
use chime_common::events::BlockReason;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
pub struct BurstWindow {
    /// Oldest first; every entry is `>= now - window` after pruning
    arrivals: VecDeque<Instant>,
    lock_until: Option<Instant>,
}

impl BurstWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop arrivals older than the trailing window
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.arrivals.front() {
            if now.saturating_duration_since(oldest) > window {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
        if matches!(self.lock_until, Some(until) if until <= now) {
            self.lock_until = None;
        }
    }

    /// Evaluate one arrival, recording it when it passes
    pub fn admit(&mut self, now: Instant, config: &BurstConfig) -> Result<(), BlockReason> {
        self.prune(now, config.window());

        if self.is_locked(now) {
            return Err(BlockReason::BurstLockout);
        }

        if self.arrivals.len() + 1 > config.limit as usize {
            self.lock_until = Some(now + config.lockout());
            return Err(BlockReason::BurstExceeded);
        }

        self.arrivals.push_back(now);
        Ok(())
    }

    pub fn is_locked(&self, now: Instant) -> bool {
        matches!(self.lock_until, Some(until) if until > now)
    }

    /// Time left on the lockout, if one is active
    pub fn lockout_remaining(&self, now: Instant) -> Option<Duration> {
        self.lock_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }
}
