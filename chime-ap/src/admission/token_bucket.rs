//! Token bucket rate limiter
//!
//! Tokens refill continuously at `refill_per_sec` up to `capacity`; each
//! admission consumes one. The bucket carries no lock of its own: it lives
//! inside the per-type or global admission state and is mutated under that
//! state's lock.

use chime_common::config::TokenBucketConfig;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

/// Point-in-time view for status reporting
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BucketSnapshot {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(config: &TokenBucketConfig, now: Instant) -> Self {
        let capacity = f64::from(config.capacity);
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: config.refill_per_sec.max(0.0),
            last_refill: now,
        }
    }

    /// Add tokens for the time elapsed since the last refill
    ///
    /// `tokens = min(capacity, tokens + elapsed_seconds * refill_rate)`
    pub fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    pub fn has_token(&self) -> bool {
        self.tokens >= 1.0
    }

    /// Take one token; callers check [`has_token`](Self::has_token) first
    pub fn consume(&mut self) {
        self.tokens = (self.tokens - 1.0).max(0.0);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            tokens: self.tokens,
            capacity: self.capacity,
            refill_per_sec: self.refill_per_sec,
        }
    }
}
