//! Timestamp utilities and the injectable clock
//!
//! Every admission decision is made against a [`Clock`]: monotonic time for
//! window arithmetic (cooldowns, bursts, buckets) and local wall time for
//! calendar concerns (quiet hours, quota period boundaries).

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert fractional seconds from configuration to a duration
///
/// Negative and non-finite values collapse to zero; configuration
/// validation rejects them before they ever reach this point.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync {
    /// Monotonic instant used for all window calculations
    fn now(&self) -> Instant;

    /// Local civil time used for quiet hours and quota periods
    fn wall(&self) -> NaiveDateTime;
}

/// Clock backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Manually advanced clock for deterministic tests
///
/// Both monotonic and wall time move together when [`ManualClock::advance`]
/// is called. The offset is stored in an atomic so the clock can be shared
/// across threads without locking.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: NaiveDateTime,
    offset_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `wall_origin`
    pub fn new(wall_origin: NaiveDateTime) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin,
            offset_ms: AtomicU64::new(0),
        }
    }

    /// Advance both clocks by `by`
    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Advance both clocks by whole seconds
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> NaiveDateTime {
        let ms = self.offset_ms.load(Ordering::SeqCst) as i64;
        self.wall_origin + chrono::Duration::milliseconds(ms)
    }
}
