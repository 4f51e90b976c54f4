//! Admission state store
//!
//! One [`TypeState`] per event type, each behind its own mutex, plus one
//! [`GlobalState`] behind a separate mutex. Gate evaluation for an event
//! holds its type's lock for the whole chain, so two events of the same type
//! never evaluate concurrently while unrelated types proceed in parallel.
//!
//! Lock order is always type -> global -> queue.

use super::aggregation::AggregationBuffer;
use super::burst::BurstWindow;
use super::dedup::DedupBuffer;
use super::quota::QuotaCounters;
use super::token_bucket::TokenBucket;
use chime_common::config::{EventPolicy, GlobalLimits};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Lock a std mutex, recovering the data if a holder panicked
///
/// Admission state stays internally consistent between statements, so a
/// panic elsewhere never leaves it half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mutable admission state for one event type
#[derive(Debug)]
pub struct TypeState {
    pub event_type: String,
    /// Most recent successful dispatch
    pub last_played_at: Option<Instant>,
    /// Most recent admission; reserves the cooldown before playback
    pub last_admitted_at: Option<Instant>,
    pub burst: BurstWindow,
    pub bucket: Option<TokenBucket>,
    pub quota: QuotaCounters,
    pub dedup: DedupBuffer,
    pub aggregation: AggregationBuffer,
    pub plays: u64,
    pub failures: u64,
}

impl TypeState {
    pub fn new(event_type: &str, policy: &EventPolicy, now: Instant, wall: NaiveDateTime) -> Self {
        Self {
            event_type: event_type.to_string(),
            last_played_at: None,
            last_admitted_at: None,
            burst: BurstWindow::new(),
            bucket: policy.rate_limit.as_ref().map(|cfg| TokenBucket::new(cfg, now)),
            quota: QuotaCounters::new(wall),
            dedup: DedupBuffer::new(),
            aggregation: AggregationBuffer::new(),
            plays: 0,
            failures: 0,
        }
    }

    /// Instant the cooldown is measured from
    pub fn cooldown_anchor(&self) -> Option<Instant> {
        match (self.last_played_at, self.last_admitted_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn cooldown_remaining(&self, now: Instant, cooldown: Duration) -> Duration {
        match self.cooldown_anchor() {
            Some(anchor) => (anchor + cooldown).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// Counters shared by every event type
#[derive(Debug)]
pub struct GlobalState {
    pub bucket: Option<TokenBucket>,
    pub quota: QuotaCounters,
}

impl GlobalState {
    pub fn new(limits: &GlobalLimits, now: Instant, wall: NaiveDateTime) -> Self {
        Self {
            bucket: limits.rate_limit.as_ref().map(|cfg| TokenBucket::new(cfg, now)),
            quota: QuotaCounters::new(wall),
        }
    }
}

/// Process-wide admission state, owned by one pipeline instance
pub struct AdmissionStore {
    types: RwLock<HashMap<String, Arc<Mutex<TypeState>>>>,
    global: Mutex<GlobalState>,
}

impl AdmissionStore {
    pub fn new(limits: &GlobalLimits, now: Instant, wall: NaiveDateTime) -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            global: Mutex::new(GlobalState::new(limits, now, wall)),
        }
    }

    /// State shard for `event_type`, created on first use
    pub fn shard(
        &self,
        event_type: &str,
        policy: &EventPolicy,
        now: Instant,
        wall: NaiveDateTime,
    ) -> Arc<Mutex<TypeState>> {
        if let Some(shard) = self.existing(event_type) {
            return shard;
        }
        let mut types = self.types.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(types.entry(event_type.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(TypeState::new(event_type, policy, now, wall)))
        }))
    }

    /// State shard for `event_type` if it has been seen
    pub fn existing(&self, event_type: &str) -> Option<Arc<Mutex<TypeState>>> {
        self.types
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event_type)
            .cloned()
    }

    /// All known shards, sorted by event type
    pub fn shards(&self) -> Vec<(String, Arc<Mutex<TypeState>>)> {
        let types = self.types.read().unwrap_or_else(PoisonError::into_inner);
        let mut shards: Vec<_> = types
            .iter()
            .map(|(name, shard)| (name.clone(), Arc::clone(shard)))
            .collect();
        shards.sort_by(|a, b| a.0.cmp(&b.0));
        shards
    }

    pub fn global(&self) -> MutexGuard<'_, GlobalState> {
        lock(&self.global)
    }

    /// Record a successful dispatch
    pub fn record_played(&self, event_type: &str, at: Instant) {
        if let Some(shard) = self.existing(event_type) {
            let mut state = lock(&shard);
            state.last_played_at = Some(at);
            state.plays += 1;
        }
    }

    /// Record a failed dispatch; cooldown and quota are left as charged
    pub fn record_failed(&self, event_type: &str) {
        if let Some(shard) = self.existing(event_type) {
            lock(&shard).failures += 1;
        }
    }
}
