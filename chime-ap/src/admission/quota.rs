//! Hourly, daily and weekly quota counters
//!
//! Periods are aligned to local wall time: the top of the hour, local
//! midnight and Monday 00:00. A counter resets exactly once when the clock
//! crosses into a later period. Counters are never adjusted backwards, so a
//! wall clock that steps back does not reopen a spent period.

use chime_common::config::QuotaConfig;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Quota accounting period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaPeriod {
    Hourly,
    Daily,
    Weekly,
}

impl QuotaPeriod {
    pub const ALL: [QuotaPeriod; 3] = [QuotaPeriod::Hourly, QuotaPeriod::Daily, QuotaPeriod::Weekly];

    /// Start of the period containing `wall`
    pub fn period_start(self, wall: NaiveDateTime) -> NaiveDateTime {
        match self {
            QuotaPeriod::Hourly => wall
                .date()
                .and_hms_opt(wall.hour(), 0, 0)
                .unwrap_or(wall),
            QuotaPeriod::Daily => wall.date().and_time(NaiveTime::default()),
            QuotaPeriod::Weekly => {
                let back = i64::from(wall.weekday().num_days_from_monday());
                (wall.date() - ChronoDuration::days(back)).and_time(NaiveTime::default())
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuotaPeriod::Hourly => "hourly",
            QuotaPeriod::Daily => "daily",
            QuotaPeriod::Weekly => "weekly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hourly" => Some(QuotaPeriod::Hourly),
            "daily" => Some(QuotaPeriod::Daily),
            "weekly" => Some(QuotaPeriod::Weekly),
            _ => None,
        }
    }

    fn limit(self, config: &QuotaConfig) -> Option<u32> {
        match self {
            QuotaPeriod::Hourly => config.hourly,
            QuotaPeriod::Daily => config.daily,
            QuotaPeriod::Weekly => config.weekly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PeriodCounter {
    period_start: NaiveDateTime,
    used: u32,
}

/// Consumed counts for one scope (an event type or the global scope)
#[derive(Debug, Clone)]
pub struct QuotaCounters {
    hourly: PeriodCounter,
    daily: PeriodCounter,
    weekly: PeriodCounter,
}

/// Usage of one period for status reporting and persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PeriodUsage {
    pub period: QuotaPeriod,
    pub period_start: NaiveDateTime,
    pub used: u32,
    pub limit: Option<u32>,
}

impl QuotaCounters {
    pub fn new(wall: NaiveDateTime) -> Self {
        let counter = |p: QuotaPeriod| PeriodCounter {
            period_start: p.period_start(wall),
            used: 0,
        };
        Self {
            hourly: counter(QuotaPeriod::Hourly),
            daily: counter(QuotaPeriod::Daily),
            weekly: counter(QuotaPeriod::Weekly),
        }
    }

    fn counter_mut(&mut self, period: QuotaPeriod) -> &mut PeriodCounter {
        match period {
            QuotaPeriod::Hourly => &mut self.hourly,
            QuotaPeriod::Daily => &mut self.daily,
            QuotaPeriod::Weekly => &mut self.weekly,
        }
    }

    fn counter(&self, period: QuotaPeriod) -> &PeriodCounter {
        match period {
            QuotaPeriod::Hourly => &self.hourly,
            QuotaPeriod::Daily => &self.daily,
            QuotaPeriod::Weekly => &self.weekly,
        }
    }

    /// Reset every counter whose period boundary has been crossed
    pub fn roll(&mut self, wall: NaiveDateTime) {
        for period in QuotaPeriod::ALL {
            let start = period.period_start(wall);
            let counter = self.counter_mut(period);
            if start > counter.period_start {
                counter.period_start = start;
                counter.used = 0;
            }
        }
    }

    /// First period whose cap is already met, if any
    pub fn exhausted(&mut self, config: &QuotaConfig, wall: NaiveDateTime) -> Option<QuotaPeriod> {
        if config.is_unlimited() {
            return None;
        }
        self.roll(wall);
        QuotaPeriod::ALL.into_iter().find(|period| {
            period
                .limit(config)
                .is_some_and(|limit| self.counter(*period).used >= limit)
        })
    }

    /// Charge one admission against every period
    pub fn consume(&mut self, wall: NaiveDateTime) {
        self.roll(wall);
        for period in QuotaPeriod::ALL {
            let counter = self.counter_mut(period);
            counter.used = counter.used.saturating_add(1);
        }
    }

    pub fn used(&self, period: QuotaPeriod) -> u32 {
        self.counter(period).used
    }

    /// Load a persisted count
    ///
    /// A count recorded for an earlier period than the current one is stale
    /// and ignored; the boundary has already been crossed.
    pub fn restore(&mut self, period: QuotaPeriod, period_start: NaiveDateTime, used: u32) {
        let counter = self.counter_mut(period);
        if period_start == counter.period_start {
            counter.used = counter.used.max(used);
        } else if period_start > counter.period_start {
            counter.period_start = period_start;
            counter.used = used;
        }
    }

    pub fn usage(&self, config: &QuotaConfig) -> Vec<PeriodUsage> {
        QuotaPeriod::ALL
            .into_iter()
            .map(|period| {
                let counter = self.counter(period);
                PeriodUsage {
                    period,
                    period_start: counter.period_start,
                    used: counter.used,
                    limit: period.limit(config),
                }
            })
            .collect()
    }
}
