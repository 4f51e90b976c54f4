//! Quiet hours schedule
//!
//! Windows are half-open `[start, end)` in local time. A window whose end
//! is not after its start wraps over midnight, so `22:00-07:00` covers
//! 23:30 and 06:59 but not 07:00.

use chime_common::config::QuietHoursConfig;
use chrono::{NaiveDateTime, NaiveTime};

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct QuietHours {
    windows: Vec<(NaiveTime, NaiveTime)>,
    critical_override: bool,
}

impl QuietHours {
    pub fn from_config(config: &QuietHoursConfig) -> Result<Self> {
        let windows = config
            .windows
            .iter()
            .map(|w| w.parse())
            .collect::<chime_common::Result<Vec<_>>>()?;
        Ok(Self {
            windows,
            critical_override: config.critical_override,
        })
    }

    /// Whether `wall` falls inside any window
    pub fn is_active(&self, wall: NaiveDateTime) -> bool {
        let t = wall.time();
        self.windows.iter().any(|&(start, end)| {
            if start < end {
                t >= start && t < end
            } else {
                t >= start || t < end
            }
        })
    }

    pub fn critical_override(&self) -> bool {
        self.critical_override
    }
}
