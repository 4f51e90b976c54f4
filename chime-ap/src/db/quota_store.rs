//! Quota counter persistence
//!
//! One row per (scope, period). Saving replaces the whole table so that
//! periods which have since rolled over do not linger.

use crate::admission::QuotaPeriod;
use crate::error::Result;
use chrono::NaiveDateTime;
use sqlx::{Pool, Sqlite};
use tracing::{debug, warn};

const GLOBAL_SCOPE: &str = "global";
const EVENT_SCOPE_PREFIX: &str = "event:";

/// Whose counter a record belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QuotaScope {
    Global,
    EventType(String),
}

impl QuotaScope {
    pub fn to_key(&self) -> String {
        match self {
            QuotaScope::Global => GLOBAL_SCOPE.to_string(),
            QuotaScope::EventType(name) => format!("{}{}", EVENT_SCOPE_PREFIX, name),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        if key == GLOBAL_SCOPE {
            return Some(QuotaScope::Global);
        }
        key.strip_prefix(EVENT_SCOPE_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| QuotaScope::EventType(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaRecord {
    pub scope: QuotaScope,
    pub period: QuotaPeriod,
    pub period_start: NaiveDateTime,
    pub used: u32,
}

/// Load all stored counters; unrecognised rows are skipped
pub async fn load_quota_usage(pool: &Pool<Sqlite>) -> Result<Vec<QuotaRecord>> {
    let rows: Vec<(String, String, NaiveDateTime, i64)> =
        sqlx::query_as("SELECT scope, period, period_start, used FROM quota_usage")
            .fetch_all(pool)
            .await?;

    let mut records = Vec::with_capacity(rows.len());
    for (scope, period, period_start, used) in rows {
        let (Some(scope_parsed), Some(period_parsed)) =
            (QuotaScope::from_key(&scope), QuotaPeriod::parse(&period))
        else {
            warn!("Skipping unrecognised quota row: scope={} period={}", scope, period);
            continue;
        };
        records.push(QuotaRecord {
            scope: scope_parsed,
            period: period_parsed,
            period_start,
            used: u32::try_from(used.max(0)).unwrap_or(u32::MAX),
        });
    }
    debug!("Loaded {} quota rows", records.len());
    Ok(records)
}

/// Replace the stored counters with `records`
pub async fn save_quota_usage(pool: &Pool<Sqlite>, records: &[QuotaRecord]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM quota_usage")
        .execute(&mut *tx)
        .await?;
    for record in records {
        sqlx::query(
            "INSERT INTO quota_usage (scope, period, period_start, used) VALUES (?, ?, ?, ?)",
        )
        .bind(record.scope.to_key())
        .bind(record.period.as_str())
        .bind(record.period_start)
        .bind(i64::from(record.used))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    debug!("Saved {} quota rows", records.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use chrono::NaiveDate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> Pool<Sqlite> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        init_schema(&db).await.expect("Failed to create schema");
        db
    }

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 4)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_scope_keys() {
        assert_eq!(QuotaScope::Global.to_key(), "global");
        let stop = QuotaScope::EventType("stop".into());
        assert_eq!(QuotaScope::from_key(&stop.to_key()), Some(stop));
        assert_eq!(QuotaScope::from_key("event:"), None);
        assert_eq!(QuotaScope::from_key("bogus"), None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let db = setup_test_db().await;
        let records = vec![
            QuotaRecord {
                scope: QuotaScope::EventType("stop".into()),
                period: QuotaPeriod::Hourly,
                period_start: start(),
                used: 7,
            },
            QuotaRecord {
                scope: QuotaScope::Global,
                period: QuotaPeriod::Daily,
                period_start: start(),
                used: 40,
            },
        ];
        save_quota_usage(&db, &records).await.unwrap();

        let mut loaded = load_quota_usage(&db).await.unwrap();
        loaded.sort_by_key(|r| r.used);
        assert_eq!(loaded, records);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_rows() {
        let db = setup_test_db().await;
        let record = QuotaRecord {
            scope: QuotaScope::Global,
            period: QuotaPeriod::Weekly,
            period_start: start(),
            used: 3,
        };
        save_quota_usage(&db, &[record.clone()]).await.unwrap();
        save_quota_usage(&db, &[]).await.unwrap();
        assert!(load_quota_usage(&db).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_rows_skipped() {
        let db = setup_test_db().await;
        sqlx::query("INSERT INTO quota_usage VALUES ('mystery', 'hourly', '2026-03-04 10:00:00', 1)")
            .execute(&db)
            .await
            .unwrap();
        assert!(load_quota_usage(&db).await.unwrap().is_empty());
    }
}
