use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::collections::BTreeSet;
use std::str::FromStr;
use time::OffsetDateTime;
use tracing::warn;

use crate::preference::{Preference, RingInterval, UserId};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// A stored preference, exactly as the user entered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PreferenceRecord {
    pub owner_id: String,
    pub enabled: bool,
    pub start_time: String, // HH:MM
    pub end_time: String,   // HH:MM
}

impl PreferenceRecord {
    /// `None` when the owner id or a time no longer parses.
    pub fn to_preference(&self) -> Option<Preference> {
        Some(Preference {
            owner: self.owner_id.parse().ok()?,
            enabled: self.enabled,
            window: RingInterval::from_hhmm(&self.start_time, &self.end_time)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusEventRecord {
    pub id: i64,
    pub observed_at: i64,
    pub last_actor: Option<String>,
    pub next_occurrence: Option<i64>,
    pub outcome: String,
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/tree-notifier/notifier.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        // Every connection to ":memory:" is its own database.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Preferences
    // ----------------------------

    pub async fn upsert_preference(&self, p: &PreferenceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO preferences (owner_id, enabled, start_time, end_time, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(owner_id) DO UPDATE SET
              enabled=excluded.enabled,
              start_time=excluded.start_time,
              end_time=excluded.end_time,
              updated_at=excluded.updated_at
            "#,
        )
        .bind(&p.owner_id)
        .bind(p.enabled)
        .bind(&p.start_time)
        .bind(&p.end_time)
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("upsert_preference failed")?;
        Ok(())
    }

    pub async fn get_preference(&self, owner_id: &str) -> Result<Option<PreferenceRecord>> {
        sqlx::query_as::<_, PreferenceRecord>(
            r#"
            SELECT owner_id, enabled, start_time, end_time
            FROM preferences
            WHERE owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .context("get_preference failed")
    }

    pub async fn load_preference_records(&self) -> Result<Vec<PreferenceRecord>> {
        sqlx::query_as::<_, PreferenceRecord>(
            r#"
            SELECT owner_id, enabled, start_time, end_time
            FROM preferences
            ORDER BY owner_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_preferences failed")
    }

    /// Snapshot of every preference; rows that no longer parse are skipped.
    pub async fn load_preferences(&self) -> Result<Vec<Preference>> {
        let records = self.load_preference_records().await?;
        Ok(records
            .iter()
            .filter_map(|r| {
                let pref = r.to_preference();
                if pref.is_none() {
                    warn!(owner = %r.owner_id, start = %r.start_time, end = %r.end_time, "skipping malformed preference");
                }
                pref
            })
            .collect())
    }

    // ----------------------------
    // Notification role members
    // ----------------------------

    pub async fn load_role_members(&self) -> Result<BTreeSet<UserId>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT user_id FROM role_members")
            .fetch_all(&self.pool)
            .await
            .context("load_role_members failed")?;

        Ok(rows
            .into_iter()
            .filter_map(|(id,)| id.parse().ok())
            .collect())
    }

    pub async fn add_role_member(&self, user: UserId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO role_members (user_id, added_at)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO NOTHING
            "#,
        )
        .bind(user.to_string())
        .bind(now_unix())
        .execute(&self.pool)
        .await
        .context("add_role_member failed")?;
        Ok(())
    }

    pub async fn remove_role_member(&self, user: UserId) -> Result<()> {
        sqlx::query("DELETE FROM role_members WHERE user_id = ?")
            .bind(user.to_string())
            .execute(&self.pool)
            .await
            .context("remove_role_member failed")?;
        Ok(())
    }

    // ----------------------------
    // Status update audit log
    // ----------------------------

    pub async fn insert_status_event(
        &self,
        observed_at: i64,
        last_actor: Option<UserId>,
        next_occurrence: Option<i64>,
        outcome: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO status_events (observed_at, last_actor, next_occurrence, outcome)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(observed_at)
        .bind(last_actor.map(|u| u.to_string()))
        .bind(next_occurrence)
        .bind(outcome)
        .execute(&self.pool)
        .await
        .context("insert_status_event failed")?;
        Ok(())
    }

    /// Newest first.
    pub async fn recent_status_events(&self, limit: i64) -> Result<Vec<StatusEventRecord>> {
        sqlx::query_as::<_, StatusEventRecord>(
            r#"
            SELECT id, observed_at, last_actor, next_occurrence, outcome
            FROM status_events
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_status_events failed")
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn record(owner: &str, enabled: bool, start: &str, end: &str) -> PreferenceRecord {
        PreferenceRecord {
            owner_id: owner.into(),
            enabled,
            start_time: start.into(),
            end_time: end.into(),
        }
    }

    #[tokio::test]
    async fn preference_upsert_inserts_then_updates() {
        let db = test_db().await;
        db.upsert_preference(&record("100", true, "09:00", "17:00")).await.unwrap();
        db.upsert_preference(&record("100", false, "22:00", "02:00")).await.unwrap();

        let stored = db.get_preference("100").await.unwrap().unwrap();
        assert_eq!(stored, record("100", false, "22:00", "02:00"));
        assert_eq!(db.load_preference_records().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_preference_is_none() {
        let db = test_db().await;
        assert!(db.get_preference("404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_preferences_skips_malformed_rows() {
        let db = test_db().await;
        db.upsert_preference(&record("1", true, "09:00", "17:00")).await.unwrap();
        db.upsert_preference(&record("2", true, "25:00", "17:00")).await.unwrap();
        db.upsert_preference(&record("not-a-snowflake", true, "09:00", "17:00")).await.unwrap();

        let prefs = db.load_preferences().await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].owner, UserId(1));
        assert_eq!(prefs[0].window.start(), 540);
    }

    #[tokio::test]
    async fn role_members_add_remove() {
        let db = test_db().await;
        db.add_role_member(UserId(1)).await.unwrap();
        db.add_role_member(UserId(2)).await.unwrap();
        db.add_role_member(UserId(2)).await.unwrap(); // idempotent
        db.remove_role_member(UserId(1)).await.unwrap();
        db.remove_role_member(UserId(42)).await.unwrap(); // absent is fine

        assert_eq!(db.load_role_members().await.unwrap(), BTreeSet::from([UserId(2)]));
    }

    #[tokio::test]
    async fn status_events_newest_first() {
        let db = test_db().await;
        db.insert_status_event(10, Some(UserId(5)), Some(100), "scheduled").await.unwrap();
        db.insert_status_event(20, None, None, "not-growing").await.unwrap();

        let events = db.recent_status_events(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome, "not-growing");
        assert_eq!(events[1].last_actor.as_deref(), Some("5"));
        assert_eq!(events[1].next_occurrence, Some(100));

        assert_eq!(db.recent_status_events(1).await.unwrap().len(), 1);
    }

    #[test]
    fn record_to_preference() {
        let pref = record("7", true, "22:00", "24:00").to_preference().unwrap();
        assert_eq!(pref.owner, UserId(7));
        assert_eq!(pref.window.end(), 1439);
        assert!(record("7", true, "7h", "08:00").to_preference().is_none());
    }
}
