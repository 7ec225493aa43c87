//! SQLite-backed send ledger and credential store.
//! Survives restarts. Sent markers are insert-if-absent; stats change only
//! through per-send increments, each in its own transaction.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::traits::{CredentialStore, Ledger};
use remindclaw_core::types::{CredentialBlob, DayStats, SentMarker};

/// Fixed key of the WhatsApp credential blob.
pub const CREDENTIALS_KEY: &str = "whatsapp-auth";

#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open or create the ledger database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| RemindClawError::Ledger(format!("DB open: {e}")))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RemindClawError::Ledger(format!("DB open: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            -- One row per reminder delivered for a schedule occurrence
            CREATE TABLE IF NOT EXISTS sent_messages (
                registration_code TEXT NOT NULL,
                monitoring_day TEXT NOT NULL,
                sent_at TEXT NOT NULL,
                UNIQUE (registration_code, monitoring_day)
            );

            -- Per-weekday counters
            CREATE TABLE IF NOT EXISTS stats (
                day TEXT PRIMARY KEY,
                total_sent INTEGER NOT NULL DEFAULT 0,
                agents TEXT NOT NULL DEFAULT '{}'   -- JSON: agent name -> count
            );

            -- Messaging session material
            CREATE TABLE IF NOT EXISTS auth_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| RemindClawError::Ledger(format!("Migration: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| RemindClawError::Ledger("connection lock poisoned".into()))?;
            f(&guard).map_err(|e| RemindClawError::Ledger(e.to_string()))
        })
        .await
        .map_err(|e| RemindClawError::Ledger(format!("blocking task failed: {e}")))?
    }
}

fn decode_stats(total_sent: i64, agents_json: &str) -> DayStats {
    DayStats {
        total_sent: u64::try_from(total_sent).unwrap_or(0),
        agents: serde_json::from_str(agents_json).unwrap_or_default(),
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn is_sent(&self, marker: &SentMarker) -> Result<bool> {
        let marker = marker.clone();
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "SELECT 1 FROM sent_messages WHERE registration_code = ?1 AND monitoring_day = ?2",
            )?
            .exists(params![marker.registration_code, marker.scheduled_day_label])
        })
        .await
    }

    async fn mark_sent(&self, marker: &SentMarker) -> Result<bool> {
        let marker = marker.clone();
        let sent_at = chrono::Utc::now().to_rfc3339();
        let inserted = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO sent_messages (registration_code, monitoring_day, sent_at)
                     VALUES (?1, ?2, ?3)",
                    params![marker.registration_code, marker.scheduled_day_label, sent_at],
                )
            })
            .await?;
        Ok(inserted == 1)
    }

    async fn load_day_stats(&self, day: &str) -> Result<DayStats> {
        let day = day.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT total_sent, agents FROM stats WHERE day = ?1",
                    params![day],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(row
                .map(|(total, agents)| decode_stats(total, &agents))
                .unwrap_or_default())
        })
        .await
    }

    async fn record_send(&self, day: &str, agent: &str) -> Result<DayStats> {
        let (day, agent) = (day.to_string(), agent.to_string());
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let row = tx
                .query_row(
                    "SELECT total_sent, agents FROM stats WHERE day = ?1",
                    params![day],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            let mut stats = row
                .map(|(total, agents)| decode_stats(total, &agents))
                .unwrap_or_default();
            stats.record(&agent);

            let total = i64::try_from(stats.total_sent).unwrap_or(i64::MAX);
            let agents = serde_json::to_string(&stats.agents).unwrap_or_else(|_| "{}".into());
            tx.execute(
                "INSERT INTO stats (day, total_sent, agents) VALUES (?1, ?2, ?3)
                 ON CONFLICT(day) DO UPDATE SET total_sent = excluded.total_sent, agents = excluded.agents",
                params![day, total, agents],
            )?;
            tx.commit()?;
            Ok(stats)
        })
        .await
    }

    async fn all_stats(&self) -> Result<BTreeMap<String, DayStats>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT day, total_sent, agents FROM stats ORDER BY day")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut all = BTreeMap::new();
            for row in rows {
                let (day, total, agents) = row?;
                all.insert(day, decode_stats(total, &agents));
            }
            Ok(all)
        })
        .await
    }

    async fn reset(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("DELETE FROM sent_messages; DELETE FROM stats;"))
            .await?;
        tracing::info!("🧹 Ledger reset: sent markers and stats cleared");
        Ok(())
    }
}

fn credentials_error(e: RemindClawError) -> RemindClawError {
    match e {
        RemindClawError::Ledger(msg) => RemindClawError::Credentials(msg),
        other => other,
    }
}

#[async_trait]
impl CredentialStore for SqliteLedger {
    async fn load(&self) -> Result<Option<CredentialBlob>> {
        let raw = self
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT value FROM auth_state WHERE key = ?1",
                    params![CREDENTIALS_KEY],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await
            .map_err(credentials_error)?;
        match raw {
            Some(raw) => Ok(Some(CredentialBlob(serde_json::from_str(&raw)?))),
            None => Ok(None),
        }
    }

    async fn save(&self, blob: &CredentialBlob) -> Result<()> {
        let value = serde_json::to_string(&blob.0)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO auth_state (key, value) VALUES (?1, ?2)",
                params![CREDENTIALS_KEY, value],
            )
        })
        .await
        .map_err(credentials_error)?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM auth_state WHERE key = ?1", params![CREDENTIALS_KEY])
        })
        .await
        .map_err(credentials_error)?;
        tracing::info!("🔑 Stored WhatsApp session removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(code: &str, label: &str) -> SentMarker {
        SentMarker {
            registration_code: code.into(),
            scheduled_day_label: label.into(),
        }
    }

    #[tokio::test]
    async fn test_mark_sent_is_insert_if_absent() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let m = marker("R-1", "Monday at 09:00");
        assert!(!ledger.is_sent(&m).await.unwrap());
        assert!(ledger.mark_sent(&m).await.unwrap());
        assert!(!ledger.mark_sent(&m).await.unwrap());
        assert!(ledger.is_sent(&m).await.unwrap());
        // Same person, different schedule occurrence.
        assert!(!ledger.is_sent(&marker("R-1", "Tuesday at 09:00")).await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_increment_and_reset() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert_eq!(ledger.load_day_stats("monday").await.unwrap(), DayStats::default());

        ledger.record_send("monday", "Lucas Garcia").await.unwrap();
        let latest = ledger.record_send("monday", "Ana Souza").await.unwrap();
        assert_eq!(latest.total_sent, 2);

        let loaded = ledger.load_day_stats("monday").await.unwrap();
        assert_eq!(loaded, latest);
        assert_eq!(loaded.agents["Ana Souza"], 1);
        assert_eq!(ledger.all_stats().await.unwrap().len(), 1);

        ledger.mark_sent(&marker("R-1", "x")).await.unwrap();
        ledger.reset().await.unwrap();
        assert!(ledger.all_stats().await.unwrap().is_empty());
        assert!(!ledger.is_sent(&marker("R-1", "x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_after_reset_starts_from_zero() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        for _ in 0..3 {
            ledger.record_send("friday", "Lucas Garcia").await.unwrap();
        }
        ledger.reset().await.unwrap();

        let latest = ledger.record_send("friday", "Ana Souza").await.unwrap();
        assert_eq!(latest.total_sent, 1);
        assert!(!latest.agents.contains_key("Lucas Garcia"));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.record_send("monday", "Lucas Garcia").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(ledger.load_day_stats("monday").await.unwrap().agents["Lucas Garcia"], 8);
    }

    #[tokio::test]
    async fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.db");
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.mark_sent(&marker("R-7", "Friday at 18:00")).await.unwrap();
            ledger
                .save(&CredentialBlob(serde_json::json!({ "noise": "k" })))
                .await
                .unwrap();
        }
        let reopened = SqliteLedger::open(&path).unwrap();
        assert!(reopened.is_sent(&marker("R-7", "Friday at 18:00")).await.unwrap());
        assert_eq!(
            CredentialStore::load(&reopened).await.unwrap(),
            Some(CredentialBlob(serde_json::json!({ "noise": "k" })))
        );
    }

    #[tokio::test]
    async fn test_credentials_replace_and_clear() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        assert!(CredentialStore::load(&ledger).await.unwrap().is_none());
        ledger.save(&CredentialBlob(serde_json::json!({ "v": 1 }))).await.unwrap();
        ledger.save(&CredentialBlob(serde_json::json!({ "v": 2 }))).await.unwrap();
        assert_eq!(
            CredentialStore::load(&ledger).await.unwrap(),
            Some(CredentialBlob(serde_json::json!({ "v": 2 })))
        );
        CredentialStore::clear(&ledger).await.unwrap();
        assert!(CredentialStore::load(&ledger).await.unwrap().is_none());
    }
}
