//! Storage adapter implementations
//!
//! Contains the SQLite store backing both analysis history and the daily
//! usage quota.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{Local, Utc};
use rusqlite::OptionalExtension;
use tally_core::config::UsageConfig;
use tally_core::ports::analysis::CapturedImage;
use tally_core::ports::history::{HistoryEntry, HistoryError, HistoryRecorder};
use tally_core::ports::usage::{Tier, UsageError, UsageGate};
use tokio_rusqlite::Connection;
use uuid::Uuid;

/// SQL statements for database initialization - analyses table
const CREATE_ANALYSES_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS analyses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    captured_at INTEGER NOT NULL,
    image_path TEXT NOT NULL,
    summary TEXT NOT NULL,
    raw_payload TEXT NOT NULL,
    created_at INTEGER NOT NULL
)
"#;

const CREATE_ANALYSES_CREATED_AT_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_analyses_created_at ON analyses(created_at)";

/// SQL statements for database initialization - usage table, one row per local day
const CREATE_USAGE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS usage (
    day TEXT PRIMARY KEY,
    count INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQLite store implementing HistoryRecorder and UsageGate
pub struct SqliteStore {
    conn: Connection,
    captures_dir: PathBuf,
    limits: UsageConfig,
}

impl SqliteStore {
    /// Opens (or creates) the database and initializes the schema
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `captures_dir` - Directory receiving a copy of each analyzed image
    /// * `limits` - Daily quota per tier
    ///
    /// # Errors
    /// Returns `HistoryError::ConnectionError` if the database cannot be opened
    pub async fn new(
        db_path: &Path,
        captures_dir: impl Into<PathBuf>,
        limits: UsageConfig,
    ) -> Result<Self, HistoryError> {
        let path_str = db_path.to_string_lossy().to_string();

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| HistoryError::ConnectionError(e.to_string()))?;

        Self::initialize_schema(&conn).await?;

        tracing::info!(path = %path_str, "SQLite database initialized");
        Ok(Self {
            conn,
            captures_dir: captures_dir.into(),
            limits,
        })
    }

    /// Creates an in-memory store for testing
    #[cfg(test)]
    pub async fn new_in_memory(
        captures_dir: impl Into<PathBuf>,
        limits: UsageConfig,
    ) -> Result<Self, HistoryError> {
        let conn = Connection::open(":memory:")
            .await
            .map_err(|e| HistoryError::ConnectionError(e.to_string()))?;

        Self::initialize_schema(&conn).await?;

        Ok(Self {
            conn,
            captures_dir: captures_dir.into(),
            limits,
        })
    }

    async fn initialize_schema(conn: &Connection) -> Result<(), HistoryError> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;

            conn.execute(CREATE_ANALYSES_TABLE_SQL, [])?;
            conn.execute(CREATE_ANALYSES_CREATED_AT_INDEX_SQL, [])?;
            conn.execute(CREATE_USAGE_TABLE_SQL, [])?;

            Ok(())
        })
        .await
        .map_err(|e| HistoryError::DatabaseError(e.to_string()))
    }

    fn daily_limit(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.limits.free_daily_limit,
            Tier::Premium => self.limits.premium_daily_limit,
        }
    }

    /// Successful analyses counted for today
    pub async fn used_today(&self) -> Result<u32, UsageError> {
        let day = today_key();
        self.conn
            .call(move |conn| {
                let count: Option<u32> = conn
                    .query_row("SELECT count FROM usage WHERE day = ?1", [day], |row| {
                        row.get(0)
                    })
                    .optional()?;
                Ok(count.unwrap_or(0))
            })
            .await
            .map_err(|e| UsageError::DatabaseError(e.to_string()))
    }

    /// Most recent history entries, newest first
    pub async fn recent_entries(&self, limit: usize) -> Result<Vec<HistoryEntry>, HistoryError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, captured_at, image_path, summary, raw_payload, created_at FROM analyses ORDER BY created_at DESC, id DESC LIMIT ?1",
                )?;

                let rows = stmt.query_map([limit as i64], |row| {
                    Ok(HistoryEntry {
                        id: Some(row.get(0)?),
                        captured_at: row.get(1)?,
                        image_path: row.get(2)?,
                        summary: row.get(3)?,
                        raw_payload: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?;

                let mut entries = Vec::new();
                for row in rows {
                    entries.push(row?);
                }
                Ok(entries)
            })
            .await
            .map_err(|e| HistoryError::DatabaseError(e.to_string()))
    }

    /// Writes the image next to the database; returns the stored path
    async fn store_image(&self, image: &CapturedImage) -> Result<PathBuf, HistoryError> {
        tokio::fs::create_dir_all(&self.captures_dir).await?;

        let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        let suffix = Uuid::new_v4().simple().to_string();
        let path = self.captures_dir.join(format!(
            "{}_{}.{}",
            stamp,
            &suffix[..8],
            image.extension()
        ));

        tokio::fs::write(&path, &image.data[..]).await?;
        Ok(path)
    }
}

/// Usage counters roll over at local midnight
fn today_key() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

#[async_trait]
impl HistoryRecorder for SqliteStore {
    async fn record(
        &self,
        image: &CapturedImage,
        summary: &str,
        raw_payload: &str,
    ) -> Result<(), HistoryError> {
        let image_path = self.store_image(image).await?;
        let image_path = image_path.to_string_lossy().to_string();
        let captured_at = image.timestamp;
        let created_at = Utc::now().timestamp();
        let summary = summary.to_string();
        let raw_payload = raw_payload.to_string();

        tracing::debug!(path = %image_path, "Saving history entry");

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO analyses (captured_at, image_path, summary, raw_payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![captured_at, image_path, summary, raw_payload, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| HistoryError::DatabaseError(e.to_string()))
    }
}

#[async_trait]
impl UsageGate for SqliteStore {
    async fn remaining(&self, tier: Tier) -> Result<u32, UsageError> {
        let used = self.used_today().await?;
        Ok(self.daily_limit(tier).saturating_sub(used))
    }

    async fn record_success(&self) -> Result<(), UsageError> {
        let day = today_key();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO usage (day, count) VALUES (?1, 1) ON CONFLICT(day) DO UPDATE SET count = count + 1",
                    [day],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| UsageError::DatabaseError(e.to_string()))
    }
}
