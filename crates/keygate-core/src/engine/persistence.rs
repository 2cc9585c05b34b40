//! SQLite-based persistence layer for resources and counters
//!
//! Stores resources, consumed clients and settings in a relational database
//! so counter updates are atomic and transactional.

use crate::engine::counter_store::{ConsumeOutcome, CounterStore};
use crate::error::KeygateError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keygate_types::{ConsumedClient, DownloadResource, Settings};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SETTINGS_KEY: &str = "settings";

/// Database connection pool for resource persistence
#[derive(Clone, Debug)]
pub struct KeygateDatabase {
    pool: SqlitePool,
}

impl KeygateDatabase {
    /// Open (or create) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, KeygateError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // WAL + busy timeout so concurrent writers queue up instead of failing
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                secret_key TEXT NOT NULL,
                download_limit INTEGER NOT NULL CHECK (download_limit >= 1),
                download_count INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1,
                file_path TEXT,
                file_name TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS consumed_clients (
                resource_id INTEGER NOT NULL,
                client_id TEXT NOT NULL,
                consumed_at TEXT NOT NULL,
                PRIMARY KEY (resource_id, client_id),
                FOREIGN KEY (resource_id) REFERENCES resources(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_resources_key ON resources(secret_key);
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Insert a resource and return its assigned id (the `id` field is ignored)
    pub async fn insert_resource(&self, resource: &DownloadResource) -> Result<i64, KeygateError> {
        let result = sqlx::query(
            r#"
            INSERT INTO resources (
                title, secret_key, download_limit, download_count, active,
                file_path, file_name, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&resource.title)
        .bind(&resource.secret_key)
        .bind(resource.download_limit as i64)
        .bind(resource.download_count as i64)
        .bind(resource.active)
        .bind(path_to_text(resource.file_path.as_deref()))
        .bind(resource.file_name.as_ref())
        .bind(resource.created_at.to_rfc3339())
        .bind(resource.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Update the configuration fields of a resource
    ///
    /// The download count is owned by the counter store and left untouched.
    pub async fn update_resource(&self, resource: &DownloadResource) -> Result<(), KeygateError> {
        let result = sqlx::query(
            r#"
            UPDATE resources
            SET title = ?, secret_key = ?, download_limit = ?, active = ?,
                file_path = ?, file_name = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&resource.title)
        .bind(&resource.secret_key)
        .bind(resource.download_limit as i64)
        .bind(resource.active)
        .bind(path_to_text(resource.file_path.as_deref()))
        .bind(resource.file_name.as_ref())
        .bind(resource.updated_at.to_rfc3339())
        .bind(resource.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KeygateError::ResourceNotFound(resource.id));
        }
        Ok(())
    }

    /// Load a resource by ID
    pub async fn load_resource(&self, id: i64) -> Result<Option<DownloadResource>, KeygateError> {
        let row = sqlx::query("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_resource).transpose()
    }

    /// Load all resources, lowest id first
    pub async fn load_all_resources(&self) -> Result<Vec<DownloadResource>, KeygateError> {
        sqlx::query("SELECT * FROM resources ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(row_to_resource)
            .collect()
    }

    /// Active resources carrying `key`, lowest id first
    pub async fn find_active_by_key(&self, key: &str) -> Result<Vec<DownloadResource>, KeygateError> {
        sqlx::query("SELECT * FROM resources WHERE secret_key = ? AND active = 1 ORDER BY id")
            .bind(key)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(row_to_resource)
            .collect()
    }

    /// Delete a resource and its consumed clients
    pub async fn delete_resource(&self, id: i64) -> Result<bool, KeygateError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Consumed clients
    // ========================================================================

    /// Consumed clients in the order they downloaded
    pub async fn list_consumed_clients(&self, resource_id: i64) -> Result<Vec<ConsumedClient>, KeygateError> {
        let rows = sqlx::query(
            "SELECT client_id, consumed_at FROM consumed_clients WHERE resource_id = ? ORDER BY consumed_at, client_id",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ConsumedClient {
                    client_id: row.get("client_id"),
                    consumed_at: parse_timestamp(row.get::<String, _>("consumed_at").as_str())?,
                })
            })
            .collect()
    }

    pub async fn count_consumed_clients(&self, resource_id: i64) -> Result<usize, KeygateError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM consumed_clients WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_one(&self.pool)
            .await?
            .get("n");

        Ok(count as usize)
    }

    // ========================================================================
    // Settings
    // ========================================================================

    /// Load stored settings, or the defaults if none were saved yet
    pub async fn load_settings(&self) -> Result<Settings, KeygateError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(serde_json::from_str(row.get::<String, _>("value").as_str())?),
            None => Ok(Settings::default()),
        }
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<(), KeygateError> {
        let value = serde_json::to_string(settings)?;

        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(SETTINGS_KEY)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CounterStore for KeygateDatabase {
    async fn get_count(&self, resource_id: i64) -> Result<u32, KeygateError> {
        let row = sqlx::query("SELECT download_count FROM resources WHERE id = ?")
            .bind(resource_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(KeygateError::ResourceNotFound(resource_id))?;

        Ok(row.get::<i64, _>("download_count") as u32)
    }

    async fn increment_count(&self, resource_id: i64) -> Result<u32, KeygateError> {
        let row = sqlx::query(
            "UPDATE resources SET download_count = download_count + 1 WHERE id = ? RETURNING download_count",
        )
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(KeygateError::ResourceNotFound(resource_id))?;

        Ok(row.get::<i64, _>("download_count") as u32)
    }

    async fn get_consumed_clients(&self, resource_id: i64) -> Result<HashSet<String>, KeygateError> {
        let rows = sqlx::query("SELECT client_id FROM consumed_clients WHERE resource_id = ?")
            .bind(resource_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("client_id")).collect())
    }

    async fn add_consumed_client(&self, resource_id: i64, client_id: &str) -> Result<(), KeygateError> {
        sqlx::query(
            "INSERT OR IGNORE INTO consumed_clients (resource_id, client_id, consumed_at) VALUES (?, ?, ?)",
        )
        .bind(resource_id)
        .bind(client_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_count(&self, resource_id: i64) -> Result<(), KeygateError> {
        let result = sqlx::query("UPDATE resources SET download_count = 0 WHERE id = ?")
            .bind(resource_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KeygateError::ResourceNotFound(resource_id));
        }
        Ok(())
    }

    async fn clear_consumed_clients(&self, resource_id: i64) -> Result<(), KeygateError> {
        sqlx::query("DELETE FROM consumed_clients WHERE resource_id = ?")
            .bind(resource_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn is_consumed(&self, resource_id: i64, client_id: &str) -> Result<bool, KeygateError> {
        let row = sqlx::query("SELECT 1 FROM consumed_clients WHERE resource_id = ? AND client_id = ?")
            .bind(resource_id)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    async fn try_consume(
        &self,
        resource_id: i64,
        client_id: Option<&str>,
    ) -> Result<ConsumeOutcome, KeygateError> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-increment: never moves past the limit, whoever else is writing
        let updated = sqlx::query(
            r#"
            UPDATE resources
            SET download_count = download_count + 1
            WHERE id = ? AND download_count < download_limit
            "#,
        )
        .bind(resource_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM resources WHERE id = ?")
                .bind(resource_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            tx.rollback().await?;

            if !exists {
                return Err(KeygateError::ResourceNotFound(resource_id));
            }
            return Ok(ConsumeOutcome::LimitReached);
        }

        if let Some(client_id) = client_id {
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO consumed_clients (resource_id, client_id, consumed_at) VALUES (?, ?, ?)",
            )
            .bind(resource_id)
            .bind(client_id)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(ConsumeOutcome::AlreadyConsumed);
            }
        }

        let count: i64 = sqlx::query("SELECT download_count FROM resources WHERE id = ?")
            .bind(resource_id)
            .fetch_one(&mut *tx)
            .await?
            .get("download_count");

        tx.commit().await?;
        Ok(ConsumeOutcome::Recorded(count as u32))
    }
}

fn path_to_text(path: Option<&Path>) -> Option<String> {
    path.map(|p| p.to_string_lossy().to_string())
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, KeygateError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KeygateError::Serialization(e.to_string()))
}

/// Convert a database row to a DownloadResource
fn row_to_resource(row: SqliteRow) -> Result<DownloadResource, KeygateError> {
    Ok(DownloadResource {
        id: row.get("id"),
        title: row.get("title"),
        secret_key: row.get("secret_key"),
        download_limit: row.get::<i64, _>("download_limit") as u32,
        download_count: row.get::<i64, _>("download_count") as u32,
        active: row.get::<i64, _>("active") != 0,
        file_path: row.get::<Option<String>, _>("file_path").map(PathBuf::from),
        file_name: row.get("file_name"),
        created_at: parse_timestamp(row.get::<String, _>("created_at").as_str())?,
        updated_at: parse_timestamp(row.get::<String, _>("updated_at").as_str())?,
    })
}
