use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions, sqlite::SqliteRow};
use thiserror::Error;
use todosync_core::{Item, ItemStatus, UnknownStatus};

use super::events::ObservedMutation;
use super::guard::{Echo, SuppressionGuard};
use super::local_store::millis;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const LAST_SYNC_TIME: &str = "last_sync_time";
const JOURNAL_REVISION: &str = "journal_revision";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error(transparent)]
    InvalidStatus(#[from] UnknownStatus),
}

/// Latest pending mutation for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub item: Item,
    pub revision: i64,
}

/// Durable record of local mutations not yet confirmed by a pass.
#[derive(Clone)]
pub struct ChangeJournal {
    pool: SqlitePool,
}

impl ChangeJournal {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open_at(path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    pub async fn new_default() -> Result<Self, JournalError> {
        Self::open_at(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), JournalError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Upserts by key; the stored revision is newer than any revision handed out before.
    pub async fn record(&self, item: &Item) -> Result<i64, JournalError> {
        let mut tx = self.pool.begin().await?;
        let revision: i64 = sqlx::query_scalar(
            "INSERT INTO sync_state (key, value) VALUES (?1, 1)
             ON CONFLICT(key) DO UPDATE SET value = value + 1
             RETURNING value",
        )
        .bind(JOURNAL_REVISION)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO journal (key, status, created_at, modified_at, size, revision)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                 status = excluded.status,
                 created_at = excluded.created_at,
                 modified_at = excluded.modified_at,
                 size = excluded.size,
                 revision = excluded.revision",
        )
        .bind(&item.key)
        .bind(item.status.as_str())
        .bind(item.created_at)
        .bind(item.modified_at)
        .bind(item.size as i64)
        .bind(revision)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(revision)
    }

    pub async fn get(&self, key: &str) -> Result<Option<JournalRecord>, JournalError> {
        let row = sqlx::query(
            "SELECT key, status, created_at, modified_at, size, revision FROM journal WHERE key = ?1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn list(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let rows = sqlx::query(
            "SELECT key, status, created_at, modified_at, size, revision
             FROM journal
             ORDER BY key ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn clear<I, S>(&self, keys: I) -> Result<u64, JournalError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for key in keys {
            removed += sqlx::query("DELETE FROM journal WHERE key = ?1")
                .bind(key.as_ref())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    /// Deletes each key only while its record is no newer than the given revision.
    pub async fn clear_settled<'a, I>(&self, marks: I) -> Result<u64, JournalError>
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for (key, revision) in marks {
            removed += sqlx::query("DELETE FROM journal WHERE key = ?1 AND revision <= ?2")
                .bind(key)
                .bind(revision)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    pub async fn last_sync_time(&self) -> Result<Option<i64>, JournalError> {
        let value = sqlx::query_scalar("SELECT value FROM sync_state WHERE key = ?1")
            .bind(LAST_SYNC_TIME)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_last_sync_time(&self, at: i64) -> Result<(), JournalError> {
        sqlx::query(
            "INSERT INTO sync_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(LAST_SYNC_TIME)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Journals a watcher mutation unless the guard attributes it to an engine write.
    pub async fn capture(
        &self,
        observed: &ObservedMutation,
        guard: &SuppressionGuard,
    ) -> Result<usize, JournalError> {
        let now = millis(SystemTime::now());
        let mut written = 0;
        for item in observed.event.to_items(now) {
            if !guard.should_capture(&item.key, Echo::of(&item), observed.observed_at) {
                tracing::trace!(key = %item.key, "suppressed engine echo");
                continue;
            }
            self.record(&item).await?;
            tracing::debug!(key = %item.key, status = item.status.as_str(), "journaled local mutation");
            written += 1;
        }
        Ok(written)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<JournalRecord, JournalError> {
    let status: String = row.try_get("status")?;
    let size: i64 = row.try_get("size")?;
    Ok(JournalRecord {
        item: Item {
            key: row.try_get("key")?,
            status: ItemStatus::parse(&status)?,
            created_at: row.try_get("created_at")?,
            modified_at: row.try_get("modified_at")?,
            size: size.max(0) as u64,
        },
        revision: row.try_get("revision")?,
    })
}

fn default_db_path() -> Result<PathBuf, JournalError> {
    let mut path = dirs::data_dir().ok_or(JournalError::MissingDataDir)?;
    path.push("todosync");
    path.push("journal.db");
    Ok(path)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
