//! Local download history (SQLite via sqlx).
//!
//! One table keyed by job id. Every write that touches a row bumps a
//! change counter on a `watch` channel so live queries re-read without
//! polling the database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tokio::sync::watch;

use crate::api::{Platform, Quality};
use crate::downloader::{DownloadStatus, JobRecord};
use crate::errors::{AppError, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT job_id, title, artist, album, cover_image_url, quality, platform,
           status, progress, current_line, error, result_file, download_url, timestamp
    FROM downloads
"#;

/// Handle to the job history. Cheap to clone; clones share the pool and
/// the change feed.
#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
    changes: Arc<watch::Sender<u64>>,
}

impl JobStore {
    /// Default location: `<data dir>/spowlo/spowlo.db`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spowlo")
            .join("spowlo.db")
    }

    /// Open (or create) the database at `path`, creating parent dirs.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        debug!("Opened job store at {:?}", path);
        Self::with_pool(pool).await
    }

    /// Open a private in-memory database (no disk I/O).
    pub async fn open_in_memory() -> Result<Self> {
        // A single connection that never recycles, otherwise the
        // in-memory database would vanish with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: Pool<Sqlite>) -> Result<Self> {
        let (tx, _rx) = watch::channel(0u64);
        let store = Self {
            pool,
            changes: Arc::new(tx),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                job_id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                artist TEXT NOT NULL,
                album TEXT,
                cover_image_url TEXT,
                quality TEXT NOT NULL,
                platform TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                current_line TEXT NOT NULL DEFAULT '',
                error TEXT,
                result_file TEXT,
                download_url TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_downloads_timestamp ON downloads (timestamp DESC)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Wake live queries without writing. Another process may have changed
    /// the file; they re-read from the database.
    pub fn touch(&self) {
        self.notify();
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn notify_if(&self, rows: u64) -> bool {
        if rows > 0 {
            self.notify();
        }
        rows > 0
    }

    /// Insert or fully replace a record by job id.
    pub async fn put(&self, record: &JobRecord) -> Result<()> {
        let record = normalized(record);
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO downloads (
                job_id, title, artist, album, cover_image_url, quality, platform,
                status, progress, current_line, error, result_file, download_url, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.title)
        .bind(&record.artist)
        .bind(&record.album)
        .bind(&record.cover_image_url)
        .bind(record.quality.as_str())
        .bind(record.platform.as_str())
        .bind(record.status.as_str())
        .bind(f64::from(record.progress))
        .bind(&record.current_line)
        .bind(&record.error)
        .bind(&record.result_file)
        .bind(&record.download_url)
        .bind(record.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.notify();
        Ok(())
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query(&format!("{} WHERE job_id = ?1", SELECT_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// All records, newest first.
    pub async fn list_all(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(&format!("{} ORDER BY timestamp DESC, rowid DESC", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Records in `status`, newest first.
    pub async fn list_by_status(&self, status: DownloadStatus) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status = ?1 ORDER BY timestamp DESC, rowid DESC",
            SELECT_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Pending and processing records, newest first.
    pub async fn list_active(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "{} WHERE status IN ('pending', 'processing') ORDER BY timestamp DESC, rowid DESC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Progress update for a job still in flight.
    ///
    /// Returns `false` when the job is absent or already terminal; such a
    /// record is left as is. `Completed` and `Failed` must go through
    /// [`update_completed`](Self::update_completed) /
    /// [`update_failed`](Self::update_failed).
    pub async fn update_progress(
        &self,
        job_id: &str,
        status: DownloadStatus,
        progress: f32,
        current_line: &str,
    ) -> Result<bool> {
        if matches!(status, DownloadStatus::Completed | DownloadStatus::Failed) {
            return Err(AppError::Validation(format!(
                "update_progress cannot set status '{}'",
                status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?1,
                progress = ?2,
                current_line = ?3
            WHERE job_id = ?4
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(status.as_str())
        .bind(f64::from(clamp_progress(progress)))
        .bind(current_line)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(self.notify_if(result.rows_affected()))
    }

    /// Mark an in-flight job completed. No-op when absent or terminal.
    pub async fn update_completed(
        &self,
        job_id: &str,
        progress: f32,
        current_line: &str,
        result_file: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'completed',
                progress = ?1,
                current_line = ?2,
                result_file = ?3,
                error = NULL
            WHERE job_id = ?4
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(f64::from(clamp_progress(progress)))
        .bind(current_line)
        .bind(result_file)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(self.notify_if(result.rows_affected()))
    }

    /// Mark an in-flight job failed. No-op when absent or terminal.
    pub async fn update_failed(&self, job_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'failed',
                error = ?1,
                result_file = NULL
            WHERE job_id = ?2
              AND status IN ('pending', 'processing')
            "#,
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(self.notify_if(result.rows_affected()))
    }

    /// Local cancel, whatever the current state.
    pub async fn mark_cancelled(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'cancelled',
                progress = 0,
                current_line = 'Download cancelled',
                error = NULL,
                result_file = NULL
            WHERE job_id = ?1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(self.notify_if(result.rows_affected()))
    }

    /// Failed → pending with progress reset. Any other state is untouched.
    pub async fn reset_for_retry(&self, job_id: &str, current_line: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = 'pending',
                progress = 0,
                current_line = ?1,
                error = NULL
            WHERE job_id = ?2
              AND status = 'failed'
            "#,
        )
        .bind(current_line)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(self.notify_if(result.rows_affected()))
    }

    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE job_id = ?1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(self.notify_if(result.rows_affected()))
    }

    /// Remove every record. Returns how many were deleted.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM downloads")
            .execute(&self.pool)
            .await?;
        let rows = result.rows_affected();
        self.notify_if(rows);
        Ok(rows)
    }

    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM downloads")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub fn subscribe_all(&self) -> LiveQuery {
        LiveQuery::new(self.clone(), QueryFilter::All)
    }

    pub fn subscribe_status(&self, status: DownloadStatus) -> LiveQuery {
        LiveQuery::new(self.clone(), QueryFilter::Status(status))
    }

    pub fn subscribe_active(&self) -> LiveQuery {
        LiveQuery::new(self.clone(), QueryFilter::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFilter {
    All,
    Status(DownloadStatus),
    Active,
}

/// Live view over the store: yields the current snapshot first, then a
/// fresh snapshot after every change.
pub struct LiveQuery {
    store: JobStore,
    filter: QueryFilter,
    rx: watch::Receiver<u64>,
    primed: bool,
}

impl LiveQuery {
    fn new(store: JobStore, filter: QueryFilter) -> Self {
        let rx = store.changes.subscribe();
        Self {
            store,
            filter,
            rx,
            primed: false,
        }
    }

    pub fn filter(&self) -> QueryFilter {
        self.filter
    }

    /// Wait for the next snapshot. Changes that land while a snapshot is
    /// being read coalesce into one wake-up.
    pub async fn next(&mut self) -> Result<Vec<JobRecord>> {
        if self.primed {
            // The store handle we hold keeps the sender alive, so this
            // only returns once a write happened.
            let _ = self.rx.changed().await;
        }
        self.primed = true;
        self.rx.borrow_and_update();

        match self.filter {
            QueryFilter::All => self.store.list_all().await,
            QueryFilter::Status(status) => self.store.list_by_status(status).await,
            QueryFilter::Active => self.store.list_active().await,
        }
    }
}

fn clamp_progress(progress: f32) -> f32 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Enforces the per-status field rules before a full write.
fn normalized(record: &JobRecord) -> JobRecord {
    let mut record = record.clone();
    record.progress = clamp_progress(record.progress);
    if record.status != DownloadStatus::Completed {
        record.result_file = None;
    } else if record.result_file.is_none() {
        record.result_file = Some(String::new());
    }
    if record.status != DownloadStatus::Failed {
        record.error = None;
    } else if record.error.is_none() {
        record.error = Some("Unknown error".to_string());
    }
    record
}

fn record_from_row(row: &SqliteRow) -> Result<JobRecord> {
    let quality: String = row.try_get("quality")?;
    let platform: String = row.try_get("platform")?;
    let status: String = row.try_get("status")?;
    let progress: f64 = row.try_get("progress")?;
    let timestamp: i64 = row.try_get("timestamp")?;

    Ok(JobRecord {
        job_id: row.try_get("job_id")?,
        title: row.try_get("title")?,
        artist: row.try_get("artist")?,
        album: row.try_get("album")?,
        cover_image_url: row.try_get("cover_image_url")?,
        quality: Quality::from_str_lossy(&quality),
        platform: Platform::from_str_lossy(&platform),
        status: DownloadStatus::from_str_lossy(&status),
        progress: progress as f32,
        current_line: row.try_get("current_line")?,
        error: row.try_get("error")?,
        result_file: row.try_get("result_file")?,
        download_url: row.try_get("download_url")?,
        timestamp: DateTime::<Utc>::from_timestamp_millis(timestamp).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(job_id: &str, age_secs: i64) -> JobRecord {
        let mut record = JobRecord::new_pending(
            job_id,
            format!("https://youtube.com/watch?v={}", job_id),
            Quality::M4a320,
            Platform::Youtube,
            None,
        );
        record.timestamp = Utc::now() - Duration::seconds(age_secs);
        record
    }

    #[tokio::test]
    async fn unknown_stored_status_reads_as_pending() {
        let store = JobStore::open_in_memory().await.unwrap();
        sqlx::query(
            r#"
            INSERT INTO downloads (
                job_id, title, artist, quality, platform, status, progress,
                current_line, download_url, timestamp
            ) VALUES ('legacy', 'Old', 'Someone', 'flac', 'napster', 'archived', 0.4,
                      'Queued', 'https://example.com/x', 0)
            "#,
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let record = store.get("legacy").await.unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Pending);
        assert_eq!(record.quality, Quality::M4a320);
        assert_eq!(record.platform, Platform::Youtube);
        assert_eq!(record.current_line, "Queued");
    }

    #[tokio::test]
    async fn put_get_and_replace() {
        let store = JobStore::open_in_memory().await.unwrap();
        let mut rec = record("a", 0);
        store.put(&rec).await.unwrap();

        let loaded = store.get("a").await.unwrap().unwrap();
        assert_eq!(loaded.job_id, "a");
        assert_eq!(loaded.status, DownloadStatus::Pending);
        assert_eq!(loaded.timestamp.timestamp_millis(), rec.timestamp.timestamp_millis());

        rec.title = "Renamed".to_string();
        store.put(&rec).await.unwrap();
        store.put(&rec).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get("a").await.unwrap().unwrap().title, "Renamed");

        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lists_are_newest_first() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("old", 300)).await.unwrap();
        store.put(&record("new", 0)).await.unwrap();
        store.put(&record("mid", 100)).await.unwrap();

        let ids: Vec<String> = store.list_all().await.unwrap().into_iter().map(|r| r.job_id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        store.update_failed("mid", "boom").await.unwrap();
        let failed = store.list_by_status(DownloadStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].job_id, "mid");

        let active: Vec<String> = store.list_active().await.unwrap().into_iter().map(|r| r.job_id).collect();
        assert_eq!(active, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn partial_updates_on_missing_job_are_noops() {
        let store = JobStore::open_in_memory().await.unwrap();
        assert!(!store
            .update_progress("ghost", DownloadStatus::Processing, 0.5, "x")
            .await
            .unwrap());
        assert!(!store.update_completed("ghost", 1.0, "done", "f.m4a").await.unwrap());
        assert!(!store.update_failed("ghost", "err").await.unwrap());
        assert!(!store.mark_cancelled("ghost").await.unwrap());
        assert!(!store.delete("ghost").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn terminal_state_is_sticky_for_progress_updates() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("a", 0)).await.unwrap();
        assert!(store.update_completed("a", 1.0, "Download completed", "x.m4a").await.unwrap());

        let changed = store
            .update_progress("a", DownloadStatus::Processing, 0.2, "late write")
            .await
            .unwrap();
        assert!(!changed);
        let rec = store.get("a").await.unwrap().unwrap();
        assert_eq!(rec.status, DownloadStatus::Completed);
        assert_eq!(rec.current_line, "Download completed");
        assert_eq!(rec.result_file.as_deref(), Some("x.m4a"));
        assert!(rec.error.is_none());

        assert!(!store.update_failed("a", "late failure").await.unwrap());
        assert_eq!(store.get("a").await.unwrap().unwrap().status, DownloadStatus::Completed);
    }

    #[tokio::test]
    async fn update_progress_rejects_terminal_result_states() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("a", 0)).await.unwrap();
        let err = store
            .update_progress("a", DownloadStatus::Completed, 1.0, "done")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn progress_is_clamped() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("a", 0)).await.unwrap();
        store
            .update_progress("a", DownloadStatus::Processing, 7.5, "too far")
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().progress, 1.0);
    }

    #[tokio::test]
    async fn error_and_result_file_follow_status() {
        let store = JobStore::open_in_memory().await.unwrap();
        let mut rec = record("a", 0);
        rec.error = Some("stale".to_string());
        rec.result_file = Some("stale.m4a".to_string());
        store.put(&rec).await.unwrap();
        let loaded = store.get("a").await.unwrap().unwrap();
        assert!(loaded.error.is_none());
        assert!(loaded.result_file.is_none());

        store.update_failed("a", "backend exploded").await.unwrap();
        let loaded = store.get("a").await.unwrap().unwrap();
        assert_eq!(loaded.error.as_deref(), Some("backend exploded"));
        assert!(loaded.result_file.is_none());

        assert!(store.reset_for_retry("a", "Retrying download...").await.unwrap());
        let loaded = store.get("a").await.unwrap().unwrap();
        assert_eq!(loaded.status, DownloadStatus::Pending);
        assert_eq!(loaded.progress, 0.0);
        assert!(loaded.error.is_none());
    }

    #[tokio::test]
    async fn retry_reset_only_applies_to_failed() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("a", 0)).await.unwrap();
        store
            .update_progress("a", DownloadStatus::Processing, 0.4, "working")
            .await
            .unwrap();
        assert!(!store.reset_for_retry("a", "Retrying download...").await.unwrap());
        let rec = store.get("a").await.unwrap().unwrap();
        assert_eq!(rec.status, DownloadStatus::Processing);
        assert_eq!(rec.progress, 0.4);
    }

    #[tokio::test]
    async fn cancel_is_unconditional() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("a", 0)).await.unwrap();
        store.update_completed("a", 1.0, "done", "x.m4a").await.unwrap();
        assert!(store.mark_cancelled("a").await.unwrap());
        let rec = store.get("a").await.unwrap().unwrap();
        assert_eq!(rec.status, DownloadStatus::Cancelled);
        assert!(rec.result_file.is_none());
        assert_eq!(rec.current_line, "Download cancelled");
    }

    #[tokio::test]
    async fn clear_empties_store() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("a", 0)).await.unwrap();
        store.put(&record("b", 1)).await.unwrap();
        assert_eq!(store.clear().await.unwrap(), 2);
        assert!(store.list_all().await.unwrap().is_empty());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn live_query_sees_writes() {
        let store = JobStore::open_in_memory().await.unwrap();
        let mut live = store.subscribe_all();
        assert!(live.next().await.unwrap().is_empty());

        store.put(&record("a", 0)).await.unwrap();
        let snapshot = live.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        store
            .update_progress("a", DownloadStatus::Processing, 0.5, "halfway")
            .await
            .unwrap();
        let snapshot = live.next().await.unwrap();
        assert_eq!(snapshot[0].status, DownloadStatus::Processing);

        store.delete("a").await.unwrap();
        assert!(live.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn live_active_query_drops_terminal_jobs() {
        let store = JobStore::open_in_memory().await.unwrap();
        store.put(&record("a", 0)).await.unwrap();
        let mut live = store.subscribe_active();
        assert_eq!(live.next().await.unwrap().len(), 1);

        store.update_failed("a", "nope").await.unwrap();
        assert!(live.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spowlo.db");
        {
            let store = JobStore::open(&path).await.unwrap();
            store.put(&record("persisted", 0)).await.unwrap();
        }
        let store = JobStore::open(&path).await.unwrap();
        assert!(store.get("persisted").await.unwrap().is_some());
    }
}
