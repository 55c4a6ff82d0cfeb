//! libSQL backend — async `Store` implementation over a local database file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    EmailRow, FailureRow, PendingVectorization, ReportRow, Store, UnprocessedEmail,
};

/// Fixed key for the single-run advisory lock.
const RUN_LOCK_KEY: &str = "dispatch";

/// libSQL store backend.
///
/// Holds one connection reused for all operations; `libsql::Connection` is
/// `Send + Sync` and safe for concurrent async use. Each record/query runs in
/// its own short transaction scope.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp encoding: RFC 3339 UTC at second precision, so string
/// comparison in SQL orders chronologically.
fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 or SQLite datetime string into `DateTime<Utc>`.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::UNIX_EPOCH
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn map_sql(e: libsql::Error) -> DatabaseError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DatabaseError::Constraint(msg)
    } else {
        DatabaseError::Query(msg)
    }
}

fn is_unique_violation(e: &DatabaseError) -> bool {
    matches!(e, DatabaseError::Constraint(_))
}

#[async_trait]
impl Store for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    async fn insert_email(
        &self,
        entry_id: &str,
        bank_tag: &str,
        subject: Option<&str>,
        html_path: Option<&Path>,
        received_ts: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO emails (entry_id, received_ts, bank_tag, subject, html_path)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry_id,
                    ts_to_sql(received_ts),
                    bank_tag,
                    opt_text(subject),
                    opt_text(html_path.map(|p| p.to_string_lossy()).as_deref()),
                ],
            )
            .await
            .map_err(map_sql)?;
        Ok(())
    }

    async fn get_email(&self, entry_id: &str) -> Result<Option<EmailRow>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT entry_id, bank_tag, subject, html_path, received_ts, report_path
                   FROM emails WHERE entry_id = ?1",
                params![entry_id],
            )
            .await
            .map_err(map_sql)?;

        match rows.next().await.map_err(map_sql)? {
            Some(row) => Ok(Some(EmailRow {
                entry_id: row.get::<String>(0).map_err(map_sql)?,
                bank_tag: row.get::<String>(1).map_err(map_sql)?,
                subject: row.get::<Option<String>>(2).map_err(map_sql)?,
                html_path: row
                    .get::<Option<String>>(3)
                    .map_err(map_sql)?
                    .map(PathBuf::from),
                received_ts: parse_datetime(&row.get::<String>(4).map_err(map_sql)?),
                report_path: row
                    .get::<Option<String>>(5)
                    .map_err(map_sql)?
                    .map(PathBuf::from),
            })),
            None => Ok(None),
        }
    }

    async fn get_cutoff(&self, bank_tag: &str) -> Result<DateTime<Utc>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(e.received_ts)
                   FROM reports r
                   JOIN emails e ON r.entry_id = e.entry_id
                  WHERE r.bank_tag = ?1",
                params![bank_tag],
            )
            .await
            .map_err(map_sql)?;

        let cutoff = match rows.next().await.map_err(map_sql)? {
            Some(row) => row
                .get::<Option<String>>(0)
                .map_err(map_sql)?
                .map(|s| parse_datetime(&s)),
            None => None,
        };
        Ok(cutoff.unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    async fn fetch_unprocessed(
        &self,
        bank_tag: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UnprocessedEmail>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT entry_id, html_path, received_ts
                   FROM emails
                  WHERE bank_tag = ?1
                    AND html_path IS NOT NULL
                    AND received_ts > ?2
                  ORDER BY received_ts ASC",
                params![bank_tag, ts_to_sql(cutoff)],
            )
            .await
            .map_err(map_sql)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql)? {
            out.push(UnprocessedEmail {
                entry_id: row.get::<String>(0).map_err(map_sql)?,
                html_path: PathBuf::from(row.get::<String>(1).map_err(map_sql)?),
                received_ts: parse_datetime(&row.get::<String>(2).map_err(map_sql)?),
            });
        }
        Ok(out)
    }

    async fn record_success(
        &self,
        entry_id: &str,
        bank_tag: &str,
        report_url: &str,
        report_path: &Path,
    ) -> Result<Uuid, DatabaseError> {
        let report_id = Uuid::new_v4();
        let tx = self.conn.transaction().await.map_err(map_sql)?;

        let insert = tx
            .execute(
                "INSERT INTO reports
                   (report_id, entry_id, bank_tag, report_url, report_path, downloaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    report_id.to_string(),
                    entry_id,
                    bank_tag,
                    report_url,
                    report_path.to_string_lossy().into_owned(),
                    ts_to_sql(Utc::now()),
                ],
            )
            .await;
        if let Err(e) = insert {
            let _ = tx.rollback().await;
            return Err(map_sql(e));
        }

        let update = tx
            .execute(
                "UPDATE emails SET report_path = ?1 WHERE entry_id = ?2",
                params![report_path.to_string_lossy().into_owned(), entry_id],
            )
            .await;
        if let Err(e) = update {
            let _ = tx.rollback().await;
            return Err(map_sql(e));
        }

        tx.commit().await.map_err(map_sql)?;
        debug!(%entry_id, %report_id, "Recorded successful download");
        Ok(report_id)
    }

    async fn record_failure(
        &self,
        entry_id: &str,
        bank_tag: &str,
        html_path: &Path,
        error_msg: &str,
    ) -> Result<Uuid, DatabaseError> {
        let bin_id = Uuid::new_v4();
        self.conn
            .execute(
                "INSERT INTO bin (bin_id, entry_id, bank_tag, html_path, error_msg, attempted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    bin_id.to_string(),
                    entry_id,
                    bank_tag,
                    html_path.to_string_lossy().into_owned(),
                    error_msg,
                    ts_to_sql(Utc::now()),
                ],
            )
            .await
            .map_err(map_sql)?;
        debug!(%entry_id, %bin_id, "Recorded failed attempt");
        Ok(bin_id)
    }

    async fn failure_count(&self, entry_id: &str) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM bin WHERE entry_id = ?1",
                params![entry_id],
            )
            .await
            .map_err(map_sql)?;
        match rows.next().await.map_err(map_sql)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(map_sql)? as u32),
            None => Ok(0),
        }
    }

    async fn get_report(&self, entry_id: &str) -> Result<Option<ReportRow>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT report_id, entry_id, bank_tag, report_url, report_path, downloaded_at
                   FROM reports WHERE entry_id = ?1",
                params![entry_id],
            )
            .await
            .map_err(map_sql)?;

        match rows.next().await.map_err(map_sql)? {
            Some(row) => Ok(Some(ReportRow {
                report_id: row.get::<String>(0).map_err(map_sql)?,
                entry_id: row.get::<String>(1).map_err(map_sql)?,
                bank_tag: row.get::<String>(2).map_err(map_sql)?,
                report_url: row.get::<String>(3).map_err(map_sql)?,
                report_path: PathBuf::from(row.get::<String>(4).map_err(map_sql)?),
                downloaded_at: parse_datetime(&row.get::<String>(5).map_err(map_sql)?),
            })),
            None => Ok(None),
        }
    }

    async fn list_failures(&self, entry_id: &str) -> Result<Vec<FailureRow>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT bin_id, entry_id, bank_tag, html_path, error_msg, attempted_at
                   FROM bin WHERE entry_id = ?1 ORDER BY attempted_at ASC",
                params![entry_id],
            )
            .await
            .map_err(map_sql)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql)? {
            out.push(FailureRow {
                bin_id: row.get::<String>(0).map_err(map_sql)?,
                entry_id: row.get::<String>(1).map_err(map_sql)?,
                bank_tag: row.get::<String>(2).map_err(map_sql)?,
                html_path: PathBuf::from(row.get::<String>(3).map_err(map_sql)?),
                error_msg: row.get::<String>(4).map_err(map_sql)?,
                attempted_at: parse_datetime(&row.get::<String>(5).map_err(map_sql)?),
            });
        }
        Ok(out)
    }

    async fn acquire_run_lock(&self, holder: &str, ttl: Duration) -> Result<(), DatabaseError> {
        // Break locks left behind by a crashed run.
        let floor = Utc::now() - chrono::Duration::seconds(ttl.as_secs() as i64);
        self.conn
            .execute(
                "DELETE FROM run_lock WHERE lock_key = ?1 AND acquired_at <= ?2",
                params![RUN_LOCK_KEY, ts_to_sql(floor)],
            )
            .await
            .map_err(map_sql)?;

        let attempt = self
            .conn
            .execute(
                "INSERT INTO run_lock (lock_key, holder, acquired_at) VALUES (?1, ?2, ?3)",
                params![RUN_LOCK_KEY, holder, ts_to_sql(Utc::now())],
            )
            .await
            .map_err(map_sql);

        match attempt {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                let mut rows = self
                    .conn
                    .query(
                        "SELECT holder FROM run_lock WHERE lock_key = ?1",
                        params![RUN_LOCK_KEY],
                    )
                    .await
                    .map_err(map_sql)?;
                let holder = match rows.next().await.map_err(map_sql)? {
                    Some(row) => row.get::<String>(0).map_err(map_sql)?,
                    None => "unknown".to_string(),
                };
                Err(DatabaseError::Locked { holder })
            }
            Err(e) => Err(e),
        }
    }

    async fn release_run_lock(&self, holder: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "DELETE FROM run_lock WHERE lock_key = ?1 AND holder = ?2",
                params![RUN_LOCK_KEY, holder],
            )
            .await
            .map_err(map_sql)?;
        Ok(())
    }

    async fn fetch_pending_vectorization(
        &self,
    ) -> Result<Vec<PendingVectorization>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT r.report_id, r.report_path, e.received_ts
                   FROM reports r
                   JOIN emails e ON r.entry_id = e.entry_id
                  WHERE r.report_id NOT IN (SELECT report_id FROM report_vectors)
                  ORDER BY e.received_ts ASC",
                (),
            )
            .await
            .map_err(map_sql)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_sql)? {
            out.push(PendingVectorization {
                report_id: row.get::<String>(0).map_err(map_sql)?,
                report_path: PathBuf::from(row.get::<String>(1).map_err(map_sql)?),
                received_ts: parse_datetime(&row.get::<String>(2).map_err(map_sql)?),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, h, m, 0).unwrap()
    }

    async fn store_with_email(entry_id: &str, bank: &str, received: DateTime<Utc>) -> LibSqlStore {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .insert_email(
                entry_id,
                bank,
                Some("FX Weekly"),
                Some(Path::new("/emails/20250307 - FX Weekly.html")),
                received,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.run_migrations().await.unwrap();
        store.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn cutoff_defaults_to_epoch() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let cutoff = store.get_cutoff("JPM").await.unwrap();
        assert_eq!(cutoff, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn cutoff_tracks_latest_success() {
        let store = store_with_email("A1", "JPM", ts(9, 0)).await;
        store
            .insert_email("A2", "JPM", None, Some(Path::new("/e/a2.html")), ts(11, 0))
            .await
            .unwrap();
        store
            .record_success("A1", "JPM", "https://x/a1.pdf", Path::new("/r/a1.pdf"))
            .await
            .unwrap();
        store
            .record_success("A2", "JPM", "https://x/a2.pdf", Path::new("/r/a2.pdf"))
            .await
            .unwrap();

        assert_eq!(store.get_cutoff("JPM").await.unwrap(), ts(11, 0));
        // Other banks are unaffected
        assert_eq!(store.get_cutoff("GS").await.unwrap(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn fetch_unprocessed_filters_by_bank_cutoff_and_html() {
        let store = store_with_email("A1", "JPM", ts(9, 0)).await;
        store
            .insert_email("A2", "JPM", None, Some(Path::new("/e/a2.html")), ts(11, 0))
            .await
            .unwrap();
        store
            .insert_email("A3", "GS", None, Some(Path::new("/e/a3.html")), ts(12, 0))
            .await
            .unwrap();
        // No saved HTML — never eligible
        store
            .insert_email("A4", "JPM", None, None, ts(13, 0))
            .await
            .unwrap();

        let rows = store.fetch_unprocessed("JPM", ts(10, 0)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry_id, "A2");
        assert_eq!(rows[0].received_ts, ts(11, 0));
    }

    #[tokio::test]
    async fn fetch_unprocessed_orders_by_received_ascending() {
        let store = store_with_email("B2", "GS", ts(12, 0)).await;
        store
            .insert_email("B1", "GS", None, Some(Path::new("/e/b1.html")), ts(10, 0))
            .await
            .unwrap();

        let rows = store
            .fetch_unprocessed("GS", DateTime::<Utc>::UNIX_EPOCH)
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.entry_id.as_str()).collect();
        assert_eq!(ids, vec!["B1", "B2"]);
    }

    #[tokio::test]
    async fn record_success_writes_report_and_updates_email() {
        let store = store_with_email("A1", "JPM", ts(9, 0)).await;
        let report_id = store
            .record_success("A1", "JPM", "https://x/doc.pdf", Path::new("/r/final.pdf"))
            .await
            .unwrap();

        let report = store.get_report("A1").await.unwrap().unwrap();
        assert_eq!(report.report_id, report_id.to_string());
        assert_eq!(report.bank_tag, "JPM");
        assert_eq!(report.report_path, PathBuf::from("/r/final.pdf"));

        let email = store.get_email("A1").await.unwrap().unwrap();
        assert_eq!(email.report_path, Some(PathBuf::from("/r/final.pdf")));
    }

    #[tokio::test]
    async fn duplicate_success_is_a_constraint_violation() {
        let store = store_with_email("A1", "JPM", ts(9, 0)).await;
        store
            .record_success("A1", "JPM", "u", Path::new("/r/a.pdf"))
            .await
            .unwrap();
        let err = store
            .record_success("A1", "JPM", "u", Path::new("/r/b.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        // The rolled-back retry must not have clobbered the email row
        let email = store.get_email("A1").await.unwrap().unwrap();
        assert_eq!(email.report_path, Some(PathBuf::from("/r/a.pdf")));
    }

    #[tokio::test]
    async fn failures_accumulate() {
        let store = store_with_email("A1", "JPM", ts(9, 0)).await;
        let html = Path::new("/e/a1.html");
        store
            .record_failure("A1", "JPM", html, "Timeout: no new PDF")
            .await
            .unwrap();
        store
            .record_failure("A1", "JPM", html, "HTTP 503 fetching https://x")
            .await
            .unwrap();

        assert_eq!(store.failure_count("A1").await.unwrap(), 2);
        let failures = store.list_failures("A1").await.unwrap();
        assert_eq!(failures.len(), 2);
        assert!(failures[0].error_msg.contains("Timeout"));
    }

    #[tokio::test]
    async fn failure_does_not_advance_cutoff() {
        let store = store_with_email("A1", "JPM", ts(9, 0)).await;
        store
            .record_failure("A1", "JPM", Path::new("/e/a1.html"), "Timeout")
            .await
            .unwrap();
        assert_eq!(store.get_cutoff("JPM").await.unwrap(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn run_lock_excludes_second_holder() {
        let store = LibSqlStore::new_memory().await.unwrap();
        let ttl = Duration::from_secs(3600);
        store.acquire_run_lock("run-a", ttl).await.unwrap();

        let err = store.acquire_run_lock("run-b", ttl).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Locked { ref holder } if holder == "run-a"));

        store.release_run_lock("run-a").await.unwrap();
        store.acquire_run_lock("run-b", ttl).await.unwrap();
    }

    #[tokio::test]
    async fn stale_run_lock_is_broken() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .acquire_run_lock("crashed-run", Duration::from_secs(3600))
            .await
            .unwrap();
        // TTL of zero treats any existing lock as stale
        store
            .acquire_run_lock("fresh-run", Duration::from_secs(0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn vectorization_feed_lists_unconsumed_reports() {
        let store = store_with_email("A1", "JPM", ts(9, 0)).await;
        store
            .record_success("A1", "JPM", "u", Path::new("/r/a1.pdf"))
            .await
            .unwrap();

        let pending = store.fetch_pending_vectorization().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].report_path, PathBuf::from("/r/a1.pdf"));
        assert_eq!(pending[0].received_ts, ts(9, 0));
    }
}
