//! `Store` trait — single async interface for pipeline persistence.
//!
//! The dispatcher, tests, and external collaborators (mail ingestion upstream,
//! summarization downstream) all go through this trait, so any backend — or a
//! test double — can stand in for the libSQL implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

/// A persisted ingested email.
#[derive(Debug, Clone)]
pub struct EmailRow {
    pub entry_id: String,
    pub bank_tag: String,
    pub subject: Option<String>,
    pub html_path: Option<PathBuf>,
    pub received_ts: DateTime<Utc>,
    pub report_path: Option<PathBuf>,
}

/// An email eligible for dispatch: unprocessed, with a saved HTML file.
#[derive(Debug, Clone)]
pub struct UnprocessedEmail {
    pub entry_id: String,
    pub html_path: PathBuf,
    pub received_ts: DateTime<Utc>,
}

/// A recorded successful download.
#[derive(Debug, Clone)]
pub struct ReportRow {
    pub report_id: String,
    pub entry_id: String,
    pub bank_tag: String,
    pub report_url: String,
    pub report_path: PathBuf,
    pub downloaded_at: DateTime<Utc>,
}

/// A recorded failed attempt. Append-only; retries accumulate rows.
#[derive(Debug, Clone)]
pub struct FailureRow {
    pub bin_id: String,
    pub entry_id: String,
    pub bank_tag: String,
    pub html_path: PathBuf,
    pub error_msg: String,
    pub attempted_at: DateTime<Utc>,
}

/// A report awaiting downstream summarization/vectorization.
#[derive(Debug, Clone)]
pub struct PendingVectorization {
    pub report_id: String,
    pub report_path: PathBuf,
    pub received_ts: DateTime<Utc>,
}

/// Backend-agnostic persistence for the harvest pipeline.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Ingestion (upstream contract) ───────────────────────────────

    /// Insert an ingested email row. `entry_id` is the caller's stable
    /// identity; re-inserting an existing id is a constraint violation.
    async fn insert_email(
        &self,
        entry_id: &str,
        bank_tag: &str,
        subject: Option<&str>,
        html_path: Option<&Path>,
        received_ts: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Look up an email by its entry id.
    async fn get_email(&self, entry_id: &str) -> Result<Option<EmailRow>, DatabaseError>;

    // ── Selection ───────────────────────────────────────────────────

    /// Latest successfully processed `received_ts` for a bank, or the epoch
    /// sentinel when the bank has no successes yet (process everything).
    async fn get_cutoff(&self, bank_tag: &str) -> Result<DateTime<Utc>, DatabaseError>;

    /// Emails for a bank with a saved HTML file and `received_ts > cutoff`,
    /// ordered by `received_ts` ascending for deterministic processing.
    async fn fetch_unprocessed(
        &self,
        bank_tag: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<UnprocessedEmail>, DatabaseError>;

    // ── Outcome recording ───────────────────────────────────────────

    /// Record a successful download: insert the report row and update the
    /// owning email's `report_path`, atomically in one transaction. A repeat
    /// success for the same entry violates the uniqueness constraint and
    /// rolls back, returning `DatabaseError::Constraint`.
    async fn record_success(
        &self,
        entry_id: &str,
        bank_tag: &str,
        report_url: &str,
        report_path: &Path,
    ) -> Result<Uuid, DatabaseError>;

    /// Record a failed attempt in the bin. Append-only.
    async fn record_failure(
        &self,
        entry_id: &str,
        bank_tag: &str,
        html_path: &Path,
        error_msg: &str,
    ) -> Result<Uuid, DatabaseError>;

    /// Number of failure records for an entry (drives the retry cap).
    async fn failure_count(&self, entry_id: &str) -> Result<u32, DatabaseError>;

    /// The report recorded for an entry, if any.
    async fn get_report(&self, entry_id: &str) -> Result<Option<ReportRow>, DatabaseError>;

    /// All failure records for an entry, oldest first.
    async fn list_failures(&self, entry_id: &str) -> Result<Vec<FailureRow>, DatabaseError>;

    // ── Run exclusion ───────────────────────────────────────────────

    /// Take the advisory run lock. Locks older than `ttl` (from a crashed
    /// run) are broken first. Fails with `DatabaseError::Locked` if another
    /// live run holds it.
    async fn acquire_run_lock(&self, holder: &str, ttl: Duration) -> Result<(), DatabaseError>;

    /// Release the advisory run lock if `holder` owns it.
    async fn release_run_lock(&self, holder: &str) -> Result<(), DatabaseError>;

    // ── Downstream feed ─────────────────────────────────────────────

    /// Reports not yet present in `report_vectors`, oldest first — the feed
    /// consumed by the summarization/vectorization step.
    async fn fetch_pending_vectorization(
        &self,
    ) -> Result<Vec<PendingVectorization>, DatabaseError>;
}
