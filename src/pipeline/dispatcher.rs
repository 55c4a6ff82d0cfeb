//! Dispatch loop — drives each registered bank's unprocessed emails through
//! its resolver and records the outcome.
//!
//! Per bank: compute the success high-water-mark, fetch newer rows, and for
//! each row resolve → rename → record. Failures are binned per item; one
//! item's failure never stops the bank or the run. The whole run holds an
//! advisory lock so overlapping scheduled invocations cannot double-download.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, ResolveError};
use crate::naming;
use crate::resolver::{Resolver, ResolverSet};
use crate::store::{Store, UnprocessedEmail};

/// Outcome counts for one pipeline run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Items skipped because they exhausted their retry budget.
    pub skipped: usize,
}

/// Sequential batch dispatcher over the resolver table.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    resolvers: ResolverSet,
    download_root: PathBuf,
    max_attempts: u32,
    lock_ttl: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        resolvers: ResolverSet,
        download_root: PathBuf,
        max_attempts: u32,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            resolvers,
            download_root,
            max_attempts,
            lock_ttl,
        }
    }

    /// Run one batch over all registered banks.
    ///
    /// Takes the advisory run lock for the duration; a concurrent run fails
    /// fast with `DatabaseError::Locked` before touching any bank.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let holder = Uuid::new_v4().to_string();
        self.store.acquire_run_lock(&holder, self.lock_ttl).await?;

        let result = self.run_locked().await;

        if let Err(e) = self.store.release_run_lock(&holder).await {
            warn!(error = %e, "Failed to release run lock; it will expire after the TTL");
        }
        result
    }

    async fn run_locked(&self) -> Result<RunSummary, Error> {
        let mut summary = RunSummary::default();
        for tag in self.resolvers.tags() {
            self.process_bank(tag, &mut summary).await?;
        }
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Run complete"
        );
        Ok(summary)
    }

    /// Process one bank's backlog sequentially.
    async fn process_bank(&self, bank_tag: &str, summary: &mut RunSummary) -> Result<(), Error> {
        let resolver = match self.resolvers.get(bank_tag) {
            Some(resolver) => resolver,
            None => return Ok(()),
        };

        let cutoff = self.store.get_cutoff(bank_tag).await?;
        let rows = self.store.fetch_unprocessed(bank_tag, cutoff).await?;
        debug!(bank = bank_tag, cutoff = %cutoff, pending = rows.len(), "Fetched backlog");

        for row in rows {
            let subject = naming::subject_from_html(&row.html_path);
            let basename = naming::output_basename(&subject, bank_tag, row.received_ts);

            // Retry budget: items that keep failing are parked, not retried
            // forever.
            let attempts = self.store.failure_count(&row.entry_id).await?;
            if attempts >= self.max_attempts {
                warn!(
                    file = %basename,
                    entry_id = %row.entry_id,
                    attempts,
                    "Retry budget exhausted, skipping"
                );
                summary.skipped += 1;
                continue;
            }

            match self.process_entry(resolver.as_ref(), bank_tag, &row, &basename).await {
                Ok(final_path) => {
                    let recorded = self
                        .store
                        .record_success(
                            &row.entry_id,
                            bank_tag,
                            &final_path.to_string_lossy(),
                            &final_path,
                        )
                        .await;
                    match recorded {
                        Ok(_) => {
                            info!(file = %basename, path = %final_path.display(), "Saved");
                            summary.succeeded += 1;
                        }
                        Err(e) => {
                            self.bin_item(&row, bank_tag, &basename, &e.to_string()).await;
                            summary.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    self.bin_item(&row, bank_tag, &basename, &e.to_string()).await;
                    summary.failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Resolve one email and move the download to its canonical path.
    async fn process_entry(
        &self,
        resolver: &dyn Resolver,
        bank_tag: &str,
        row: &UnprocessedEmail,
        basename: &str,
    ) -> Result<PathBuf, ResolveError> {
        let folder = naming::output_folder(&self.download_root, bank_tag, row.received_ts);
        tokio::fs::create_dir_all(&folder).await?;

        let temp_path = resolver.resolve(&row.html_path, &folder).await?;
        let final_path = folder.join(basename);
        tokio::fs::rename(&temp_path, &final_path).await?;
        Ok(final_path)
    }

    /// Record a failed item; if the failure write itself fails, keep the
    /// original error visible in the log rather than swallowing it.
    async fn bin_item(
        &self,
        row: &UnprocessedEmail,
        bank_tag: &str,
        basename: &str,
        error_msg: &str,
    ) {
        warn!(file = %basename, error = %error_msg, "Binned");
        if let Err(store_err) = self
            .store
            .record_failure(&row.entry_id, bank_tag, &row.html_path, error_msg)
            .await
        {
            error!(
                entry_id = %row.entry_id,
                original_error = %error_msg,
                store_error = %store_err,
                "Failed to record failure"
            );
        }
    }
}
