//! Version-tracked database migrations.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks the
//! current version in `_migrations` and applies only the newer ones, in order.

use libsql::Connection;
use tracing::info;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS emails (
                entry_id TEXT PRIMARY KEY,
                received_ts TEXT NOT NULL,
                bank_tag TEXT NOT NULL,
                subject TEXT,
                html_path TEXT,
                report_path TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_emails_bank_received
                ON emails(bank_tag, received_ts);

            CREATE TABLE IF NOT EXISTS reports (
                report_id TEXT PRIMARY KEY,
                entry_id TEXT NOT NULL UNIQUE REFERENCES emails(entry_id),
                bank_tag TEXT NOT NULL,
                report_url TEXT NOT NULL,
                report_path TEXT NOT NULL,
                downloaded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_reports_bank ON reports(bank_tag);

            CREATE TABLE IF NOT EXISTS bin (
                bin_id TEXT PRIMARY KEY,
                entry_id TEXT,
                bank_tag TEXT,
                html_path TEXT,
                error_msg TEXT,
                attempted_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_bin_entry ON bin(entry_id);
        "#,
    },
    Migration {
        version: 2,
        name: "run_lock_and_vector_feed",
        sql: r#"
            CREATE TABLE IF NOT EXISTS run_lock (
                lock_key TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS report_vectors (
                report_id TEXT PRIMARY KEY REFERENCES reports(report_id),
                summary TEXT,
                vectorized_at TEXT
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("creating _migrations: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!(
                    "migration v{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(|e| {
            DatabaseError::Migration(format!(
                "recording migration v{}: {e}",
                migration.version
            ))
        })?;
        info!(version = migration.version, name = migration.name, "Applied migration");
    }

    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;
    match row {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(e.to_string())),
        None => Ok(0),
    }
}
