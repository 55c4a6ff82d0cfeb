//! Error types for the report harvester.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Run lock already held by {holder}")]
    Locked { holder: String },
}

/// Per-item resolution and download errors.
///
/// None of these are fatal to a run — the dispatcher converts them into
/// failure records and moves on to the next item.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No element matched selector {selector:?}")]
    ElementNotFound { selector: String },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Timeout: no new PDF appeared in {} within {waited:?}", .folder.display())]
    Timeout { folder: PathBuf, waited: Duration },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status} fetching {url}")]
    Http { status: u16, url: String },

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Selector matched but element cannot be clicked: {0}")]
    ClickUnsupported(String),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
