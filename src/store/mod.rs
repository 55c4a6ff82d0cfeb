//! Persistence layer — libSQL-backed storage for emails, reports, and failures.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{
    EmailRow, FailureRow, PendingVectorization, ReportRow, Store, UnprocessedEmail,
};
