//! Report harvester — nightly ingestion of bank research PDFs.
//!
//! Saved research emails (tagged by bank upstream) are dispatched to per-bank
//! resolvers that locate and download the referenced PDF; outcomes are
//! recorded transactionally so retries stay idempotent and auditable.

pub mod browser;
pub mod classifier;
pub mod config;
pub mod error;
pub mod naming;
pub mod pipeline;
pub mod resolver;
pub mod store;
