//! Batch pipeline — the dispatch loop over banks and their backlogs.

pub mod dispatcher;

pub use dispatcher::{Dispatcher, RunSummary};
