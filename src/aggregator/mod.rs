//! Fan-in of per-file records into a dated snapshot.
//!
//! Records from the inspector are collected into a [`Snapshot`], summarized
//! per record type and year, written as CSV plus a JSON summary, and
//! optionally uploaded to S3.

pub mod snapshot;
pub mod summary;
pub mod types;
pub mod upload;

pub use snapshot::Snapshot;
pub use summary::summarize;
pub use types::{GroupTotals, SnapshotSummary};
