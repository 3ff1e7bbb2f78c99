//! Data types produced by the aggregation step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trip_file::RecordType;

/// Totals for one `(record_type, year)` group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTotals {
    pub record_type: RecordType,
    pub year: i32,
    pub files: usize,
    pub rows: i64,
    pub bytes: u64,
    /// Compressed bytes per row; `rows * avg_row_bytes` approximates `bytes`.
    pub avg_row_bytes: f64,
}

/// Summary of a snapshot, written as `<snapshot>.summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub generated_at: DateTime<Utc>,
    pub files: usize,
    pub total_rows: i64,
    pub total_bytes: u64,
    pub total_gbs: f64,
    pub groups: Vec<GroupTotals>,
}
