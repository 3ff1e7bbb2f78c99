use chrono::Utc;
use std::collections::BTreeMap;

use crate::aggregator::types::{GroupTotals, SnapshotSummary};
use crate::metadata::{FileMetadataRecord, size_units};
use crate::trip_file::RecordType;

/// Average bytes per row. Returns 0.0 when there are no rows.
pub fn avg_row_bytes(bytes: u64, rows: i64) -> f64 {
    if rows <= 0 {
        0.0
    } else {
        bytes as f64 / rows as f64
    }
}

/// Groups records by record type and year and totals rows and bytes.
///
/// Groups are ordered by record type, then year. The grand totals are the
/// sums over all groups.
pub fn summarize(records: &[FileMetadataRecord]) -> SnapshotSummary {
    let mut groups: BTreeMap<(RecordType, i32), (usize, i64, u64)> = BTreeMap::new();

    for record in records {
        let entry = groups
            .entry((record.file_record_type, record.file_year))
            .or_default();
        entry.0 += 1;
        entry.1 += record.file_num_rows;
        entry.2 += record.file_size_bytes;
    }

    let groups: Vec<GroupTotals> = groups
        .into_iter()
        .map(|((record_type, year), (files, rows, bytes))| GroupTotals {
            record_type,
            year,
            files,
            rows,
            bytes,
            avg_row_bytes: avg_row_bytes(bytes, rows),
        })
        .collect();

    let total_rows = groups.iter().map(|g| g.rows).sum();
    let total_bytes = groups.iter().map(|g| g.bytes).sum();

    SnapshotSummary {
        generated_at: Utc::now(),
        files: records.len(),
        total_rows,
        total_bytes,
        total_gbs: size_units(total_bytes).1,
        groups,
    }
}
