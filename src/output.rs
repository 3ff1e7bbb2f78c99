//! Snapshot persistence: dated CSV file naming, writing and reading back.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::WriterBuilder;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::metadata::FileMetadataRecord;
use crate::trip_file::{SourceKind, TripFilter};

/// Name of the snapshot produced on `date`, e.g.
/// `2024-05-01_s3_yellow_tripmetadata_2024.csv`.
pub fn snapshot_file_name(date: NaiveDate, source: SourceKind, filter: &TripFilter) -> String {
    format!(
        "{}_{}_{}_tripmetadata_{}.csv",
        date.format("%Y-%m-%d"),
        source,
        filter.types_label(),
        filter.years_label()
    )
}

/// Path of the JSON summary written next to a snapshot.
pub fn summary_path(snapshot: &Path) -> PathBuf {
    snapshot.with_extension("summary.json")
}

/// Writes `records` to `path`, replacing any previous file.
///
/// Parent directories are created. The header row is written once even when
/// `records` is empty.
pub fn write_snapshot(path: &Path, records: &[FileMetadataRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    info!(path = %path.display(), records = records.len(), "Saving trips metadata");

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);

    writer.write_record(SNAPSHOT_HEADERS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    debug!(path = %path.display(), "Saving trips metadata finished");
    Ok(())
}

/// Reads a snapshot previously produced by [`write_snapshot`].
pub fn read_snapshot(path: &Path) -> Result<Vec<FileMetadataRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: FileMetadataRecord =
            result.with_context(|| format!("malformed row in {}", path.display()))?;
        records.push(record);
    }
    Ok(records)
}

/// Snapshot column order.
pub const SNAPSHOT_HEADERS: [&str; 13] = [
    "file_name",
    "file_s3_url",
    "file_cloudfront_url",
    "file_record_type",
    "file_year",
    "file_month",
    "file_modification_time",
    "file_num_rows",
    "file_num_columns",
    "file_column_names",
    "file_size_bytes",
    "file_size_mbs",
    "file_size_gbs",
];
