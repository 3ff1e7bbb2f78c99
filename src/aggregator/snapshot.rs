use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::aggregator::summary::summarize;
use crate::aggregator::types::SnapshotSummary;
use crate::metadata::FileMetadataRecord;
use crate::output::{snapshot_file_name, summary_path, write_snapshot};
use crate::trip_file::{SourceKind, TripFilter};

/// All records discovered by one run, dated by the run.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub run_date: NaiveDate,
    pub source: SourceKind,
    pub filter: TripFilter,
    pub records: Vec<FileMetadataRecord>,
}

/// Files written by [`Snapshot::persist`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedSnapshot {
    pub csv_path: PathBuf,
    pub summary_path: PathBuf,
}

impl Snapshot {
    pub fn new(
        run_date: NaiveDate,
        source: SourceKind,
        filter: TripFilter,
        records: Vec<FileMetadataRecord>,
    ) -> Self {
        Self {
            run_date,
            source,
            filter,
            records,
        }
    }

    pub fn file_name(&self) -> String {
        snapshot_file_name(self.run_date, self.source, &self.filter)
    }

    pub fn summary(&self) -> SnapshotSummary {
        summarize(&self.records)
    }

    /// Writes the CSV and its JSON summary under `dir`, replacing earlier
    /// files of the same name.
    pub fn persist(&self, dir: &Path) -> Result<PersistedSnapshot> {
        let csv_path = dir.join(self.file_name());
        write_snapshot(&csv_path, &self.records)?;

        let summary = self.summary();
        let summary_path = summary_path(&csv_path);
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&summary_path, json)
            .with_context(|| format!("writing {}", summary_path.display()))?;

        info!(
            csv = %csv_path.display(),
            files = summary.files,
            total_rows = summary.total_rows,
            total_gbs = summary.total_gbs,
            "Snapshot persisted"
        );

        Ok(PersistedSnapshot {
            csv_path,
            summary_path,
        })
    }
}
