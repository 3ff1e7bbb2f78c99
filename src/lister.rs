//! Discovery of candidate trip files.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::services::trip_source::TripSource;
use crate::trip_file::{TripFile, TripFilter};

/// Lists the files of `source` that pass `filter`.
///
/// Names that are not trip files are skipped. The result is de-duplicated by
/// file name and sorted by it, so the same listing always yields the same
/// candidate set.
#[tracing::instrument(skip_all, fields(source = %source.kind()))]
pub async fn list_trip_files(source: &dyn TripSource, filter: &TripFilter) -> Result<Vec<TripFile>> {
    info!("Discovering trip files");

    let listed = source
        .list_files()
        .await
        .with_context(|| format!("listing {} trip files", source.kind()))?;
    let total = listed.len();

    let mut selected: BTreeMap<String, TripFile> = BTreeMap::new();
    let mut skipped = 0usize;

    for entry in listed {
        let Some(file) = TripFile::from_listing(&entry.name, &entry.location) else {
            debug!(name = %entry.name, "Not a trip file, skipping");
            skipped += 1;
            continue;
        };
        if filter.allows(&file) {
            selected.entry(file.name.clone()).or_insert(file);
        }
    }

    let files: Vec<TripFile> = selected.into_values().collect();
    info!(
        listed = total,
        skipped,
        selected = files.len(),
        "Discovering trip files finished"
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::LocalSource;
    use crate::trip_file::RecordType;
    use std::fs;

    fn populated_dir(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        dir
    }

    #[tokio::test]
    async fn test_green_2020_listing() {
        let dir = populated_dir(&[
            "green_tripdata_2020-02.parquet",
            "green_tripdata_2020-01.parquet",
            "green_tripdata_2019-12.parquet",
            "yellow_tripdata_2020-01.parquet",
            "fhv_tripdata_2020-01.parquet",
            "fhvhv_tripdata_2020-01.parquet",
            "taxi_zone_lookup.csv",
        ]);
        let source = LocalSource::new(dir.path());
        let filter = TripFilter::new([RecordType::Green], [2020], 1..=12).unwrap();

        let files = list_trip_files(&source, &filter).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(
            names,
            vec!["green_tripdata_2020-01.parquet", "green_tripdata_2020-02.parquet"]
        );
        assert!(files
            .iter()
            .all(|f| f.record_type == RecordType::Green && f.year == 2020));
    }

    #[tokio::test]
    async fn test_listing_is_repeatable() {
        let dir = populated_dir(&[
            "yellow_tripdata_2021-03.parquet",
            "yellow_tripdata_2021-01.parquet",
            "green_tripdata_2021-01.parquet",
        ]);
        let source = LocalSource::new(dir.path());
        let filter =
            TripFilter::new([RecordType::Yellow, RecordType::Green], [2021], 1..=12).unwrap();

        let first = list_trip_files(&source, &filter).await.unwrap();
        let second = list_trip_files(&source, &filter).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let source = LocalSource::new("/nonexistent/tlc/trips");
        let filter = TripFilter::new([RecordType::Yellow], [2021], [1]).unwrap();

        assert!(list_trip_files(&source, &filter).await.is_err());
    }
}
