//! Taxi zone reference data: download the lookup table and the zone
//! shapefile archive, and convert the lookup table to parquet.

use anyhow::{Context, Result};
use arrow::array::{Int32Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::download::{DownloadAction, download_action, local_state};
use crate::fetch::{self, HttpClient, PartFile};

/// One row of `taxi_zone_lookup.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZoneLookupRow {
    #[serde(rename = "LocationID")]
    pub location_id: i32,
    #[serde(rename = "Borough")]
    pub borough: Option<String>,
    #[serde(rename = "Zone")]
    pub zone: Option<String>,
    pub service_zone: Option<String>,
}

/// Downloads `url` into `dest_dir` unless the local copy is at least as new
/// as the server's `Last-Modified`. If the HEAD request fails, an existing
/// local copy is kept.
pub async fn safe_download<C: HttpClient>(
    client: &C,
    url: &str,
    dest_dir: &Path,
    timeout: Duration,
) -> Result<(PathBuf, DownloadAction)> {
    let name = Url::parse(url)
        .with_context(|| format!("invalid url '{url}'"))?
        .path_segments()
        .and_then(|mut s| s.next_back().map(str::to_string))
        .filter(|n| !n.is_empty())
        .with_context(|| format!("{url} has no file name"))?;
    let dest = dest_dir.join(&name);
    std::fs::create_dir_all(dest_dir).with_context(|| format!("creating {}", dest_dir.display()))?;

    let local = local_state(&dest)?;
    let remote_modified = match fetch::fetch_last_modified(client, url, timeout).await {
        Ok(modified) => modified,
        Err(e) => {
            warn!(url, error = %e, "Could not read remote modification time");
            None
        }
    };

    let action = download_action(local, remote_modified);
    match action {
        DownloadAction::Fetch => info!("{name} does not exist. Downloading"),
        DownloadAction::Update => info!("{name} already exists. Updating"),
        DownloadAction::UpToDate => info!("{name} is up to date"),
    }
    if action != DownloadAction::UpToDate {
        let bytes = fetch::download_to(client, url, &dest).await?;
        info!(url, bytes, "Downloading {name} finished");
    }

    Ok((dest, action))
}

/// Parses the zone lookup CSV.
pub fn read_zone_lookup<R: Read>(reader: R) -> Result<Vec<ZoneLookupRow>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: ZoneLookupRow = result.context("malformed zone lookup row")?;
        rows.push(row);
    }
    Ok(rows)
}

/// Arrow batch with normalized column names.
pub fn zone_lookup_batch(rows: &[ZoneLookupRow]) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("location_id", DataType::Int32, false),
        Field::new("borough", DataType::Utf8, true),
        Field::new("zone", DataType::Utf8, true),
        Field::new("service_zone", DataType::Utf8, true),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.location_id))),
            Arc::new(StringArray::from_iter(rows.iter().map(|r| r.borough.as_deref()))),
            Arc::new(StringArray::from_iter(rows.iter().map(|r| r.zone.as_deref()))),
            Arc::new(StringArray::from_iter(rows.iter().map(|r| r.service_zone.as_deref()))),
        ],
    )?;
    Ok(batch)
}

/// Converts the lookup CSV at `csv_path` to a parquet file at `parquet_path`.
pub fn write_zone_lookup_parquet(csv_path: &Path, parquet_path: &Path) -> Result<usize> {
    let input = File::open(csv_path).with_context(|| format!("opening {}", csv_path.display()))?;
    let rows = read_zone_lookup(input)?;
    let batch = zone_lookup_batch(&rows)?;

    let part = PartFile::new(parquet_path);
    let output =
        File::create(part.path()).with_context(|| format!("creating {}", part.path().display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    part.commit()?;

    Ok(rows.len())
}

/// Downloads both zone files and refreshes the lookup parquet.
#[tracing::instrument(skip(client))]
pub async fn extract_zones<C: HttpClient>(
    client: &C,
    lookup_url: &str,
    archive_url: &str,
    dest_dir: &Path,
    timeout: Duration,
) -> Result<()> {
    info!("Downloading taxi zone lookup file");
    let (lookup_csv, action) = safe_download(client, lookup_url, dest_dir, timeout).await?;

    let lookup_parquet = lookup_csv.with_extension("parquet");
    if action != DownloadAction::UpToDate || !lookup_parquet.exists() {
        let rows = write_zone_lookup_parquet(&lookup_csv, &lookup_parquet)?;
        info!(rows, path = %lookup_parquet.display(), "Zone lookup parquet written");
    }

    info!("Downloading taxi zones file");
    safe_download(client, archive_url, dest_dir, timeout).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::part_path;
    use crate::fetch::tests::{StubClient, reply};
    use crate::parquet_footer::summarize_bytes;
    use arrow::array::Array;
    use chrono::{Duration as ChronoDuration, Utc};
    use reqwest::Method;

    const URL: &str = "https://cdn.test/misc/taxi_zone_lookup.csv";
    const TIMEOUT: Duration = Duration::from_secs(1);

    /// Serves `LOOKUP` with the given HEAD status and `Last-Modified`.
    fn lookup_server(head_status: u16, last_modified: Option<String>) -> StubClient {
        StubClient::new(move |req| {
            let headers: Vec<(&str, &str)> = last_modified
                .as_deref()
                .map(|m| vec![("last-modified", m)])
                .unwrap_or_default();
            if req.method() == Method::HEAD {
                reply(head_status, &headers, b"")
            } else {
                reply(200, &headers, LOOKUP.as_bytes())
            }
        })
    }

    fn gets(client: &StubClient) -> usize {
        client
            .seen()
            .iter()
            .filter(|(method, _)| method == Method::GET)
            .count()
    }

    const LOOKUP: &str = "\"LocationID\",\"Borough\",\"Zone\",\"service_zone\"\n\
        1,\"EWR\",\"Newark Airport\",\"EWR\"\n\
        2,\"Queens\",\"Jamaica Bay\",\"Boro Zone\"\n\
        264,\"Unknown\",\"N/A\",\"N/A\"\n\
        265,\"N/A\",\"Outside of NYC\",\n";

    #[test]
    fn test_read_zone_lookup() {
        let rows = read_zone_lookup(LOOKUP.as_bytes()).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].location_id, 1);
        assert_eq!(rows[1].zone.as_deref(), Some("Jamaica Bay"));
        assert_eq!(rows[3].service_zone, None);
    }

    #[test]
    fn test_zone_lookup_batch() {
        let rows = read_zone_lookup(LOOKUP.as_bytes()).unwrap();
        let batch = zone_lookup_batch(&rows).unwrap();

        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.schema().field(0).name(), "location_id");
        assert_eq!(batch.column(3).null_count(), 1);
    }

    #[test]
    fn test_write_zone_lookup_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("taxi_zone_lookup.csv");
        let parquet_path = dir.path().join("taxi_zone_lookup.parquet");
        std::fs::write(&csv_path, LOOKUP).unwrap();

        let rows = write_zone_lookup_parquet(&csv_path, &parquet_path).unwrap();
        assert_eq!(rows, 4);

        let summary = summarize_bytes(&std::fs::read(&parquet_path).unwrap()).unwrap();
        assert_eq!(summary.num_rows, 4);
        assert_eq!(
            summary.column_names,
            vec!["location_id", "borough", "zone", "service_zone"]
        );
    }

    #[test]
    fn test_parquet_write_leaves_no_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("taxi_zone_lookup.csv");
        let parquet_path = dir.path().join("taxi_zone_lookup.parquet");
        std::fs::write(&csv_path, LOOKUP).unwrap();

        write_zone_lookup_parquet(&csv_path, &parquet_path).unwrap();
        assert!(parquet_path.exists());
        assert!(!part_path(&parquet_path).exists());
    }

    #[test]
    fn test_malformed_lookup_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("taxi_zone_lookup.csv");
        let parquet_path = dir.path().join("taxi_zone_lookup.parquet");
        std::fs::write(&csv_path, "LocationID,Borough,Zone,service_zone\nnot-a-number,a,b,c\n").unwrap();

        assert!(write_zone_lookup_parquet(&csv_path, &parquet_path).is_err());
        assert!(!parquet_path.exists());
        assert!(!part_path(&parquet_path).exists());
    }

    #[tokio::test]
    async fn test_safe_download_fetches_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = lookup_server(200, Some("Wed, 20 Mar 2024 17:34:12 GMT".to_string()));

        let (path, action) = safe_download(&client, URL, dir.path(), TIMEOUT).await.unwrap();

        assert_eq!(action, DownloadAction::Fetch);
        assert_eq!(path, dir.path().join("taxi_zone_lookup.csv"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), LOOKUP);
    }

    #[tokio::test]
    async fn test_safe_download_updates_when_remote_is_newer() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("taxi_zone_lookup.csv");
        std::fs::write(&local, "stale").unwrap();
        let newer = (Utc::now() + ChronoDuration::days(1)).to_rfc2822();
        let client = lookup_server(200, Some(newer));

        let (_, action) = safe_download(&client, URL, dir.path(), TIMEOUT).await.unwrap();

        assert_eq!(action, DownloadAction::Update);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), LOOKUP);
    }

    #[tokio::test]
    async fn test_safe_download_keeps_newer_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("taxi_zone_lookup.csv");
        std::fs::write(&local, "local").unwrap();
        let client = lookup_server(200, Some("Wed, 20 Mar 2024 17:34:12 GMT".to_string()));

        let (_, action) = safe_download(&client, URL, dir.path(), TIMEOUT).await.unwrap();

        assert_eq!(action, DownloadAction::UpToDate);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "local");
        assert_eq!(gets(&client), 0);
    }

    #[tokio::test]
    async fn test_failed_head_keeps_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("taxi_zone_lookup.csv");
        std::fs::write(&local, "local").unwrap();
        // a GET would report a newer file, but only HEAD decides
        let newer = (Utc::now() + ChronoDuration::days(1)).to_rfc2822();
        let client = lookup_server(503, Some(newer));

        let (_, action) = safe_download(&client, URL, dir.path(), TIMEOUT).await.unwrap();

        assert_eq!(action, DownloadAction::UpToDate);
        assert_eq!(std::fs::read_to_string(&local).unwrap(), "local");
        assert_eq!(gets(&client), 0);
    }

    #[tokio::test]
    async fn test_failed_head_still_fetches_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let client = lookup_server(503, None);

        let (path, action) = safe_download(&client, URL, dir.path(), TIMEOUT).await.unwrap();

        assert_eq!(action, DownloadAction::Fetch);
        assert!(path.exists());
    }
}
