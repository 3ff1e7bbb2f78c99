//! Per-file inspection: size, modification time and parquet footer summary.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info};

use crate::metadata::{FileMetadataRecord, MirrorUrls};
use crate::parquet_footer::{self, FOOTER_TAIL_LEN};
use crate::services::trip_source::TripSource;
use crate::trip_file::TripFile;

/// Builds the metadata record of a single file.
///
/// Only the 8-byte tail and the footer block are read; the row data is never
/// fetched.
pub async fn inspect_file(
    source: &dyn TripSource,
    file: &TripFile,
    mirrors: &MirrorUrls,
) -> Result<FileMetadataRecord> {
    let info = source
        .stat(&file.location)
        .await
        .with_context(|| format!("reading file info of {}", file.name))?;

    anyhow::ensure!(
        info.size >= FOOTER_TAIL_LEN,
        "{} is only {} bytes, too short for parquet",
        file.name,
        info.size
    );

    let tail = source
        .read_range(&file.location, info.size - FOOTER_TAIL_LEN..info.size)
        .await
        .with_context(|| format!("reading footer tail of {}", file.name))?;
    let metadata_len =
        parquet_footer::metadata_len(&tail).with_context(|| format!("inspecting {}", file.name))?;
    let range = parquet_footer::metadata_range(info.size, metadata_len)
        .with_context(|| format!("inspecting {}", file.name))?;

    let block = source
        .read_range(&file.location, range)
        .await
        .with_context(|| format!("reading footer of {}", file.name))?;
    let metadata = parquet_footer::decode_metadata(&block)
        .with_context(|| format!("inspecting {}", file.name))?;
    let footer = parquet_footer::summarize_metadata(&metadata);

    debug!(
        file = %file.name,
        size = info.size,
        rows = footer.num_rows,
        columns = footer.num_columns,
        "Inspected trip file"
    );

    Ok(FileMetadataRecord::new(file, info, footer, mirrors))
}

/// Inspects `files` on a pool of at most `concurrency` tasks.
///
/// Records come back in the order of `files`. The first failure aborts the
/// remaining tasks and fails the whole call.
#[tracing::instrument(skip_all, fields(files = files.len(), concurrency = concurrency))]
pub async fn inspect_all(
    source: Arc<dyn TripSource>,
    files: Vec<TripFile>,
    mirrors: MirrorUrls,
    concurrency: usize,
) -> Result<Vec<FileMetadataRecord>> {
    info!("Extracting trips metadata");

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mirrors = Arc::new(mirrors);
    let mut tasks = Vec::with_capacity(files.len());

    for file in files {
        let sem = semaphore.clone();
        let source = source.clone();
        let mirrors = mirrors.clone();
        let span = tracing::info_span!("inspect_file", file = %file.name);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                inspect_file(source.as_ref(), &file, &mirrors).await
            }
            .instrument(span),
        );
        tasks.push(task);
    }

    let mut records = Vec::with_capacity(tasks.len());
    let mut pending = tasks.into_iter();
    while let Some(task) = pending.next() {
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("inspection task panicked")),
        };
        match outcome {
            Ok(record) => records.push(record),
            Err(e) => {
                for rest in pending {
                    rest.abort();
                }
                return Err(e);
            }
        }
    }

    info!(records = records.len(), "Extracting trips metadata finished");
    Ok(records)
}
