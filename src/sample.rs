//! Random row samples of trip files, drawn without replacement.

use anyhow::{Context, Result};
use arrow::array::UInt64Array;
use arrow::compute::{concat_batches, take_record_batch};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rand::Rng;
use rand::seq::index;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, info};

use crate::download::download_trip_file;
use crate::fetch::PartFile;
use crate::services::trip_source::TripSource;
use crate::trip_file::TripFile;

pub const DEFAULT_SAMPLE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SampleFormat {
    Parquet,
    Csv,
}

impl SampleFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SampleFormat::Parquet => "parquet",
            SampleFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleOutcome {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// e.g. `yellow_tripdatasample_2023-01.parquet`.
pub fn sample_file_name(file: &TripFile, format: SampleFormat) -> String {
    format!(
        "{}_tripdatasample_{}-{:02}.{}",
        file.record_type,
        file.year,
        file.month,
        format.extension()
    )
}

/// Draws `size` distinct row indices out of `num_rows`, in ascending order.
/// Files with fewer rows are taken whole.
pub fn sample_indices<R: Rng + ?Sized>(rng: &mut R, num_rows: usize, size: usize) -> Vec<usize> {
    let amount = size.min(num_rows);
    let mut indices = index::sample(rng, num_rows, amount).into_vec();
    indices.sort_unstable();
    indices
}

/// Writes a sample of `size` rows of the parquet file `src` to `dst`.
/// Returns the number of rows written.
pub fn sample_file<R: Rng + ?Sized>(
    src: &Path,
    dst: &Path,
    size: usize,
    format: SampleFormat,
    rng: &mut R,
) -> Result<usize> {
    let input = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(input)
        .with_context(|| format!("reading parquet metadata of {}", src.display()))?;
    let num_rows = usize::try_from(builder.metadata().file_metadata().num_rows())
        .with_context(|| format!("{} reports a negative row count", src.display()))?;
    let schema = builder.schema().clone();
    let indices = sample_indices(rng, num_rows, size);
    let reader = builder.build()?;

    // indices are sorted, so each batch takes the next run of them
    let mut pieces = Vec::new();
    let mut offset = 0usize;
    let mut next = 0usize;
    for batch in reader {
        if next == indices.len() {
            break;
        }
        let batch = batch.with_context(|| format!("reading {}", src.display()))?;
        let end = offset + batch.num_rows();
        let first = next;
        while next < indices.len() && indices[next] < end {
            next += 1;
        }
        if next > first {
            let local = UInt64Array::from_iter_values(
                indices[first..next].iter().map(|i| (i - offset) as u64),
            );
            pieces.push(take_record_batch(&batch, &local)?);
        }
        offset = end;
    }

    let sample = concat_batches(&schema, &pieces)?;
    write_sample(&sample, dst, format)?;
    Ok(sample.num_rows())
}

fn write_sample(batch: &RecordBatch, dst: &Path, format: SampleFormat) -> Result<()> {
    let part = PartFile::new(dst);
    let output =
        File::create(part.path()).with_context(|| format!("creating {}", part.path().display()))?;

    match format {
        SampleFormat::Parquet => {
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            let mut writer = ArrowWriter::try_new(output, batch.schema(), Some(props))?;
            writer.write(batch)?;
            writer.close()?;
        }
        SampleFormat::Csv => {
            let mut writer = arrow::csv::WriterBuilder::new()
                .with_header(true)
                .build(output);
            writer.write(batch)?;
        }
    }

    part.commit()
}

/// Makes sure `file` is downloaded into `trips_dir`, then samples it into
/// `sample_dir`.
pub async fn sample_trip_file(
    source: &dyn TripSource,
    file: &TripFile,
    trips_dir: &Path,
    sample_dir: &Path,
    size: usize,
    format: SampleFormat,
) -> Result<SampleOutcome> {
    let local = download_trip_file(source, file, trips_dir, None).await?;
    let dst = sample_dir.join(sample_file_name(file, format));

    info!("Sampling {}", file.name);
    let src = local.path;
    let target = dst.clone();
    let rows = tokio::task::spawn_blocking(move || {
        sample_file(&src, &target, size, format, &mut rand::rng())
    })
    .await
    .context("sampling task panicked")?
    .with_context(|| format!("sampling {}", file.name))?;
    info!(rows, path = %dst.display(), "Sampling {} finished", file.name);

    Ok(SampleOutcome {
        name: file.name.clone(),
        path: dst,
        rows,
    })
}

/// Samples `files` on a pool of at most `concurrency` tasks.
///
/// Any failure aborts the outstanding tasks and fails the run.
#[tracing::instrument(skip_all, fields(files = files.len(), size = size, concurrency = concurrency))]
pub async fn sample_all(
    source: Arc<dyn TripSource>,
    files: Vec<TripFile>,
    trips_dir: PathBuf,
    sample_dir: PathBuf,
    size: usize,
    format: SampleFormat,
    concurrency: usize,
) -> Result<Vec<SampleOutcome>> {
    info!("Sampling trips data");

    for dir in [&trips_dir, &sample_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let trips_dir = Arc::new(trips_dir);
    let sample_dir = Arc::new(sample_dir);
    let mut tasks = Vec::with_capacity(files.len());

    for file in files {
        let sem = semaphore.clone();
        let source = source.clone();
        let trips_dir = trips_dir.clone();
        let sample_dir = sample_dir.clone();
        let span = tracing::info_span!("sample_trip_file", file = %file.name);

        tasks.push(tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                sample_trip_file(source.as_ref(), &file, &trips_dir, &sample_dir, size, format).await
            }
            .instrument(span),
        ));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut pending = tasks.into_iter();
    while let Some(task) = pending.next() {
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("sampling task panicked")),
        };
        match outcome {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                for rest in pending {
                    rest.abort();
                }
                return Err(e);
            }
        }
    }

    info!(files = outcomes.len(), "Sampling trips data finished");
    Ok(outcomes)
}
