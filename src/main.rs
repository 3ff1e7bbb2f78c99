//! CLI entry point for the TLC trip-record extractor.
//!
//! Provides subcommands for building a metadata snapshot of the published trip
//! files, downloading or sampling trip files, fetching taxi zone reference
//! data, and summarizing an existing snapshot.

use anyhow::Result;
use chrono::{Datelike, Utc};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tlc_extract::aggregator::snapshot::Snapshot;
use tlc_extract::aggregator::summarize;
use tlc_extract::aggregator::upload::upload_snapshot;
use tlc_extract::config::Settings;
use tlc_extract::download::download_all;
use tlc_extract::fetch::BasicClient;
use tlc_extract::infra::{build_source, s3_client};
use tlc_extract::inspector::inspect_all;
use tlc_extract::lister::list_trip_files;
use tlc_extract::metadata::MirrorUrls;
use tlc_extract::output::read_snapshot;
use tlc_extract::sample::{DEFAULT_SAMPLE_SIZE, SampleFormat, sample_all};
use tlc_extract::trip_file::{RecordType, SourceKind, TripFilter};
use tlc_extract::zones::extract_zones;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "tlc_extract")]
#[command(about = "Extract metadata and data files of the NYC TLC trip records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// File selection shared by `metadata`, `trips` and `sample`.
#[derive(Args, Debug)]
struct Selection {
    /// Where to list and read trip files from
    #[arg(short, long, value_enum, default_value_t = SourceKind::S3)]
    source: SourceKind,

    /// Record types to include
    #[arg(short = 't', long = "type", value_enum, num_args = 1.., value_delimiter = ',', default_values_t = [RecordType::Yellow])]
    record_types: Vec<RecordType>,

    /// Years to include (defaults to the current year)
    #[arg(short, long = "year", num_args = 1.., value_delimiter = ',')]
    years: Vec<i32>,

    /// Months to include
    #[arg(short, long = "month", num_args = 1.., value_delimiter = ',')]
    months: Vec<u32>,

    /// Directory served by the `local` source (defaults to the trips data directory)
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// Maximum number of files processed at once
    /// (defaults to 1 for `web`, the number of CPUs otherwise)
    #[arg(short, long)]
    concurrency: Option<usize>,
}

impl Selection {
    fn filter(&self, default_months: &[u32]) -> Result<TripFilter> {
        let years = if self.years.is_empty() {
            vec![Utc::now().year()]
        } else {
            self.years.clone()
        };
        let months = if self.months.is_empty() {
            default_months.to_vec()
        } else {
            self.months.clone()
        };
        TripFilter::new(self.record_types.iter().copied(), years, months)
    }

    fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or_else(|| match self.source {
            SourceKind::Web => 1,
            _ => std::thread::available_parallelism().map_or(4, |n| n.get()),
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build a dated metadata snapshot of the selected trip files
    Metadata {
        #[command(flatten)]
        selection: Selection,

        /// Optional: S3 bucket to upload the snapshot to
        #[arg(long)]
        upload_bucket: Option<String>,

        /// Optional: Gzip compress the snapshot before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Download the selected trip files
    Trips {
        #[command(flatten)]
        selection: Selection,

        /// Also write a copy with normalized column names and types
        #[arg(long, default_value_t = false)]
        normalize: bool,
    },
    /// Write a random row sample of each selected trip file
    Sample {
        #[command(flatten)]
        selection: Selection,

        /// Rows drawn without replacement from each file
        #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
        sample_size: usize,

        /// Output file format
        #[arg(short, long, value_enum, default_value_t = SampleFormat::Parquet)]
        format: SampleFormat,
    },
    /// Download the taxi zone lookup table and shapefile archive
    Zones,
    /// Print per type and year totals of an existing snapshot
    Summarize {
        #[arg(value_name = "SNAPSHOT_CSV")]
        snapshot: PathBuf,
    },
}

const ALL_MONTHS: [u32; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/tlc_extract.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("tlc_extract.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Metadata {
            selection,
            upload_bucket,
            gzip,
        } => {
            extract_metadata(&settings, &selection, upload_bucket, gzip).await?;
        }
        Commands::Trips {
            selection,
            normalize,
        } => {
            extract_trips(&settings, &selection, normalize).await?;
        }
        Commands::Sample {
            selection,
            sample_size,
            format,
        } => {
            sample_trips(&settings, &selection, sample_size, format).await?;
        }
        Commands::Zones => {
            let client = BasicClient::with_connect_timeout(settings.connect_timeout)?;
            extract_zones(
                &client,
                &settings.zone_lookup_url(),
                &settings.zones_archive_url(),
                &settings.zones_dir(),
                settings.request_timeout,
            )
            .await?;
        }
        Commands::Summarize { snapshot } => {
            let records = read_snapshot(&snapshot)?;
            let summary = summarize(&records);

            for group in &summary.groups {
                info!(
                    record_type = %group.record_type,
                    year = group.year,
                    files = group.files,
                    rows = group.rows,
                    bytes = group.bytes,
                    avg_row_bytes = group.avg_row_bytes,
                    "Group"
                );
            }
            info!(
                files = summary.files,
                total_rows = summary.total_rows,
                total_bytes = summary.total_bytes,
                total_gbs = summary.total_gbs,
                "Snapshot summary"
            );
        }
    }

    Ok(())
}

/// Lists, inspects and persists the metadata of every selected trip file,
/// then optionally uploads the snapshot.
#[tracing::instrument(skip_all, fields(source = %selection.source))]
async fn extract_metadata(
    settings: &Settings,
    selection: &Selection,
    upload_bucket: Option<String>,
    gzip: bool,
) -> Result<()> {
    let filter = selection.filter(&ALL_MONTHS)?;
    let source = build_source(selection.source, settings, selection.local_dir.clone()).await?;

    let files = list_trip_files(source.as_ref(), &filter).await?;
    if files.is_empty() {
        info!("No trip files match the selection");
    }

    let records = inspect_all(
        source,
        files,
        MirrorUrls::from_settings(settings),
        selection.concurrency(),
    )
    .await?;

    let snapshot = Snapshot::new(Utc::now().date_naive(), selection.source, filter, records);
    let persisted = snapshot.persist(&settings.metadata_dir())?;

    match upload_bucket {
        Some(bucket) => {
            info!(bucket = %bucket, gzip, "S3 upload enabled");
            let client = s3_client(settings).await;
            upload_snapshot(&client, &bucket, &persisted, gzip).await?;
        }
        None => info!("S3 bucket not specified, skipping upload"),
    }

    Ok(())
}

/// Downloads every selected trip file that is missing or outdated locally.
#[tracing::instrument(skip_all, fields(source = %selection.source, normalize = normalize))]
async fn extract_trips(settings: &Settings, selection: &Selection, normalize: bool) -> Result<()> {
    let filter = selection.filter(&[1])?;
    let source = build_source(selection.source, settings, selection.local_dir.clone()).await?;

    let files = list_trip_files(source.as_ref(), &filter).await?;
    let normalized_dir = normalize.then(|| settings.normalized_trips_dir());

    let outcomes = download_all(
        source,
        files,
        settings.trips_dir(),
        normalized_dir,
        selection.concurrency(),
    )
    .await?;

    info!(files = outcomes.len(), "Trips data ready");
    Ok(())
}

/// Downloads each selected trip file when needed and writes a random sample of
/// its rows.
#[tracing::instrument(skip_all, fields(source = %selection.source, sample_size = sample_size))]
async fn sample_trips(
    settings: &Settings,
    selection: &Selection,
    sample_size: usize,
    format: SampleFormat,
) -> Result<()> {
    let filter = selection.filter(&[1])?;
    let source = build_source(selection.source, settings, selection.local_dir.clone()).await?;

    let files = list_trip_files(source.as_ref(), &filter).await?;
    let outcomes = sample_all(
        source,
        files,
        settings.trips_dir(),
        settings.sample_trips_dir(),
        sample_size,
        format,
        selection.concurrency(),
    )
    .await?;

    info!(files = outcomes.len(), "Trips samples ready");
    Ok(())
}
