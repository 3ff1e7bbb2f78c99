//! Concrete [`TripSource`] implementations.
//!
//! [`WebSource`] scrapes the TLC trip-record page and reads files over HTTP.
//! [`S3Source`] lists and reads the public `nyc-tlc` bucket.
//! [`LocalSource`] serves a directory of downloaded files.

mod local;
mod s3;
mod web;

pub use local::LocalSource;
pub use s3::{S3Source, s3_client};
pub use web::{FILE_LINK_SELECTOR, WebSource, parse_file_links};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::fetch::BasicClient;
use crate::services::trip_source::TripSource;
use crate::trip_file::SourceKind;

/// Builds the source selected on the command line.
///
/// `local_dir` is only consulted for [`SourceKind::Local`] and defaults to the
/// trips download directory.
pub async fn build_source(
    kind: SourceKind,
    settings: &Settings,
    local_dir: Option<PathBuf>,
) -> Result<Arc<dyn TripSource>> {
    let source: Arc<dyn TripSource> = match kind {
        SourceKind::Web => {
            let client = BasicClient::with_connect_timeout(settings.connect_timeout)
                .context("building HTTP client")?;
            Arc::new(WebSource::new(client, &settings.web_url, settings.request_timeout))
        }
        SourceKind::S3 => {
            let client = s3_client(settings).await;
            Arc::new(S3Source::new(client, &settings.s3_bucket, &settings.s3_prefix))
        }
        SourceKind::Local => {
            let dir = local_dir.unwrap_or_else(|| settings.trips_dir());
            Arc::new(LocalSource::new(dir))
        }
    };
    Ok(source)
}
