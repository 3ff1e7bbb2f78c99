//! Trait and types for reading trip files from a remote or local store.

use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::ops::Range;
use std::path::Path;

use crate::trip_file::SourceKind;

/// An entry returned by [`TripSource::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    /// Bare file name, e.g. `yellow_tripdata_2024-01.parquet`.
    pub name: String,
    /// Where the source finds it again: URL, object key or path.
    pub location: String,
}

/// Size and modification time of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Abstraction over a trip file store (TLC website, S3 bucket, local disk).
///
/// Every method takes the `location` produced by `list_files`.
#[async_trait::async_trait]
pub trait TripSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Returns every file the store exposes, unfiltered.
    async fn list_files(&self) -> Result<Vec<ListedFile>>;

    async fn stat(&self, location: &str) -> Result<ObjectInfo>;

    /// Reads `range` (end exclusive) of the file.
    async fn read_range(&self, location: &str, range: Range<u64>) -> Result<Bytes>;

    /// Copies the whole file to `dest`, returning the bytes written.
    async fn download(&self, location: &str, dest: &Path) -> Result<u64>;
}
