use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::aggregator::snapshot::PersistedSnapshot;

/// Key prefix snapshots are uploaded under.
pub const SNAPSHOT_KEY_PREFIX: &str = "trips-metadata";

/// Object key for `path`, with a `.gz` suffix when compressed.
pub fn object_key(path: &Path, gzip: bool) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let suffix = if gzip { ".gz" } else { "" };
    Ok(format!("{SNAPSHOT_KEY_PREFIX}/{name}{suffix}"))
}

/// Gzip-compresses `data` with the default level.
pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Uploads a local file to `bucket`, optionally gzip-compressed.
pub async fn upload_file(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    path: &Path,
    content_type: &str,
    gzip: bool,
) -> Result<String> {
    let contents = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let body = if gzip { gzip_bytes(&contents)? } else { contents };
    let key = object_key(path, gzip)?;

    let mut request = client
        .put_object()
        .bucket(bucket)
        .key(&key)
        .body(ByteStream::from(body))
        .content_type(content_type);
    if gzip {
        request = request.content_encoding("gzip");
    }
    request
        .send()
        .await
        .with_context(|| format!("uploading s3://{bucket}/{key}"))?;

    Ok(key)
}

/// Uploads the snapshot CSV and its JSON summary.
#[tracing::instrument(skip(client, snapshot))]
pub async fn upload_snapshot(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    snapshot: &PersistedSnapshot,
    gzip: bool,
) -> Result<()> {
    let csv_key = upload_file(client, bucket, &snapshot.csv_path, "text/csv", gzip).await?;
    let summary_key =
        upload_file(client, bucket, &snapshot.summary_path, "application/json", gzip).await?;

    info!(csv_key, summary_key, "S3 upload complete");
    Ok(())
}
