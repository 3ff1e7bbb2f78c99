use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::ops::Range;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::Settings;
use crate::fetch::PartFile;
use crate::services::trip_source::{ListedFile, ObjectInfo, TripSource};
use crate::trip_file::SourceKind;

/// Builds an S3 client for `settings`.
///
/// Requests are unsigned when no `AWS_ACCESS_KEY_ID` is set, since the TLC
/// bucket is public.
pub async fn s3_client(settings: &Settings) -> aws_sdk_s3::Client {
    let timeouts = TimeoutConfig::builder()
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.request_timeout)
        .build();

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.aws_region.clone()))
        .timeout_config(timeouts);

    if std::env::var_os("AWS_ACCESS_KEY_ID").is_none() {
        debug!("No AWS credentials in environment, using unsigned requests");
        loader = loader.no_credentials();
    }

    let config = loader.load().await;
    aws_sdk_s3::Client::new(&config)
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Lists and reads trip files from an S3 bucket prefix.
pub struct S3Source {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Source {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl TripSource for S3Source {
    fn kind(&self) -> SourceKind {
        SourceKind::S3
    }

    #[tracing::instrument(skip(self), fields(bucket = %self.bucket, prefix = %self.prefix))]
    async fn list_files(&self) -> Result<Vec<ListedFile>> {
        info!("Listing bucket objects");

        let mut files = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.with_context(|| format!("listing s3://{}/{}", self.bucket, self.prefix))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                let name = key.rsplit('/').next().unwrap_or(key);
                if name.is_empty() {
                    continue;
                }
                files.push(ListedFile {
                    name: name.to_string(),
                    location: key.to_string(),
                });
            }
        }

        debug!(objects = files.len(), "Bucket listing complete");
        Ok(files)
    }

    async fn stat(&self, location: &str) -> Result<ObjectInfo> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(location)
            .send()
            .await
            .with_context(|| format!("HeadObject failed for s3://{}/{location}", self.bucket))?;

        let size = head
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .with_context(|| format!("s3://{}/{location} has no content length", self.bucket))?;

        Ok(ObjectInfo {
            size,
            modified: head.last_modified().and_then(to_chrono),
        })
    }

    async fn read_range(&self, location: &str, range: Range<u64>) -> Result<Bytes> {
        anyhow::ensure!(range.start < range.end, "empty byte range for {location}");

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(location)
            .range(format!("bytes={}-{}", range.start, range.end - 1))
            .send()
            .await
            .with_context(|| format!("ranged GetObject failed for s3://{}/{location}", self.bucket))?;

        Ok(object.body.collect().await?.into_bytes())
    }

    async fn download(&self, location: &str, dest: &Path) -> Result<u64> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(location)
            .send()
            .await
            .with_context(|| format!("GetObject failed for s3://{}/{location}", self.bucket))?;

        let part = PartFile::new(dest);
        let mut file = tokio::fs::File::create(part.path())
            .await
            .with_context(|| format!("creating {}", part.path().display()))?;

        let mut body = object.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .with_context(|| format!("reading s3://{}/{location}", self.bucket))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        part.commit()?;
        Ok(written)
    }
}
