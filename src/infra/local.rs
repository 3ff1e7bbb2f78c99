use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::fetch::PartFile;
use crate::services::trip_source::{ListedFile, ObjectInfo, TripSource};
use crate::trip_file::SourceKind;

/// Treats a directory of already downloaded files as a trip source.
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TripSource for LocalSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Local
    }

    async fn list_files(&self) -> Result<Vec<ListedFile>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading directory {}", self.root.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                files.push(ListedFile {
                    name: name.to_string(),
                    location: entry.path().display().to_string(),
                });
            }
        }

        Ok(files)
    }

    async fn stat(&self, location: &str) -> Result<ObjectInfo> {
        let meta = fs::metadata(location)
            .await
            .with_context(|| format!("stat {location}"))?;
        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
        Ok(ObjectInfo {
            size: meta.len(),
            modified,
        })
    }

    async fn read_range(&self, location: &str, range: Range<u64>) -> Result<Bytes> {
        anyhow::ensure!(range.start < range.end, "empty byte range for {location}");

        let mut file = fs::File::open(location)
            .await
            .with_context(|| format!("opening {location}"))?;
        file.seek(SeekFrom::Start(range.start)).await?;
        let mut buf = vec![0u8; (range.end - range.start) as usize];
        file.read_exact(&mut buf)
            .await
            .with_context(|| format!("reading {range:?} of {location}"))?;
        Ok(Bytes::from(buf))
    }

    async fn download(&self, location: &str, dest: &Path) -> Result<u64> {
        let part = PartFile::new(dest);
        let copied = fs::copy(location, part.path())
            .await
            .with_context(|| format!("copying {location} to {}", dest.display()))?;
        part.commit()?;
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::part_path;
    use std::fs;

    #[tokio::test]
    async fn test_list_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("green_tripdata_2020-01.parquet"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let source = LocalSource::new(dir.path());
        let files = source.list_files().await.unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "green_tripdata_2020-01.parquet");
    }

    #[tokio::test]
    async fn test_stat_and_read_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        fs::write(&path, b"0123456789").unwrap();
        let location = path.display().to_string();

        let source = LocalSource::new(dir.path());
        let info = source.stat(&location).await.unwrap();
        assert_eq!(info.size, 10);
        assert!(info.modified.is_some());

        let bytes = source.read_range(&location, 6..10).await.unwrap();
        assert_eq!(&bytes[..], b"6789");
        assert!(source.read_range(&location, 8..12).await.is_err());
    }

    #[tokio::test]
    async fn test_download_copies_file() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let src = remote.path().join("green_tripdata_2020-01.parquet");
        fs::write(&src, b"PAR1 body PAR1").unwrap();
        let dest = local.path().join("green_tripdata_2020-01.parquet");

        let source = LocalSource::new(remote.path());
        let copied = source
            .download(&src.display().to_string(), &dest)
            .await
            .unwrap();

        assert_eq!(copied, 14);
        assert_eq!(fs::read(&dest).unwrap(), b"PAR1 body PAR1");
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_download_of_missing_file_leaves_nothing() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let dest = local.path().join("absent.parquet");

        let source = LocalSource::new(remote.path());
        let missing = remote.path().join("absent.parquet").display().to_string();

        assert!(source.download(&missing, &dest).await.is_err());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }
}
