//! Full trip file downloads, skipping files that are already up to date.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, info};

use crate::normalize::normalize_file;
use crate::services::trip_source::TripSource;
use crate::trip_file::TripFile;

/// What is known about the local copy of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Missing,
    Present(Option<DateTime<Utc>>),
}

/// What a download run did with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadAction {
    /// No local copy existed.
    Fetch,
    /// The remote copy is newer than the local one.
    Update,
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub name: String,
    pub path: PathBuf,
    pub action: DownloadAction,
    pub bytes: u64,
    pub normalized: Option<PathBuf>,
}

/// Reads the modification time of `path`, if it exists.
pub fn local_state(path: &Path) -> Result<LocalState> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(LocalState::Present(meta.modified().ok().map(DateTime::<Utc>::from))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalState::Missing),
        Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
    }
}

/// Decides whether to (re)download. A present file is only replaced when both
/// timestamps are known and the remote one is newer.
pub fn download_action(local: LocalState, remote: Option<DateTime<Utc>>) -> DownloadAction {
    match (local, remote) {
        (LocalState::Missing, _) => DownloadAction::Fetch,
        (LocalState::Present(Some(local)), Some(remote)) if local < remote => DownloadAction::Update,
        (LocalState::Present(_), _) => DownloadAction::UpToDate,
    }
}

/// Downloads one trip file into `dest_dir` when needed, then optionally
/// writes a normalized copy into `normalized_dir`.
pub async fn download_trip_file(
    source: &dyn TripSource,
    file: &TripFile,
    dest_dir: &Path,
    normalized_dir: Option<&Path>,
) -> Result<DownloadOutcome> {
    let dest = dest_dir.join(&file.name);
    let local = local_state(&dest)?;
    let remote = source
        .stat(&file.location)
        .await
        .with_context(|| format!("reading file info of {}", file.name))?;

    let action = download_action(local, remote.modified);
    let bytes = match action {
        DownloadAction::Fetch | DownloadAction::Update => {
            if action == DownloadAction::Fetch {
                info!("{} does not exist. Downloading", file.name);
            } else {
                info!("{} already exists. Updating", file.name);
            }
            let written = source
                .download(&file.location, &dest)
                .await
                .with_context(|| format!("downloading {}", file.name))?;
            info!(bytes = written, "Downloading {} finished", file.name);
            written
        }
        DownloadAction::UpToDate => {
            info!("{} is up to date", file.name);
            0
        }
    };

    let normalized = match normalized_dir {
        Some(dir) => {
            let target = dir.join(&file.name);
            let stale = action != DownloadAction::UpToDate || !target.exists();
            if stale {
                let src = dest.clone();
                let dst = target.clone();
                let rows = tokio::task::spawn_blocking(move || normalize_file(&src, &dst))
                    .await
                    .context("normalization task panicked")?
                    .with_context(|| format!("normalizing {}", file.name))?;
                info!(rows, path = %target.display(), "Normalized copy written");
            }
            Some(target)
        }
        None => None,
    };

    Ok(DownloadOutcome {
        name: file.name.clone(),
        path: dest,
        action,
        bytes,
        normalized,
    })
}

/// Downloads `files` on a pool of at most `concurrency` tasks.
///
/// Any failure aborts the outstanding downloads and fails the run.
#[tracing::instrument(skip_all, fields(files = files.len(), concurrency = concurrency))]
pub async fn download_all(
    source: Arc<dyn TripSource>,
    files: Vec<TripFile>,
    dest_dir: PathBuf,
    normalized_dir: Option<PathBuf>,
    concurrency: usize,
) -> Result<Vec<DownloadOutcome>> {
    info!("Extracting trips data");

    tokio::fs::create_dir_all(&dest_dir)
        .await
        .with_context(|| format!("creating {}", dest_dir.display()))?;
    if let Some(dir) = &normalized_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let dest_dir = Arc::new(dest_dir);
    let normalized_dir = Arc::new(normalized_dir);
    let mut tasks = Vec::with_capacity(files.len());

    for file in files {
        let sem = semaphore.clone();
        let source = source.clone();
        let dest_dir = dest_dir.clone();
        let normalized_dir = normalized_dir.clone();
        let span = tracing::info_span!("download_trip_file", file = %file.name);

        tasks.push(tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                download_trip_file(
                    source.as_ref(),
                    &file,
                    &dest_dir,
                    normalized_dir.as_deref(),
                )
                .await
            }
            .instrument(span),
        ));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut pending = tasks.into_iter();
    while let Some(task) = pending.next() {
        let outcome = match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("download task panicked")),
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

    let fetched = outcomes
        .iter()
        .filter(|o| o.action != DownloadAction::UpToDate)
        .count();
    info!(
        files = outcomes.len(),
        fetched,
        "Extracting trips data finished"
    );
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::LocalSource;
    use crate::parquet_footer::tests::sample_parquet;
    use chrono::{Duration, TimeZone};
    use std::fs;

    #[test]
    fn test_download_action() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let later = t + Duration::days(30);

        assert_eq!(download_action(LocalState::Missing, None), DownloadAction::Fetch);
        assert_eq!(download_action(LocalState::Missing, Some(t)), DownloadAction::Fetch);
        assert_eq!(
            download_action(LocalState::Present(Some(t)), Some(later)),
            DownloadAction::Update
        );
        assert_eq!(
            download_action(LocalState::Present(Some(later)), Some(t)),
            DownloadAction::UpToDate
        );
        assert_eq!(
            download_action(LocalState::Present(Some(t)), Some(t)),
            DownloadAction::UpToDate
        );
        assert_eq!(
            download_action(LocalState::Present(None), Some(later)),
            DownloadAction::UpToDate
        );
        assert_eq!(
            download_action(LocalState::Present(Some(t)), None),
            DownloadAction::UpToDate
        );
    }

    #[test]
    fn test_local_state_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            local_state(&dir.path().join("absent.parquet")).unwrap(),
            LocalState::Missing
        );
    }

    #[tokio::test]
    async fn test_download_all_fetches_then_skips() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let name = "yellow_tripdata_2023-01.parquet";
        let remote_path = remote.path().join(name);
        fs::write(&remote_path, sample_parquet(12)).unwrap();

        let file = TripFile::from_listing(name, &remote_path.display().to_string()).unwrap();
        let source: Arc<dyn TripSource> = Arc::new(LocalSource::new(remote.path()));
        let dest = local.path().join("trips-data");
        let normalized = local.path().join("trips-data-normalized");

        let first = download_all(
            source.clone(),
            vec![file.clone()],
            dest.clone(),
            Some(normalized.clone()),
            2,
        )
        .await
        .unwrap();
        assert_eq!(first[0].action, DownloadAction::Fetch);
        assert!(dest.join(name).exists());
        assert!(normalized.join(name).exists());

        let second = download_all(source, vec![file], dest.clone(), None, 2)
            .await
            .unwrap();
        assert_eq!(second[0].action, DownloadAction::UpToDate);
        assert_eq!(second[0].bytes, 0);
    }
}
