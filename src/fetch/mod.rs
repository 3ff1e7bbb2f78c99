//! HTTP plumbing shared by the web source and the zones fetcher.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderName,
    HeaderValue, LAST_MODIFIED, RANGE,
};
use reqwest::{Method, Request};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::services::trip_source::ObjectInfo;

fn request(method: Method, url: &str, timeout: Option<Duration>) -> Result<Request> {
    let mut req = Request::new(method, url.parse().with_context(|| format!("invalid url '{url}'"))?);
    *req.timeout_mut() = timeout;
    Ok(req)
}

/// Fetches a page body as text.
pub async fn fetch_text<C: HttpClient>(client: &C, url: &str, timeout: Duration) -> Result<String> {
    let req = request(Method::GET, url, Some(timeout))?;
    let resp = client
        .execute_ok(req)
        .await
        .with_context(|| format!("GET {url} failed"))?;
    Ok(resp.text().await?)
}

/// Fetches `range` (end exclusive) of the resource at `url`.
pub async fn fetch_range<C: HttpClient>(
    client: &C,
    url: &str,
    range: Range<u64>,
    timeout: Duration,
) -> Result<Bytes> {
    anyhow::ensure!(range.start < range.end, "empty byte range for {url}");

    let mut req = request(Method::GET, url, Some(timeout))?;
    let value = format!("bytes={}-{}", range.start, range.end - 1);
    req.headers_mut().insert(RANGE, HeaderValue::from_str(&value)?);
    req.headers_mut()
        .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let resp = client
        .execute_ok(req)
        .await
        .with_context(|| format!("ranged GET {url} failed"))?;
    let ranged = resp.status() == reqwest::StatusCode::PARTIAL_CONTENT;
    let body = resp.bytes().await?;

    if ranged {
        return Ok(body);
    }
    // server ignored the range and sent the whole body
    let (start, end) = (range.start as usize, range.end as usize);
    anyhow::ensure!(end <= body.len(), "{url} is shorter than requested range");
    Ok(body.slice(start..end))
}

/// Size and modification time from response headers.
///
/// `Content-Length` is only trusted when the body is not re-encoded, since a
/// compressed response reports the compressed length. `Content-Range` is used
/// otherwise (`bytes 0-0/12345`).
pub fn object_info_from_headers(headers: &HeaderMap) -> (Option<u64>, Option<DateTime<Utc>>) {
    let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

    let identity = match header(CONTENT_ENCODING) {
        None => true,
        Some(enc) => enc.is_empty() || enc.eq_ignore_ascii_case("identity"),
    };

    let from_range = header(CONTENT_RANGE)
        .and_then(|r| r.rsplit('/').next())
        .and_then(|total| total.trim().parse::<u64>().ok());

    let size = if from_range.is_some() {
        from_range
    } else if identity {
        header(CONTENT_LENGTH).and_then(|l| l.trim().parse::<u64>().ok())
    } else {
        None
    };

    let modified = header(LAST_MODIFIED)
        .and_then(|m| DateTime::parse_from_rfc2822(m.trim()).ok())
        .map(|m| m.with_timezone(&Utc));

    (size, modified)
}

/// Retrieves size and last-modified for `url`.
///
/// Tries HEAD first; if that yields no size, falls back to a GET of the first
/// byte and reads the total from `Content-Range`.
pub async fn fetch_object_info<C: HttpClient>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<ObjectInfo> {
    let mut modified = None;

    let mut head = request(Method::HEAD, url, Some(timeout))?;
    head.headers_mut()
        .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    match client.execute_ok(head).await {
        Ok(resp) => {
            let (size, mtime) = object_info_from_headers(resp.headers());
            modified = mtime;
            if let Some(size) = size {
                return Ok(ObjectInfo { size, modified });
            }
            debug!(url, "HEAD response carried no size, retrying with GET");
        }
        Err(e) => debug!(url, error = %e, "HEAD failed, retrying with GET"),
    }

    let mut get = request(Method::GET, url, Some(timeout))?;
    get.headers_mut()
        .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    get.headers_mut()
        .insert(RANGE, HeaderValue::from_static("bytes=0-0"));
    let resp = client
        .execute_ok(get)
        .await
        .with_context(|| format!("GET {url} failed"))?;

    let (size, mtime) = object_info_from_headers(resp.headers());
    let size = size.with_context(|| format!("{url} did not report its size"))?;
    Ok(ObjectInfo {
        size,
        modified: mtime.or(modified),
    })
}

/// Temporary sibling a download is written to before being renamed to `dest`.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Removes the `.part` file of an unfinished write when dropped, including
/// when the owning task is aborted. Call [`PartFile::commit`] once the
/// content is complete.
#[derive(Debug)]
pub struct PartFile {
    part: PathBuf,
    dest: PathBuf,
    done: bool,
}

impl PartFile {
    pub fn new(dest: &Path) -> Self {
        Self {
            part: part_path(dest),
            dest: dest.to_path_buf(),
            done: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.part
    }

    /// Moves the finished part file into place.
    pub fn commit(mut self) -> Result<()> {
        std::fs::rename(&self.part, &self.dest)
            .with_context(|| format!("moving {} into {}", self.part.display(), self.dest.display()))?;
        self.done = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.done && self.part.exists() {
            if let Err(e) = std::fs::remove_file(&self.part) {
                debug!(path = %self.part.display(), error = %e, "Could not remove part file");
            }
        }
    }
}

/// `Last-Modified` of `url` from a HEAD request alone.
pub async fn fetch_last_modified<C: HttpClient>(
    client: &C,
    url: &str,
    timeout: Duration,
) -> Result<Option<DateTime<Utc>>> {
    let mut head = request(Method::HEAD, url, Some(timeout))?;
    head.headers_mut()
        .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    let resp = client
        .execute_ok(head)
        .await
        .with_context(|| format!("HEAD {url} failed"))?;
    Ok(object_info_from_headers(resp.headers()).1)
}

/// Streams the body at `url` into `dest`, via a `.part` file renamed on success.
pub async fn download_to<C: HttpClient>(client: &C, url: &str, dest: &Path) -> Result<u64> {
    let req = request(Method::GET, url, None)?;
    let mut resp = client
        .execute_ok(req)
        .await
        .with_context(|| format!("GET {url} failed"))?;

    let part = PartFile::new(dest);
    let mut file = tokio::fs::File::create(part.path())
        .await
        .with_context(|| format!("creating {}", part.path().display()))?;

    let mut written = 0u64;
    while let Some(chunk) = resp.chunk().await.with_context(|| format!("reading body of {url}"))? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    part.commit()?;
    Ok(written)
}
