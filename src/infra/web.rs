use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use scraper::{Html, Selector};
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::fetch::{self, BasicClient, HttpClient};
use crate::services::trip_source::{ListedFile, ObjectInfo, TripSource};
use crate::trip_file::SourceKind;

/// Links to trip files on the TLC trip-record page.
pub const FILE_LINK_SELECTOR: &str = "a[href*='trip-data']";

/// Lists trip files from the TLC web page and reads them from the CDN mirror.
pub struct WebSource<C = BasicClient> {
    client: C,
    page_url: String,
    timeout: Duration,
}

impl<C: HttpClient> WebSource<C> {
    pub fn new(client: C, page_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            page_url: page_url.into(),
            timeout,
        }
    }
}

/// Extracts trip file links from the trip-record page HTML.
///
/// Hrefs are trimmed (the page pads some with whitespace) and resolved
/// against `base`.
pub fn parse_file_links(html: &str, base: &Url) -> Result<Vec<ListedFile>> {
    let selector =
        Selector::parse(FILE_LINK_SELECTOR).map_err(|e| anyhow!("invalid link selector: {e:?}"))?;

    let files = Html::parse_document(html)
        .select(&selector)
        .filter_map(|e| e.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .filter_map(|href| base.join(href).ok())
        .filter_map(|url| {
            let name = url.path_segments()?.next_back()?.to_string();
            if name.is_empty() {
                return None;
            }
            Some(ListedFile {
                name,
                location: url.to_string(),
            })
        })
        .collect();

    Ok(files)
}

#[async_trait]
impl<C: HttpClient> TripSource for WebSource<C> {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    #[tracing::instrument(skip(self), fields(page = %self.page_url))]
    async fn list_files(&self) -> Result<Vec<ListedFile>> {
        info!("Requesting trip record page");
        let html = fetch::fetch_text(&self.client, &self.page_url, self.timeout).await?;
        let base = Url::parse(&self.page_url)
            .with_context(|| format!("invalid page url '{}'", self.page_url))?;

        let files = parse_file_links(&html, &base)?;
        debug!(links = files.len(), "Parsed trip file links");
        Ok(files)
    }

    async fn stat(&self, location: &str) -> Result<ObjectInfo> {
        fetch::fetch_object_info(&self.client, location, self.timeout).await
    }

    async fn read_range(&self, location: &str, range: Range<u64>) -> Result<Bytes> {
        fetch::fetch_range(&self.client, location, range, self.timeout).await
    }

    async fn download(&self, location: &str, dest: &Path) -> Result<u64> {
        fetch::download_to(&self.client, location, dest).await
    }
}
