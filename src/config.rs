//! Runtime settings read from the environment (after `.env` is loaded).

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_WEB_URL: &str = "https://www.nyc.gov/site/tlc/about/tlc-trip-record-data.page";
pub const DEFAULT_CLOUDFRONT_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net";
pub const DEFAULT_S3_BUCKET: &str = "nyc-tlc";
pub const DEFAULT_S3_PREFIX: &str = "trip data/";
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Paths, endpoints and timeouts shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub web_url: String,
    pub cloudfront_base_url: String,
    pub s3_bucket: String,
    pub s3_prefix: String,
    pub aws_region: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            web_url: DEFAULT_WEB_URL.to_string(),
            cloudfront_base_url: DEFAULT_CLOUDFRONT_BASE_URL.to_string(),
            s3_bucket: DEFAULT_S3_BUCKET.to_string(),
            s3_prefix: DEFAULT_S3_PREFIX.to_string(),
            aws_region: DEFAULT_AWS_REGION.to_string(),
            request_timeout: Duration::from_secs(6),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

impl Settings {
    /// Reads settings from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup, falling back to defaults
    /// for unset or empty keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match get(key) {
                Some(raw) => {
                    let secs: u64 = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("{key} must be a whole number of seconds, got '{raw}'"))?;
                    Ok(Duration::from_secs(secs))
                }
                None => Ok(default),
            }
        };

        Ok(Self {
            data_dir: get("TLC_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            web_url: get("TLC_WEB_URL").unwrap_or(defaults.web_url),
            cloudfront_base_url: get("TLC_CLOUDFRONT_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.cloudfront_base_url),
            s3_bucket: get("TLC_S3_BUCKET").unwrap_or(defaults.s3_bucket),
            s3_prefix: get("TLC_S3_PREFIX").unwrap_or(defaults.s3_prefix),
            aws_region: get("AWS_REGION").unwrap_or(defaults.aws_region),
            request_timeout: secs("TLC_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            connect_timeout: secs("TLC_CONNECT_TIMEOUT_SECS", defaults.connect_timeout)?,
        })
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.data_dir.join("trips-metadata")
    }

    pub fn trips_dir(&self) -> PathBuf {
        self.data_dir.join("trips-data")
    }

    pub fn normalized_trips_dir(&self) -> PathBuf {
        self.data_dir.join("trips-data-normalized")
    }

    pub fn sample_trips_dir(&self) -> PathBuf {
        self.data_dir.join("trips-data-sample")
    }

    pub fn zones_dir(&self) -> PathBuf {
        self.data_dir.join("zones-data")
    }

    /// Base URL of the trip files mirror, e.g. `.../trip-data`.
    pub fn trip_data_base_url(&self) -> String {
        format!("{}/trip-data", self.cloudfront_base_url)
    }

    pub fn zone_lookup_url(&self) -> String {
        format!("{}/misc/taxi_zone_lookup.csv", self.cloudfront_base_url)
    }

    pub fn zones_archive_url(&self) -> String {
        format!("{}/misc/taxi_zones.zip", self.cloudfront_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("./data"));
        assert_eq!(settings.aws_region, "us-east-1");
        assert_eq!(settings.s3_prefix, "trip data/");
        assert_eq!(settings.request_timeout, Duration::from_secs(6));
        assert_eq!(settings.connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_overrides_and_empty_values() {
        let settings = Settings::from_lookup(lookup(&[
            ("TLC_DATA_DIR", "/tmp/tlc"),
            ("AWS_REGION", ""),
            ("TLC_CLOUDFRONT_BASE_URL", "http://localhost:9000/"),
            ("TLC_REQUEST_TIMEOUT_SECS", "20"),
        ]))
        .unwrap();

        assert_eq!(settings.metadata_dir(), PathBuf::from("/tmp/tlc/trips-metadata"));
        assert_eq!(
            settings.sample_trips_dir(),
            PathBuf::from("/tmp/tlc/trips-data-sample")
        );
        assert_eq!(settings.aws_region, "us-east-1");
        assert_eq!(settings.trip_data_base_url(), "http://localhost:9000/trip-data");
        assert_eq!(
            settings.zone_lookup_url(),
            "http://localhost:9000/misc/taxi_zone_lookup.csv"
        );
        assert_eq!(settings.request_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_invalid_timeout_is_an_error() {
        let result = Settings::from_lookup(lookup(&[("TLC_CONNECT_TIMEOUT_SECS", "soon")]));
        assert!(result.is_err());
    }
}
