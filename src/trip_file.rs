//! Trip file naming, record types and the selection filter.

use anyhow::{Result, bail};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// First year the TLC published trip records.
pub const FIRST_RECORD_YEAR: i32 = 2009;

/// Kind of trip record published by the TLC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Fhv,
    Fhvhv,
    Green,
    Yellow,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Fhv => "fhv",
            RecordType::Fhvhv => "fhvhv",
            RecordType::Green => "green",
            RecordType::Yellow => "yellow",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fhv" => Ok(RecordType::Fhv),
            "fhvhv" => Ok(RecordType::Fhvhv),
            "green" => Ok(RecordType::Green),
            "yellow" => Ok(RecordType::Yellow),
            other => bail!("unknown record type '{other}'"),
        }
    }
}

/// Where trip files are listed and read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// TLC trip-record web page, files served from CloudFront.
    Web,
    /// The public `nyc-tlc` S3 bucket.
    S3,
    /// A local directory of previously downloaded files.
    Local,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Web => "web",
            SourceKind::S3 => "s3",
            SourceKind::Local => "local",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trip file name split into its parts, e.g. `green_tripdata_2020-03.parquet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripFileName {
    pub record_type: RecordType,
    pub year: i32,
    pub month: u32,
}

impl FromStr for TripFileName {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split(['_', '.', '-']).collect();
        if parts.len() < 4 {
            bail!("'{name}' is not a trip file name");
        }

        let record_type: RecordType = parts[0].parse()?;
        let year: i32 = parts[2]
            .parse()
            .map_err(|_| anyhow::anyhow!("'{name}' has no valid year"))?;
        let month: u32 = parts[3]
            .parse()
            .map_err(|_| anyhow::anyhow!("'{name}' has no valid month"))?;

        if !(1..=12).contains(&month) {
            bail!("'{name}' has month {month} out of range");
        }

        Ok(Self {
            record_type,
            year,
            month,
        })
    }
}

/// A listed file together with where its source can find it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripFile {
    /// Bare file name, unique per listing.
    pub name: String,
    /// URL, object key or local path, depending on the source.
    pub location: String,
    pub record_type: RecordType,
    pub year: i32,
    pub month: u32,
}

impl TripFile {
    /// Parses `name`; returns `None` for anything that is not a trip file.
    pub fn from_listing(name: &str, location: &str) -> Option<Self> {
        let parsed: TripFileName = name.parse().ok()?;
        Some(Self {
            name: name.to_string(),
            location: location.to_string(),
            record_type: parsed.record_type,
            year: parsed.year,
            month: parsed.month,
        })
    }
}

/// Selects which trip files a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripFilter {
    pub record_types: BTreeSet<RecordType>,
    pub years: BTreeSet<i32>,
    pub months: BTreeSet<u32>,
}

impl TripFilter {
    /// Builds a filter, rejecting empty selections and out-of-range values.
    pub fn new(
        record_types: impl IntoIterator<Item = RecordType>,
        years: impl IntoIterator<Item = i32>,
        months: impl IntoIterator<Item = u32>,
    ) -> Result<Self> {
        let filter = Self {
            record_types: record_types.into_iter().collect(),
            years: years.into_iter().collect(),
            months: months.into_iter().collect(),
        };

        if filter.record_types.is_empty() || filter.years.is_empty() || filter.months.is_empty() {
            bail!("filter needs at least one record type, year and month");
        }

        let current_year = Utc::now().year();
        if let Some(year) = filter
            .years
            .iter()
            .find(|y| !(FIRST_RECORD_YEAR..=current_year).contains(*y))
        {
            bail!("year {year} outside {FIRST_RECORD_YEAR}..={current_year}");
        }

        if let Some(month) = filter.months.iter().find(|m| !(1..=12).contains(*m)) {
            bail!("month {month} outside 1..=12");
        }

        Ok(filter)
    }

    pub fn allows(&self, file: &TripFile) -> bool {
        self.record_types.contains(&file.record_type)
            && self.years.contains(&file.year)
            && self.months.contains(&file.month)
    }

    /// `green-yellow` style label used in output file names.
    pub fn types_label(&self) -> String {
        self.record_types
            .iter()
            .map(RecordType::as_str)
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn years_label(&self) -> String {
        self.years
            .iter()
            .map(|y| y.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }
}
