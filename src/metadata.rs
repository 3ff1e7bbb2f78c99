//! Per-file metadata record written to the snapshot CSV.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::config::Settings;
use crate::parquet_footer::FooterSummary;
use crate::services::trip_source::ObjectInfo;
use crate::trip_file::{RecordType, TripFile};

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Base URLs under which every trip file is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorUrls {
    /// e.g. `s3://nyc-tlc/trip data`
    pub s3_base: String,
    /// e.g. `https://d37ci6vzurychx.cloudfront.net/trip-data`
    pub cloudfront_base: String,
}

impl MirrorUrls {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            s3_base: format!(
                "s3://{}/{}",
                settings.s3_bucket,
                settings.s3_prefix.trim_end_matches('/')
            ),
            cloudfront_base: settings.trip_data_base_url(),
        }
    }
}

/// One snapshot row. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadataRecord {
    pub file_name: String,
    pub file_s3_url: String,
    pub file_cloudfront_url: String,
    pub file_record_type: RecordType,
    pub file_year: i32,
    pub file_month: u32,
    pub file_modification_time: Option<DateTime<Utc>>,
    pub file_num_rows: i64,
    pub file_num_columns: usize,
    #[serde(
        serialize_with = "serialize_column_names",
        deserialize_with = "deserialize_column_names"
    )]
    pub file_column_names: Vec<String>,
    pub file_size_bytes: u64,
    pub file_size_mbs: f64,
    pub file_size_gbs: f64,
}

impl FileMetadataRecord {
    pub fn new(file: &TripFile, info: ObjectInfo, footer: FooterSummary, mirrors: &MirrorUrls) -> Self {
        let (mbs, gbs) = size_units(info.size);
        Self {
            file_name: file.name.clone(),
            file_s3_url: format!("{}/{}", mirrors.s3_base, file.name),
            file_cloudfront_url: format!("{}/{}", mirrors.cloudfront_base, file.name),
            file_record_type: file.record_type,
            file_year: file.year,
            file_month: file.month,
            file_modification_time: info.modified,
            file_num_rows: footer.num_rows,
            file_num_columns: footer.num_columns,
            file_column_names: footer.column_names,
            file_size_bytes: info.size,
            file_size_mbs: mbs,
            file_size_gbs: gbs,
        }
    }
}

/// Converts a byte count into (MiB, GiB).
pub fn size_units(bytes: u64) -> (f64, f64) {
    let bytes = bytes as f64;
    (bytes / BYTES_PER_MB, bytes / BYTES_PER_GB)
}

fn serialize_column_names<S: Serializer>(names: &[String], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&names.join(","))
}

fn deserialize_column_names<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let joined = String::deserialize(deserializer)?;
    if joined.is_empty() {
        return Ok(Vec::new());
    }
    Ok(joined.split(',').map(str::to_string).collect())
}
