//! Parquet footer decoding from ranged reads.
//!
//! A Parquet file ends with `<metadata><u32 LE metadata length>PAR1`, so the
//! row count and schema can be read with two small range requests instead of
//! fetching the whole file.

use anyhow::{Context, Result, bail};
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};

/// Length of the fixed tail: 4-byte metadata length plus the `PAR1` magic.
pub const FOOTER_TAIL_LEN: u64 = 8;

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";

/// Row and column summary of a Parquet file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterSummary {
    pub num_rows: i64,
    pub num_columns: usize,
    pub column_names: Vec<String>,
}

/// Validates the 8-byte tail and returns the length of the metadata block.
///
/// # Errors
///
/// Returns an error if the tail is not exactly 8 bytes or lacks the magic.
pub fn metadata_len(tail: &[u8]) -> Result<u64> {
    if tail.len() as u64 != FOOTER_TAIL_LEN {
        bail!("parquet tail must be {FOOTER_TAIL_LEN} bytes, got {}", tail.len());
    }
    if &tail[4..] != PARQUET_MAGIC {
        bail!("missing PAR1 magic, not a parquet file");
    }
    let len = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    Ok(u64::from(len))
}

/// Byte range of the metadata block in a file of `file_size` bytes.
pub fn metadata_range(file_size: u64, metadata_len: u64) -> Result<std::ops::Range<u64>> {
    let footer_len = metadata_len + FOOTER_TAIL_LEN;
    // leading magic plus footer
    if file_size < footer_len + 4 {
        bail!("file of {file_size} bytes cannot hold a {metadata_len} byte footer");
    }
    let end = file_size - FOOTER_TAIL_LEN;
    Ok(end - metadata_len..end)
}

/// Decodes a raw metadata block (without the 8-byte tail).
pub fn decode_metadata(block: &[u8]) -> Result<ParquetMetaData> {
    ParquetMetaDataReader::decode_metadata(block).context("decoding parquet footer")
}

/// Extracts row count, leaf column count and top-level column names.
pub fn summarize_metadata(metadata: &ParquetMetaData) -> FooterSummary {
    let file_metadata = metadata.file_metadata();
    let schema = file_metadata.schema_descr();
    let column_names = schema
        .root_schema()
        .get_fields()
        .iter()
        .map(|field| field.name().to_string())
        .collect();

    FooterSummary {
        num_rows: file_metadata.num_rows(),
        num_columns: schema.num_columns(),
        column_names,
    }
}

/// Reads the footer summary from a complete in-memory file.
pub fn summarize_bytes(file: &[u8]) -> Result<FooterSummary> {
    let size = file.len() as u64;
    if size < FOOTER_TAIL_LEN {
        bail!("file of {size} bytes is too short for parquet");
    }
    let len = metadata_len(&file[(size - FOOTER_TAIL_LEN) as usize..])?;
    let range = metadata_range(size, len)?;
    let metadata = decode_metadata(&file[range.start as usize..range.end as usize])?;
    Ok(summarize_metadata(&metadata))
}
