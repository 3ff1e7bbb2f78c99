//! Schema normalization of trip files: snake_case column names and
//! consistent column types across years and record types.

use anyhow::{Context, Result};
use arrow::array::ArrayRef;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::fetch::PartFile;

/// Columns stored as floats in some years that hold whole numbers only.
const INTEGER_COLUMNS: &[&str] = &[
    "vendor_id",
    "passenger_count",
    "ratecode_id",
    "payment_type",
    "trip_type",
    "pu_location_id",
    "do_location_id",
];

/// Vendor prefixes on yellow (`tpep_`) and green (`lpep_`) datetime columns.
const VENDOR_PREFIXES: &[&str] = &["tpep_", "lpep_"];

/// Converts a source column name to its normalized snake_case form.
///
/// `VendorID` → `vendor_id`, `PULocationID` → `pu_location_id`,
/// `tpep_pickup_datetime` → `pickup_datetime`, `Airport_fee` → `airport_fee`.
pub fn normalize_column_name(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    let stripped = VENDOR_PREFIXES
        .iter()
        .find(|p| lowered.starts_with(*p))
        .map_or(name, |p| &name[p.len()..]);

    let chars: Vec<char> = stripped.chars().collect();
    let mut out = String::with_capacity(stripped.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let boundary = prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }

    out
}

/// Target type of a normalized column.
fn normalized_type(name: &str, data_type: &DataType) -> DataType {
    match data_type {
        DataType::Timestamp(_, _) => DataType::Timestamp(TimeUnit::Microsecond, None),
        DataType::Float32 | DataType::Float64 if INTEGER_COLUMNS.contains(&name) => DataType::Int64,
        DataType::Int8 | DataType::Int16 | DataType::Int32 if INTEGER_COLUMNS.contains(&name) => {
            DataType::Int64
        }
        DataType::LargeUtf8 | DataType::Utf8View => DataType::Utf8,
        other => other.clone(),
    }
}

/// Renames and retypes every field of `schema`.
pub fn normalize_schema(schema: &Schema) -> SchemaRef {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| {
            let name = normalize_column_name(field.name());
            let data_type = normalized_type(&name, field.data_type());
            Field::new(name, data_type, field.is_nullable())
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Casts the columns of `batch` to `schema`, which must come from
/// [`normalize_schema`] of the batch's own schema.
pub fn normalize_batch(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = batch
        .columns()
        .iter()
        .zip(schema.fields().iter())
        .map(|(column, field)| {
            if column.data_type() == field.data_type() {
                Ok(column.clone())
            } else {
                cast(column, field.data_type())
                    .with_context(|| format!("casting column {} to {}", field.name(), field.data_type()))
            }
        })
        .collect::<Result<_>>()?;

    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}

/// Writes a normalized, Snappy-compressed copy of the parquet file `src` to
/// `dst`. Returns the number of rows written.
pub fn normalize_file(src: &Path, dst: &Path) -> Result<usize> {
    let input = File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(input)
        .with_context(|| format!("reading parquet schema of {}", src.display()))?;
    let schema = normalize_schema(builder.schema());
    let reader = builder.build()?;

    let part = PartFile::new(dst);
    let output =
        File::create(part.path()).with_context(|| format!("creating {}", part.path().display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(output, schema.clone(), Some(props))
        .context("creating Arrow writer for normalized trips")?;

    let mut rows = 0usize;
    for batch in reader {
        let batch = batch.with_context(|| format!("reading {}", src.display()))?;
        let normalized = normalize_batch(&batch, &schema)?;
        rows += normalized.num_rows();
        writer.write(&normalized)?;
    }
    writer.close()?;

    part.commit()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::part_path;
    use arrow::array::{Array, Float64Array, Int64Array, TimestampNanosecondArray};

    #[test]
    fn test_normalize_column_names() {
        let cases = [
            ("VendorID", "vendor_id"),
            ("tpep_pickup_datetime", "pickup_datetime"),
            ("lpep_dropoff_datetime", "dropoff_datetime"),
            ("RatecodeID", "ratecode_id"),
            ("PULocationID", "pu_location_id"),
            ("DOLocationID", "do_location_id"),
            ("Airport_fee", "airport_fee"),
            ("SR_Flag", "sr_flag"),
            ("dispatching_base_num", "dispatching_base_num"),
            ("Affiliated_base_number", "affiliated_base_number"),
            ("dropOff_datetime", "drop_off_datetime"),
            ("hvfhs_license_num", "hvfhs_license_num"),
        ];
        for (input, expected) in cases {
            assert_eq!(normalize_column_name(input), expected, "for {input}");
        }
    }

    fn trip_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("VendorID", DataType::Int32, true),
            Field::new(
                "tpep_pickup_datetime",
                DataType::Timestamp(TimeUnit::Nanosecond, None),
                true,
            ),
            Field::new("passenger_count", DataType::Float64, true),
            Field::new("fare_amount", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(arrow::array::Int32Array::from(vec![Some(1), Some(2), None])),
                Arc::new(TimestampNanosecondArray::from(vec![
                    Some(1_672_531_200_000_000_000),
                    Some(1_672_531_260_000_000_000),
                    None,
                ])),
                Arc::new(Float64Array::from(vec![Some(1.0), None, Some(3.0)])),
                Arc::new(Float64Array::from(vec![Some(12.5), Some(7.0), Some(30.25)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_batch_renames_and_casts() {
        let batch = trip_batch();
        let schema = normalize_schema(&batch.schema());
        let normalized = normalize_batch(&batch, &schema).unwrap();

        let names: Vec<_> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec!["vendor_id", "pickup_datetime", "passenger_count", "fare_amount"]
        );
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(
            schema.field(1).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        assert_eq!(schema.field(2).data_type(), &DataType::Int64);
        assert_eq!(schema.field(3).data_type(), &DataType::Float64);

        let passengers = normalized
            .column(2)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(passengers.value(0), 1);
        assert!(passengers.is_null(1));
        assert_eq!(passengers.value(2), 3);
        assert_eq!(normalized.num_rows(), 3);
    }

    #[test]
    fn test_normalize_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("yellow_tripdata_2023-01.parquet");
        let dst = dir.path().join("normalized.parquet");

        let batch = trip_batch();
        let mut writer = ArrowWriter::try_new(File::create(&src).unwrap(), batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let rows = normalize_file(&src, &dst).unwrap();
        assert_eq!(rows, 3);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&dst).unwrap()).unwrap();
        let schema = reader.schema().clone();
        assert_eq!(schema.field(0).name(), "vendor_id");
        assert_eq!(schema.field(1).name(), "pickup_datetime");
        assert!(!part_path(&dst).exists());
    }
}
