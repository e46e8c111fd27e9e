//! Parquet codec for cached query results.
//!
//! Results are stored as a single gzip-compressed Parquet file per entry. The
//! Arrow schema travels inside the file metadata, so whatever shape the query
//! produced comes back unchanged.

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use costgate_core::{CoreError, CoreResult};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;

/// Parquet encoding configuration
#[derive(Debug, Clone)]
pub struct ParquetConfig {
    /// Compression algorithm (gzip, matching the `.parquet.gzip` suffix)
    pub compression: Compression,
    /// Row group size (default: 65,536)
    pub row_group_size: usize,
    /// Enable dictionary encoding (recommended for repeated values)
    pub enable_dictionary: bool,
}

impl Default for ParquetConfig {
    fn default() -> Self {
        Self {
            compression: Compression::GZIP(GzipLevel::default()),
            row_group_size: 65_536,
            enable_dictionary: true,
        }
    }
}

/// Encodes and decodes whole result tables.
#[derive(Debug, Clone, Default)]
pub struct ParquetCodec {
    config: ParquetConfig,
}

impl ParquetCodec {
    pub fn new(config: ParquetConfig) -> Self {
        Self { config }
    }

    /// Encode a table to Parquet bytes. No positional index column is added.
    pub fn encode(&self, batch: &RecordBatch) -> CoreResult<Bytes> {
        let props = WriterProperties::builder()
            .set_compression(self.config.compression)
            .set_max_row_group_size(self.config.row_group_size)
            .set_dictionary_enabled(self.config.enable_dictionary)
            .build();

        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))
            .map_err(|e| CoreError::Serialization(e.to_string()))?;

        writer
            .write(batch)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;

        writer
            .close()
            .map_err(|e| CoreError::Serialization(e.to_string()))?;

        Ok(Bytes::from(buffer))
    }

    /// Decode Parquet bytes back into one table.
    ///
    /// A file with a schema but no rows decodes to an empty table.
    pub fn decode(&self, data: Bytes) -> CoreResult<RecordBatch> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(data).map_err(|e| {
            CoreError::Deserialization(format!("Failed to create Parquet reader: {}", e))
        })?;
        let schema = builder.schema().clone();

        let reader = builder.build().map_err(|e| {
            CoreError::Deserialization(format!("Failed to build Parquet reader: {}", e))
        })?;

        let batches = reader
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CoreError::Deserialization(format!("Failed to read batch: {}", e)))?;

        concat_batches(&schema, &batches)
            .map_err(|e| CoreError::Deserialization(format!("Failed to merge batches: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn sample_batch(rows: i64) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("region", DataType::Utf8, true),
            Field::new("revenue", DataType::Float64, true),
        ]));
        let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows));
        let regions: ArrayRef = Arc::new(StringArray::from_iter(
            (0..rows).map(|i| if i % 3 == 0 { None } else { Some(format!("r{}", i % 4)) }),
        ));
        let revenue: ArrayRef = Arc::new(Float64Array::from_iter_values(
            (0..rows).map(|i| i as f64 * 1.5),
        ));
        RecordBatch::try_new(schema, vec![ids, regions, revenue]).unwrap()
    }

    #[test]
    fn test_encode_has_parquet_magic() {
        let codec = ParquetCodec::default();
        let bytes = codec.encode(&sample_batch(10)).unwrap();

        // Parquet header magic bytes: "PAR1"
        assert_eq!(&bytes[0..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }

    #[test]
    fn test_multiple_row_groups_merge_back() {
        let codec = ParquetCodec::new(ParquetConfig {
            row_group_size: 100,
            ..ParquetConfig::default()
        });
        let batch = sample_batch(1_000);

        let decoded = codec.decode(codec.encode(&batch).unwrap()).unwrap();

        assert_eq!(decoded.num_rows(), 1_000);
        assert_eq!(decoded, batch);
    }

    #[test]
    fn test_empty_table_decodes_empty() {
        let codec = ParquetCodec::default();
        let bytes = codec.encode(&sample_batch(0)).unwrap();

        let decoded = codec.decode(bytes).unwrap();
        assert_eq!(decoded.num_rows(), 0);
        assert_eq!(decoded.num_columns(), 3);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let codec = ParquetCodec::default();
        let result = codec.decode(Bytes::from_static(b"definitely not parquet"));
        assert!(matches!(result, Err(CoreError::Deserialization(_))));
    }
}
