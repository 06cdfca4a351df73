//! Parquet encoding for data files.

use std::io::Cursor;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;

use crate::error::Result;

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some(concat!("tidal-delta ", env!("CARGO_PKG_VERSION")).to_string()),
    };
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

/// Encodes `batches` as one snappy-compressed Parquet file.
///
/// # Errors
///
/// Returns an error if a batch does not match `schema` or the write fails.
pub fn encode_batches(schema: SchemaRef, batches: &[RecordBatch]) -> Result<Bytes> {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(writer_properties()))?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Decodes every batch of a Parquet file.
///
/// # Errors
///
/// Returns an error if `bytes` is not a readable Parquet file.
pub fn decode_batches(bytes: Bytes) -> Result<Vec<RecordBatch>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    #[test]
    fn test_encode_decode_preserves_rows() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap();

        let bytes = encode_batches(schema.clone(), &[batch.clone(), batch]).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");

        let decoded = decode_batches(bytes).unwrap();
        let rows: usize = decoded.iter().map(RecordBatch::num_rows).sum();
        assert_eq!(rows, 6);
        assert_eq!(decoded[0].schema().fields(), schema.fields());
        let nulls: usize = decoded.iter().map(|b| b.column(1).null_count()).sum();
        assert_eq!(nulls, 2);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_batches(Bytes::from_static(b"not parquet")).is_err());
    }
}
