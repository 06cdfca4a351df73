//! Partition layout.
//!
//! Partitioned data files live under one `col=value` directory per partition
//! column, nested in column order:
//!
//! ```text
//! year=2024/month=1/part-00000-<uuid>-c000.snappy.parquet
//! ```
//!
//! Values are escaped Hive-style (`/` becomes `%2F`); null values use
//! `__HIVE_DEFAULT_PARTITION__`. Partition columns are not stored in data
//! files; readers rebuild them from the `add` action's `partitionValues`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, StringArray, UInt32Array};
use arrow::compute::{cast_with_options, take, CastOptions};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;

use crate::actions::PartitionValueMap;
use crate::error::{DeltaError, Result};
use crate::schema::{file_schema, validate_partition_columns};

/// Directory name used for null partition values.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Ordered partition columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSpec {
    columns: Vec<String>,
}

impl PartitionSpec {
    /// Creates a spec; column order is directory nesting order.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::SchemaMismatch`] if a column is repeated or empty.
    pub fn new<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for column in columns {
            let column = column.into();
            if column.is_empty() {
                return Err(DeltaError::schema_mismatch("partition column name is empty"));
            }
            if out.contains(&column) {
                return Err(DeltaError::schema_mismatch(format!(
                    "partition column '{column}' listed twice"
                )));
            }
            out.push(column);
        }
        Ok(Self { columns: out })
    }

    /// An unpartitioned spec.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Partition columns in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns true if the spec has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Checks every column against `schema`.
    ///
    /// # Errors
    ///
    /// See [`validate_partition_columns`].
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        validate_partition_columns(schema, &self.columns)
    }
}

/// Partition values of one file, in spec order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartitionValues(Vec<(String, Option<String>)>);

impl PartitionValues {
    /// Creates values from `(column, value)` pairs.
    #[must_use]
    pub fn new(values: Vec<(String, Option<String>)>) -> Self {
        Self(values)
    }

    /// Returns the pairs in order.
    #[must_use]
    pub fn as_slice(&self) -> &[(String, Option<String>)] {
        &self.0
    }

    /// Returns the value of `column`; `Some(None)` means a null value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<Option<&str>> {
        self.0
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_deref())
    }

    /// Returns true for unpartitioned files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Relative directory of the file, without trailing slash. Nulls and
    /// empty strings map to the default partition.
    #[must_use]
    pub fn to_path(&self) -> String {
        let mut out = String::new();
        for (i, (column, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            out.push_str(&escape(column));
            out.push('=');
            match value.as_deref() {
                Some(v) if !v.is_empty() => out.push_str(&escape(v)),
                _ => out.push_str(NULL_PARTITION),
            }
        }
        out
    }

    /// Parses a `col=value/...` directory path.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::CorruptLog`] if a segment is not `col=value`.
    pub fn from_path(path: &str) -> Result<Self> {
        let mut values = Vec::new();
        for segment in path.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            let (column, value) = segment.split_once('=').ok_or_else(|| {
                DeltaError::corrupt_log(path, format!("segment '{segment}' is not col=value"))
            })?;
            let value = if value == NULL_PARTITION || value.is_empty() {
                None
            } else {
                Some(unescape(value))
            };
            values.push((unescape(column), value));
        }
        Ok(Self(values))
    }

    /// Log representation.
    #[must_use]
    pub fn to_map(&self) -> PartitionValueMap {
        self.0.iter().cloned().collect()
    }

    /// Rebuilds ordered values from the log representation.
    ///
    /// Columns absent from `map` are treated as null.
    #[must_use]
    pub fn from_map(map: &PartitionValueMap, columns: &[String]) -> Self {
        Self(
            columns
                .iter()
                .map(|c| (c.clone(), map.get(c).cloned().flatten()))
                .collect(),
        )
    }
}

fn needs_escape(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
        )
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if needs_escape(c) {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{b:02X}");
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    char::from(b).to_digit(16).and_then(|d| u8::try_from(d).ok())
}

/// String form of one partition cell; empty strings count as null.
fn cell_value(column: &dyn Array, row: usize) -> Result<Option<String>> {
    if column.is_null(row) {
        return Ok(None);
    }
    let value = array_value_to_string(column, row)?;
    Ok(if value.is_empty() { None } else { Some(value) })
}

/// Groups rows by partition values, first-seen order, dropping partition
/// columns from the returned batches.
///
/// An unpartitioned spec returns the whole batch under empty values; a
/// zero-row batch returns no groups.
///
/// # Errors
///
/// Returns an error if a partition column is missing or a take fails.
pub fn split_batch(
    batch: &RecordBatch,
    spec: &PartitionSpec,
) -> Result<Vec<(PartitionValues, RecordBatch)>> {
    if spec.is_empty() {
        if batch.num_rows() == 0 {
            return Ok(Vec::new());
        }
        return Ok(vec![(PartitionValues::default(), batch.clone())]);
    }

    let schema = batch.schema();
    spec.validate(&schema)?;
    let partition_arrays: Vec<&ArrayRef> = spec
        .columns()
        .iter()
        .map(|c| {
            batch
                .column_by_name(c)
                .ok_or_else(|| DeltaError::schema_mismatch(format!("column '{c}' missing")))
        })
        .collect::<Result<_>>()?;

    let mut index: HashMap<Vec<Option<String>>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Option<String>>, Vec<u32>)> = Vec::new();
    for row in 0..batch.num_rows() {
        let key = partition_arrays
            .iter()
            .map(|array| cell_value(array.as_ref(), row))
            .collect::<Result<Vec<_>>>()?;
        let row = u32::try_from(row)
            .map_err(|_| DeltaError::schema_mismatch("batch exceeds u32::MAX rows"))?;
        match index.get(&key) {
            Some(&slot) => groups[slot].1.push(row),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }

    let data_schema = file_schema(&schema, spec.columns());
    let data_columns: Vec<&ArrayRef> = data_schema
        .fields()
        .iter()
        .filter_map(|f| batch.column_by_name(f.name()))
        .collect();

    groups
        .into_iter()
        .map(|(key, rows)| {
            let indices = UInt32Array::from(rows);
            let columns = data_columns
                .iter()
                .map(|c| take(c.as_ref(), &indices, None))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let values = PartitionValues::new(spec.columns().iter().cloned().zip(key).collect());
            Ok((values, RecordBatch::try_new(data_schema.clone(), columns)?))
        })
        .collect()
}

/// Rebuilds a partition column of `rows` copies of `value`, typed as `field`.
///
/// The default partition holds nulls and empty strings alike. A non-nullable
/// column cannot have held a null, so its default partition reads back as the
/// empty string.
///
/// # Errors
///
/// Returns [`DeltaError::Arrow`] if `value` does not parse as the field type.
pub fn partition_column_array(field: &Field, value: Option<&str>, rows: usize) -> Result<ArrayRef> {
    let value = match value {
        Some(value) => value,
        None if field.is_nullable() => return Ok(new_null_array(field.data_type(), rows)),
        None => "",
    };
    let strings: ArrayRef = Arc::new(StringArray::from(vec![value; rows]));
    let options = CastOptions {
        safe: false,
        ..CastOptions::default()
    };
    Ok(cast_with_options(&strings, field.data_type(), &options)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, Int64Array};
    use arrow::datatypes::DataType;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("year", DataType::Int32, false),
            Field::new("city", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4])),
                Arc::new(Int32Array::from(vec![2023, 2024, 2023, 2024])),
                Arc::new(StringArray::from(vec![Some("a/b"), None, Some("a/b"), Some("")])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_spec_rejects_duplicates() {
        assert!(PartitionSpec::new(["year", "month"]).is_ok());
        assert!(PartitionSpec::new(["year", "year"]).is_err());
        assert!(PartitionSpec::new([""]).is_err());
    }

    #[test]
    fn test_split_groups_in_first_seen_order() {
        let spec = PartitionSpec::new(["year"]).unwrap();
        let groups = split_batch(&batch(), &spec).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.get("year"), Some(Some("2023")));
        assert_eq!(groups[1].0.get("year"), Some(Some("2024")));
        assert_eq!(groups[0].1.num_rows(), 2);
        assert!(groups[0].1.column_by_name("year").is_none());
        assert_eq!(groups[0].1.num_columns(), 2);
    }

    #[test]
    fn test_nulls_and_empty_strings_share_default_partition() {
        let spec = PartitionSpec::new(["city"]).unwrap();
        let groups = split_batch(&batch(), &spec).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0.to_path(), "city=a%2Fb");
        assert_eq!(groups[1].0.to_path(), "city=__HIVE_DEFAULT_PARTITION__");
        assert_eq!(groups[1].1.num_rows(), 2);
    }

    #[test]
    fn test_path_round_trip() {
        let values = PartitionValues::new(vec![
            ("year".into(), Some("2024".into())),
            ("label".into(), Some("x=1:y%".into())),
            ("region".into(), None),
        ]);
        let path = values.to_path();
        assert_eq!(
            path,
            "year=2024/label=x%3D1%3Ay%25/region=__HIVE_DEFAULT_PARTITION__"
        );
        assert_eq!(PartitionValues::from_path(&path).unwrap(), values);
        assert!(PartitionValues::from_path("no-equals").is_err());
    }

    #[test]
    fn test_map_conversion_keeps_spec_order() {
        let values = PartitionValues::new(vec![
            ("year".into(), Some("2024".into())),
            ("month".into(), None),
        ]);
        let map = values.to_map();
        let back = PartitionValues::from_map(&map, &["year".into(), "month".into()]);
        assert_eq!(back, values);
    }

    #[test]
    fn test_partition_column_array_casts() {
        let field = Field::new("year", DataType::Int32, true);
        let array = partition_column_array(&field, Some("2024"), 3).unwrap();
        let ints = array.as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(ints.values(), &[2024, 2024, 2024]);

        let nulls = partition_column_array(&field, None, 2).unwrap();
        assert_eq!(nulls.null_count(), 2);

        assert!(partition_column_array(&field, Some("not-a-year"), 1).is_err());
    }

    #[test]
    fn test_default_partition_of_required_string_is_empty() {
        let field = Field::new("city", DataType::Utf8, false);
        let array = partition_column_array(&field, None, 2).unwrap();
        let strings = array.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(strings.null_count(), 0);
        assert_eq!(strings.value(0), "");

        let optional = Field::new("city", DataType::Utf8, true);
        assert_eq!(partition_column_array(&optional, None, 2).unwrap().null_count(), 2);
    }

    #[test]
    fn test_unpartitioned_split() {
        let groups = split_batch(&batch(), &PartitionSpec::none()).unwrap();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].0.is_empty());
        assert_eq!(groups[0].1.num_columns(), 3);
    }
}
