//! Schema conversion between Delta schema JSON and Arrow, and write-time
//! schema validation.
//!
//! Every table schema goes through a round trip to Delta JSON and back, which
//! yields its canonical Arrow form: `LargeUtf8` becomes `Utf8`, `Date64`
//! becomes `Date32`, timestamps of any unit become microseconds.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};

use crate::error::{DeltaError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum DeltaType {
    Primitive(String),
    Complex(Box<ComplexType>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ComplexType {
    Struct {
        fields: Vec<DeltaField>,
    },
    Array {
        #[serde(rename = "elementType")]
        element_type: DeltaType,
        #[serde(rename = "containsNull")]
        contains_null: bool,
    },
    Map {
        #[serde(rename = "keyType")]
        key_type: DeltaType,
        #[serde(rename = "valueType")]
        value_type: DeltaType,
        #[serde(rename = "valueContainsNull")]
        value_contains_null: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DeltaField {
    name: String,
    #[serde(rename = "type")]
    data_type: DeltaType,
    nullable: bool,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

fn to_delta_type(data_type: &DataType, column: &str) -> Result<DeltaType> {
    let primitive = |name: &str| Ok(DeltaType::Primitive(name.to_string()));
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 => primitive("string"),
        DataType::Int64 => primitive("long"),
        DataType::Int32 => primitive("integer"),
        DataType::Int16 => primitive("short"),
        DataType::Int8 => primitive("byte"),
        DataType::Float32 => primitive("float"),
        DataType::Float64 => primitive("double"),
        DataType::Boolean => primitive("boolean"),
        DataType::Binary | DataType::LargeBinary => primitive("binary"),
        DataType::Date32 | DataType::Date64 => primitive("date"),
        DataType::Timestamp(_, Some(_)) => primitive("timestamp"),
        DataType::Timestamp(_, None) => primitive("timestamp_ntz"),
        DataType::Decimal128(precision, scale) => {
            primitive(&format!("decimal({precision},{scale})"))
        }
        DataType::List(item) | DataType::LargeList(item) => {
            Ok(DeltaType::Complex(Box::new(ComplexType::Array {
                element_type: to_delta_type(item.data_type(), column)?,
                contains_null: item.is_nullable(),
            })))
        }
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => {
                Ok(DeltaType::Complex(Box::new(ComplexType::Map {
                    key_type: to_delta_type(kv[0].data_type(), column)?,
                    value_type: to_delta_type(kv[1].data_type(), column)?,
                    value_contains_null: kv[1].is_nullable(),
                })))
            }
            other => Err(DeltaError::schema_mismatch(format!(
                "column '{column}' has malformed map entries type {other}"
            ))),
        },
        DataType::Struct(fields) => Ok(DeltaType::Complex(Box::new(ComplexType::Struct {
            fields: fields
                .iter()
                .map(|f| to_delta_field(f))
                .collect::<Result<_>>()?,
        }))),
        DataType::Dictionary(_, value) => to_delta_type(value, column),
        other => Err(DeltaError::schema_mismatch(format!(
            "column '{column}' has unsupported type {other}"
        ))),
    }
}

fn to_delta_field(field: &Field) -> Result<DeltaField> {
    Ok(DeltaField {
        name: field.name().clone(),
        data_type: to_delta_type(field.data_type(), field.name())?,
        nullable: field.is_nullable(),
        metadata: serde_json::Map::new(),
    })
}

fn parse_decimal(name: &str) -> Option<DataType> {
    let inner = name.strip_prefix("decimal(")?.strip_suffix(')')?;
    let (precision, scale) = inner.split_once(',')?;
    Some(DataType::Decimal128(
        precision.trim().parse().ok()?,
        scale.trim().parse().ok()?,
    ))
}

fn to_arrow_type(data_type: &DeltaType) -> Result<DataType> {
    match data_type {
        DeltaType::Primitive(name) => match name.as_str() {
            "string" => Ok(DataType::Utf8),
            "long" => Ok(DataType::Int64),
            "integer" => Ok(DataType::Int32),
            "short" => Ok(DataType::Int16),
            "byte" => Ok(DataType::Int8),
            "float" => Ok(DataType::Float32),
            "double" => Ok(DataType::Float64),
            "boolean" => Ok(DataType::Boolean),
            "binary" => Ok(DataType::Binary),
            "date" => Ok(DataType::Date32),
            "timestamp" => Ok(DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))),
            "timestamp_ntz" => Ok(DataType::Timestamp(TimeUnit::Microsecond, None)),
            other => parse_decimal(other).ok_or_else(|| {
                DeltaError::schema_mismatch(format!("unknown primitive type '{other}'"))
            }),
        },
        DeltaType::Complex(complex) => match complex.as_ref() {
            ComplexType::Struct { fields } => Ok(DataType::Struct(to_arrow_fields(fields)?)),
            ComplexType::Array {
                element_type,
                contains_null,
            } => Ok(DataType::List(Arc::new(Field::new(
                "element",
                to_arrow_type(element_type)?,
                *contains_null,
            )))),
            ComplexType::Map {
                key_type,
                value_type,
                value_contains_null,
            } => {
                let entries = Fields::from(vec![
                    Field::new("key", to_arrow_type(key_type)?, false),
                    Field::new("value", to_arrow_type(value_type)?, *value_contains_null),
                ]);
                Ok(DataType::Map(
                    Arc::new(Field::new("key_value", DataType::Struct(entries), false)),
                    false,
                ))
            }
        },
    }
}

fn to_arrow_fields(fields: &[DeltaField]) -> Result<Fields> {
    fields
        .iter()
        .map(|f| Ok(Field::new(&f.name, to_arrow_type(&f.data_type)?, f.nullable)))
        .collect::<Result<Vec<_>>>()
        .map(Fields::from)
}

/// Serializes an Arrow schema as Delta schema JSON.
///
/// # Errors
///
/// Returns [`DeltaError::SchemaMismatch`] for types the table format cannot
/// store (unsigned integers, intervals, ...).
pub fn schema_to_json(schema: &Schema) -> Result<String> {
    let root = ComplexType::Struct {
        fields: schema
            .fields()
            .iter()
            .map(|f| to_delta_field(f))
            .collect::<Result<_>>()?,
    };
    serde_json::to_string(&root)
        .map_err(|e| DeltaError::serialization(format!("failed to encode schema: {e}")))
}

/// Parses Delta schema JSON into its canonical Arrow schema.
///
/// # Errors
///
/// Returns [`DeltaError::Serialization`] for invalid JSON and
/// [`DeltaError::SchemaMismatch`] for unknown types.
pub fn schema_from_json(json: &str) -> Result<SchemaRef> {
    let root: ComplexType = serde_json::from_str(json)
        .map_err(|e| DeltaError::serialization(format!("failed to decode schema: {e}")))?;
    match root {
        ComplexType::Struct { fields } => Ok(Arc::new(Schema::new(to_arrow_fields(&fields)?))),
        _ => Err(DeltaError::schema_mismatch("table schema root must be a struct")),
    }
}

/// Canonical form of an Arrow schema.
///
/// # Errors
///
/// Returns [`DeltaError::SchemaMismatch`] for unsupported types.
pub fn canonical_schema(schema: &Schema) -> Result<SchemaRef> {
    schema_from_json(&schema_to_json(schema)?)
}

/// Checks that every partition column exists in `schema`.
///
/// # Errors
///
/// Returns [`DeltaError::InvalidPartitionColumns`] listing all missing columns
/// and the available ones, or [`DeltaError::SchemaMismatch`] if a partition
/// column has a nested type.
pub fn validate_partition_columns(schema: &Schema, columns: &[String]) -> Result<()> {
    let missing: Vec<String> = columns
        .iter()
        .filter(|c| schema.field_with_name(c).is_err())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DeltaError::InvalidPartitionColumns {
            missing,
            available: schema.fields().iter().map(|f| f.name().clone()).collect(),
        });
    }

    for column in columns {
        let field = schema.field_with_name(column)?;
        if field.data_type().is_nested() {
            return Err(DeltaError::schema_mismatch(format!(
                "partition column '{column}' has nested type {}",
                field.data_type()
            )));
        }
    }
    Ok(())
}

/// Checks that `incoming` data can be appended to a table with `table` schema.
///
/// Field order does not matter. Types are compared in canonical form. A
/// nullable table column accepts non-nullable input, not the reverse.
///
/// # Errors
///
/// Returns [`DeltaError::SchemaMismatch`] naming the first offending column.
pub fn ensure_compatible(table: &Schema, incoming: &Schema) -> Result<()> {
    let incoming = canonical_schema(incoming)?;

    for field in incoming.fields() {
        if table.field_with_name(field.name()).is_err() {
            return Err(DeltaError::schema_mismatch(format!(
                "column '{}' is not in the table schema",
                field.name()
            )));
        }
    }

    for field in table.fields() {
        let Ok(other) = incoming.field_with_name(field.name()) else {
            return Err(DeltaError::schema_mismatch(format!(
                "column '{}' is missing from the data",
                field.name()
            )));
        };
        if other.data_type() != field.data_type() {
            return Err(DeltaError::schema_mismatch(format!(
                "column '{}' has type {} but the table expects {}",
                field.name(),
                other.data_type(),
                field.data_type()
            )));
        }
        if other.is_nullable() && !field.is_nullable() {
            return Err(DeltaError::schema_mismatch(format!(
                "column '{}' is nullable but the table column is not",
                field.name()
            )));
        }
    }
    Ok(())
}

/// Reorders and casts `batch` columns to match `target` by name.
///
/// # Errors
///
/// Returns [`DeltaError::SchemaMismatch`] if a target column is missing and
/// [`DeltaError::Arrow`] if a cast fails.
pub fn conform_batch(batch: &RecordBatch, target: &SchemaRef) -> Result<RecordBatch> {
    let columns = target
        .fields()
        .iter()
        .map(|field| {
            let column = batch.column_by_name(field.name()).ok_or_else(|| {
                DeltaError::schema_mismatch(format!(
                    "column '{}' is missing from the data",
                    field.name()
                ))
            })?;
            if column.data_type() == field.data_type() {
                Ok(column.clone())
            } else {
                Ok(cast(column, field.data_type())?)
            }
        })
        .collect::<Result<Vec<ArrayRef>>>()?;
    Ok(RecordBatch::try_new(target.clone(), columns)?)
}

/// Schema without the partition columns: the shape of data files.
#[must_use]
pub fn file_schema(table: &Schema, partition_columns: &[String]) -> SchemaRef {
    let fields: Vec<Arc<Field>> = table
        .fields()
        .iter()
        .filter(|f| !partition_columns.contains(f.name()))
        .cloned()
        .collect();
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::LargeUtf8, true),
            Field::new(
                "ts",
                DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into())),
                true,
            ),
            Field::new("amount", DataType::Decimal128(10, 2), true),
            Field::new(
                "tags",
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
                true,
            ),
        ])
    }

    #[test]
    fn test_schema_json_shape() {
        let json = schema_to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "struct");
        assert_eq!(value["fields"][0]["name"], "id");
        assert_eq!(value["fields"][0]["type"], "long");
        assert_eq!(value["fields"][0]["nullable"], false);
        assert_eq!(value["fields"][2]["type"], "timestamp");
        assert_eq!(value["fields"][3]["type"], "decimal(10,2)");
        assert_eq!(value["fields"][4]["type"]["type"], "array");
        assert_eq!(value["fields"][4]["type"]["elementType"], "string");
    }

    #[test]
    fn test_canonical_schema() {
        let canonical = canonical_schema(&sample()).unwrap();
        assert_eq!(canonical.field(1).data_type(), &DataType::Utf8);
        assert_eq!(
            canonical.field(2).data_type(),
            &DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into()))
        );
        assert!(!canonical.field(0).is_nullable());
    }

    #[test]
    fn test_map_round_trip() {
        let json = r#"{"type":"struct","fields":[{"name":"m","type":{"type":"map","keyType":"string","valueType":"long","valueContainsNull":true},"nullable":true,"metadata":{}}]}"#;
        let schema = schema_from_json(json).unwrap();
        assert!(matches!(schema.field(0).data_type(), DataType::Map(_, false)));
        let back: serde_json::Value = serde_json::from_str(&schema_to_json(&schema).unwrap()).unwrap();
        let original: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_unsupported_type_names_column() {
        let schema = Schema::new(vec![Field::new("u", DataType::UInt64, true)]);
        let err = schema_to_json(&schema).unwrap_err();
        assert!(err.to_string().contains("'u'"));
    }

    #[test]
    fn test_validate_partition_columns_lists_all_missing() {
        let schema = sample();
        assert!(validate_partition_columns(&schema, &["name".into()]).is_ok());

        let err =
            validate_partition_columns(&schema, &["nonexistent".into(), "id".into(), "x".into()])
                .unwrap_err();
        match err {
            DeltaError::InvalidPartitionColumns { missing, available } => {
                assert_eq!(missing, vec!["nonexistent".to_string(), "x".to_string()]);
                assert!(available.contains(&"id".to_string()));
            }
            other => panic!("expected InvalidPartitionColumns, got {other:?}"),
        }

        assert!(matches!(
            validate_partition_columns(&schema, &["tags".into()]),
            Err(DeltaError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_ensure_compatible() {
        let table = canonical_schema(&Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]))
        .unwrap();

        let reordered = Schema::new(vec![
            Field::new("name", DataType::LargeUtf8, true),
            Field::new("id", DataType::Int64, false),
        ]);
        assert!(ensure_compatible(&table, &reordered).is_ok());

        let wrong_type = Schema::new(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, true),
        ]);
        assert!(ensure_compatible(&table, &wrong_type)
            .unwrap_err()
            .to_string()
            .contains("'id'"));

        let extra = Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("extra", DataType::Utf8, true),
        ]);
        assert!(ensure_compatible(&table, &extra).is_err());

        let missing = Schema::new(vec![Field::new("id", DataType::Int64, true)]);
        assert!(ensure_compatible(&table, &missing).is_err());
    }

    #[test]
    fn test_conform_batch_reorders_and_casts() {
        use arrow::array::{Int64Array, LargeStringArray};

        let incoming = Arc::new(Schema::new(vec![
            Field::new("name", DataType::LargeUtf8, true),
            Field::new("id", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            incoming,
            vec![
                Arc::new(LargeStringArray::from(vec!["a", "b"])),
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )
        .unwrap();
        let target = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, true),
            Field::new("name", DataType::Utf8, true),
        ]));

        let conformed = conform_batch(&batch, &target).unwrap();
        assert_eq!(conformed.schema(), target);
        assert_eq!(conformed.num_rows(), 2);
    }

    #[test]
    fn test_file_schema_drops_partition_columns() {
        let schema = file_schema(&sample(), &["name".into()]);
        assert_eq!(schema.fields().len(), 4);
        assert!(schema.field_with_name("name").is_err());
    }
}
