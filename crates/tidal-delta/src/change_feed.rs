//! Change data feed.
//!
//! Turns a range of log versions into a lazy stream of row changes. Each
//! version is planned into an independent [`ChangeFeedTask`]; the stream then
//! reads one file at a time, so a long range never sits in memory at once.
//!
//! A version that wrote change data files (`cdc` actions) is read from them,
//! split by their `_change_type` column. Otherwise rows from files the
//! version added are inserts and rows from files it removed are deletes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use futures::stream::BoxStream;
use futures::{StreamExt as _, TryStreamExt as _};
use tidal_core::TableStorage;

use crate::actions::Action;
use crate::coordinator::read_data_file;
use crate::error::{DeltaError, Result};
use crate::metrics;
use crate::partition::PartitionValues;
use crate::schema::schema_from_json;
use crate::table::{ScanTask, TableHandle};

/// Column holding the change kind.
pub const CHANGE_TYPE_COLUMN: &str = "_change_type";
/// Column holding the commit version.
pub const COMMIT_VERSION_COLUMN: &str = "_commit_version";
/// Column holding the commit timestamp.
pub const COMMIT_TIMESTAMP_COLUMN: &str = "_commit_timestamp";

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// Row added.
    Insert,
    /// Row value before an update.
    UpdatePreimage,
    /// Row value after an update.
    UpdatePostimage,
    /// Row removed.
    Delete,
}

impl ChangeType {
    /// Name used in `_change_type`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::UpdatePreimage => "update_preimage",
            Self::UpdatePostimage => "update_postimage",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = DeltaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(Self::Insert),
            "update_preimage" => Ok(Self::UpdatePreimage),
            "update_postimage" => Ok(Self::UpdatePostimage),
            "delete" => Ok(Self::Delete),
            other => Err(DeltaError::schema_mismatch(format!(
                "unknown change type '{other}'"
            ))),
        }
    }
}

/// Rows sharing one commit version and one change kind.
#[derive(Debug, Clone)]
pub struct ChangeBatch {
    /// Commit version.
    pub version: u64,
    /// Commit time in milliseconds, if recorded.
    pub timestamp: Option<i64>,
    /// What happened to the rows.
    pub change_type: ChangeType,
    /// The rows, in the table schema of that version.
    pub batch: RecordBatch,
}

impl ChangeBatch {
    /// Row count.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// The rows with `_change_type`, `_commit_version` and
    /// `_commit_timestamp` appended.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::Arrow`] if the batch cannot be rebuilt.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let rows = self.num_rows();
        let schema = self.batch.schema();
        let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
        fields.push(Arc::new(Field::new(CHANGE_TYPE_COLUMN, DataType::Utf8, false)));
        fields.push(Arc::new(Field::new(COMMIT_VERSION_COLUMN, DataType::Int64, false)));
        fields.push(Arc::new(Field::new(
            COMMIT_TIMESTAMP_COLUMN,
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            true,
        )));

        let version = i64::try_from(self.version).unwrap_or(i64::MAX);
        let mut columns: Vec<ArrayRef> = self.batch.columns().to_vec();
        columns.push(Arc::new(StringArray::from(vec![self.change_type.as_str(); rows])));
        columns.push(Arc::new(Int64Array::from(vec![version; rows])));
        columns.push(Arc::new(
            TimestampMillisecondArray::from(vec![self.timestamp; rows]).with_timezone("UTC"),
        ));

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

/// Where the rows of a planned file come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A change data file; kinds come from its `_change_type` column.
    ChangeData,
    /// A data file whose every row has this kind.
    Data(ChangeType),
}

/// One file to read for a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFile {
    /// How rows map to change kinds.
    pub source: ChangeSource,
    /// The file.
    pub task: ScanTask,
    /// Shape of the file's rows. Removed files keep the schema in effect
    /// before their version.
    pub schema: SchemaRef,
}

/// Everything needed to read one version's changes.
#[derive(Debug, Clone)]
pub struct ChangeFeedTask {
    /// Commit version.
    pub version: u64,
    /// Commit time in milliseconds, if recorded.
    pub timestamp: Option<i64>,
    /// Table schema at this version.
    pub schema: SchemaRef,
    /// Files in log order.
    pub files: Vec<ChangeFile>,
}

/// Lazy stream of change batches in log order.
pub type ChangeStream = BoxStream<'static, Result<ChangeBatch>>;

/// Reads row changes between table versions.
#[derive(Debug, Clone)]
pub struct ChangeFeedReader {
    handle: TableHandle,
}

impl ChangeFeedReader {
    /// Creates a reader over `handle`'s loaded versions.
    #[must_use]
    pub fn new(handle: TableHandle) -> Self {
        Self { handle }
    }

    /// Plans `start..=end`, one task per version.
    ///
    /// `start == end` plans the full snapshot at that version as inserts.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidVersionRange`] if `start > end` or `end`
    /// is past the latest version.
    pub fn plan(&self, start: u64, end: u64) -> Result<Vec<ChangeFeedTask>> {
        let latest = self.handle.version();
        if start > end || end > latest {
            return Err(DeltaError::InvalidVersionRange { start, end, latest });
        }

        let base = self.handle.load_version(start)?;
        if start == end {
            let files = base
                .scan_tasks(&[])?
                .into_iter()
                .map(|task| ChangeFile {
                    source: ChangeSource::Data(ChangeType::Insert),
                    task,
                    schema: base.schema(),
                })
                .collect();
            return Ok(vec![ChangeFeedTask {
                version: start,
                timestamp: base.timestamp(),
                schema: base.schema(),
                files,
            }]);
        }

        // Layout before `start`; only differs from `base` if `start` rewrote
        // the metadata.
        let redefines_start = self.handle.entry(start).and_then(|e| e.metadata()).is_some();
        let before = if start > 0 && redefines_start {
            self.handle.load_version(start - 1)?
        } else {
            base
        };
        let mut schema = before.schema();
        let mut partition_columns = before.partition_columns().to_vec();

        let mut tasks = Vec::new();
        for version in start..=end {
            let entry = self.handle.entry(version).ok_or_else(|| {
                DeltaError::corrupt_log(TableStorage::log_path(version), "log entry not loaded")
            })?;
            let removed_schema = schema.clone();
            let removed_columns = partition_columns.clone();
            if let Some(metadata) = entry.metadata() {
                schema = schema_from_json(&metadata.schema_string)?;
                partition_columns.clone_from(&metadata.partition_columns);
            }

            let has_cdc = entry.cdc_files().next().is_some();
            let files = entry
                .actions
                .iter()
                .filter_map(|action| match action {
                    Action::Cdc(cdc) if has_cdc => Some(ChangeFile {
                        source: ChangeSource::ChangeData,
                        task: ScanTask {
                            path: cdc.path.clone(),
                            size: cdc.size,
                            partition_values: PartitionValues::from_map(
                                &cdc.partition_values,
                                &partition_columns,
                            ),
                            num_records: None,
                        },
                        schema: schema.clone(),
                    }),
                    Action::Add(add) if !has_cdc && add.data_change => Some(ChangeFile {
                        source: ChangeSource::Data(ChangeType::Insert),
                        task: ScanTask {
                            path: add.path.clone(),
                            size: add.size,
                            partition_values: PartitionValues::from_map(
                                &add.partition_values,
                                &partition_columns,
                            ),
                            num_records: add.num_records(),
                        },
                        schema: schema.clone(),
                    }),
                    Action::Remove(remove) if !has_cdc && remove.data_change => {
                        Some(ChangeFile {
                            source: ChangeSource::Data(ChangeType::Delete),
                            task: ScanTask {
                                path: remove.path.clone(),
                                size: remove.size.unwrap_or_default(),
                                partition_values: PartitionValues::from_map(
                                    &remove.partition_values.clone().unwrap_or_default(),
                                    &removed_columns,
                                ),
                                num_records: remove.num_records(),
                            },
                            schema: removed_schema.clone(),
                        })
                    }
                    _ => None,
                })
                .collect();

            tasks.push(ChangeFeedTask {
                version,
                timestamp: entry.timestamp(),
                schema: schema.clone(),
                files,
            });
        }
        Ok(tasks)
    }

    /// Streams the changes of `start..=end`.
    ///
    /// The range is validated eagerly; files are read as the stream is
    /// polled.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidVersionRange`] for a bad range. Read
    /// failures surface as stream items.
    #[tracing::instrument(skip(self), fields(table = %self.handle.uri()))]
    pub fn read_changes(&self, start: u64, end: u64) -> Result<ChangeStream> {
        let tasks = self.plan(start, end)?;
        let storage = self.handle.storage().clone();

        let units: Vec<(u64, Option<i64>, ChangeFile)> = tasks
            .into_iter()
            .flat_map(|task| {
                let ChangeFeedTask {
                    version,
                    timestamp,
                    files,
                    ..
                } = task;
                files
                    .into_iter()
                    .map(move |file| (version, timestamp, file))
            })
            .collect();

        let stream = futures::stream::iter(units)
            .then(move |(version, timestamp, file)| {
                let storage = storage.clone();
                async move { read_change_file(&storage, version, timestamp, &file).await }
            })
            .map_ok(|batches| futures::stream::iter(batches.into_iter().map(Ok::<_, DeltaError>)))
            .try_flatten();
        Ok(stream.boxed())
    }

    /// Reads `start..=end` into memory.
    ///
    /// # Errors
    ///
    /// See [`ChangeFeedReader::read_changes`].
    pub async fn collect_changes(&self, start: u64, end: u64) -> Result<Vec<ChangeBatch>> {
        self.read_changes(start, end)?.try_collect().await
    }
}

async fn read_change_file(
    storage: &TableStorage,
    version: u64,
    timestamp: Option<i64>,
    file: &ChangeFile,
) -> Result<Vec<ChangeBatch>> {
    let schema = &file.schema;
    let batches = match file.source {
        ChangeSource::Data(change_type) => read_data_file(storage, schema, &file.task)
            .await?
            .into_iter()
            .map(|batch| ChangeBatch {
                version,
                timestamp,
                change_type,
                batch,
            })
            .collect(),
        ChangeSource::ChangeData => {
            let mut fields: Vec<Arc<Field>> = schema.fields().iter().cloned().collect();
            fields.push(Arc::new(Field::new(CHANGE_TYPE_COLUMN, DataType::Utf8, false)));
            let with_kind = Arc::new(Schema::new(fields));
            let mut out = Vec::new();
            for batch in read_data_file(storage, &with_kind, &file.task).await? {
                out.extend(split_by_change_type(&batch, schema)?.into_iter().map(
                    |(change_type, batch)| ChangeBatch {
                        version,
                        timestamp,
                        change_type,
                        batch,
                    },
                ));
            }
            out
        }
    };

    for batch in &batches {
        metrics::record_change_rows(batch.change_type.as_str(), batch.num_rows() as u64);
    }
    Ok(batches)
}

/// Cuts a change data batch into runs of equal `_change_type`, keeping row
/// order and dropping the kind column.
fn split_by_change_type(
    batch: &RecordBatch,
    schema: &SchemaRef,
) -> Result<Vec<(ChangeType, RecordBatch)>> {
    let kinds = batch
        .column_by_name(CHANGE_TYPE_COLUMN)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| {
            DeltaError::schema_mismatch(format!(
                "change data file has no {CHANGE_TYPE_COLUMN} column"
            ))
        })?;
    let data = batch.project(&(0..schema.fields().len()).collect::<Vec<_>>())?;

    let mut runs = Vec::new();
    let mut start = 0;
    while start < kinds.len() {
        if kinds.is_null(start) {
            return Err(DeltaError::schema_mismatch("null _change_type in change data file"));
        }
        let kind = kinds.value(start);
        let mut end = start + 1;
        while end < kinds.len() && !kinds.is_null(end) && kinds.value(end) == kind {
            end += 1;
        }
        runs.push((kind.parse()?, data.slice(start, end - start)));
        start = end;
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new(CHANGE_TYPE_COLUMN, DataType::Utf8, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 1, 2, 3])),
                Arc::new(StringArray::from(vec![
                    "update_preimage",
                    "update_postimage",
                    "delete",
                    "delete",
                ])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_change_type_names() {
        for kind in [
            ChangeType::Insert,
            ChangeType::UpdatePreimage,
            ChangeType::UpdatePostimage,
            ChangeType::Delete,
        ] {
            assert_eq!(kind.as_str().parse::<ChangeType>().unwrap(), kind);
        }
        assert!("upsert".parse::<ChangeType>().is_err());
    }

    #[test]
    fn test_split_keeps_row_order() {
        let table = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let runs = split_by_change_type(&batch(), &table).unwrap();
        let kinds: Vec<ChangeType> = runs.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![
                ChangeType::UpdatePreimage,
                ChangeType::UpdatePostimage,
                ChangeType::Delete
            ]
        );
        assert_eq!(runs[2].1.num_rows(), 2);
        assert_eq!(runs[2].1.num_columns(), 1);
    }

    #[test]
    fn test_to_record_batch_appends_metadata_columns() {
        let table = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let change = ChangeBatch {
            version: 7,
            timestamp: Some(1_700_000_000_000),
            change_type: ChangeType::Insert,
            batch: RecordBatch::try_new(table, vec![Arc::new(Int64Array::from(vec![1, 2]))])
                .unwrap(),
        };
        let out = change.to_record_batch().unwrap();
        assert_eq!(out.num_columns(), 4);
        let versions = out
            .column_by_name(COMMIT_VERSION_COLUMN)
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(versions.values(), &[7, 7]);
        let kinds = out
            .column_by_name(CHANGE_TYPE_COLUMN)
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(kinds.value(1), "insert");
    }
}
