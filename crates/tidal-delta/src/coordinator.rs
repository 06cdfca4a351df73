//! Write and read collaborators.
//!
//! The commit protocol never touches data files itself. A [`WriteCoordinator`]
//! turns batches into immutable files and reports what it produced; a
//! [`ReadCoordinator`] turns scan tasks back into batches. The local
//! implementations fan out over files with bounded concurrency and keep
//! results in a deterministic order.

use std::collections::HashMap;
use std::fmt::Debug;

use arrow::array::{new_null_array, ArrayRef};
use arrow::compute::cast;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::{StreamExt as _, TryStreamExt as _};
use tidal_core::{TableStorage, WritePrecondition, WriteResult};
use uuid::Uuid;

use crate::actions::{Add, FileStats};
use crate::config::EngineConfig;
use crate::error::{DeltaError, Result};
use crate::metrics;
use crate::parquet_io::{decode_batches, encode_batches};
use crate::partition::{partition_column_array, split_batch, PartitionSpec, PartitionValues};
use crate::schema::file_schema;
use crate::table::ScanTask;

/// A data file produced by a write, ready to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileDescriptor {
    /// Table-relative path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Partition values of every row in the file.
    pub partition_values: PartitionValues,
    /// Rows in the file.
    pub row_count: u64,
}

impl DataFileDescriptor {
    /// The `add` action committing this file.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::Serialization`] if the stats cannot be encoded.
    pub fn to_add(&self, modification_time: i64) -> Result<Add> {
        let stats = FileStats {
            num_records: i64::try_from(self.row_count).unwrap_or(i64::MAX),
        };
        let stats = serde_json::to_string(&stats)
            .map_err(|e| DeltaError::serialization(format!("failed to encode stats: {e}")))?;
        Ok(Add {
            path: self.path.clone(),
            partition_values: self.partition_values.to_map(),
            size: i64::try_from(self.size).unwrap_or(i64::MAX),
            modification_time,
            data_change: true,
            stats: Some(stats),
        })
    }
}

/// The partition-assignment plan handed to a write collaborator.
#[derive(Debug, Clone)]
pub struct WritePlan {
    /// Partition columns, in directory nesting order.
    pub spec: PartitionSpec,
    /// Schema of incoming batches, partition columns included.
    pub table_schema: SchemaRef,
    /// Schema of data files: the table schema minus partition columns.
    pub file_schema: SchemaRef,
}

impl WritePlan {
    /// Builds a plan, validating `spec` against `table_schema`.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidPartitionColumns`] if a partition column is
    /// not in the schema.
    pub fn new(spec: PartitionSpec, table_schema: SchemaRef) -> Result<Self> {
        spec.validate(&table_schema)?;
        let file_schema = file_schema(&table_schema, spec.columns());
        Ok(Self {
            spec,
            table_schema,
            file_schema,
        })
    }
}

/// Produces data files from batches.
#[async_trait]
pub trait WriteCoordinator: Send + Sync + Debug {
    /// Writes `batches` (in the plan's table schema) as new data files.
    ///
    /// Zero rows produce zero files. Files are never overwritten.
    async fn produce(
        &self,
        storage: &TableStorage,
        plan: &WritePlan,
        batches: &[RecordBatch],
    ) -> Result<Vec<DataFileDescriptor>>;
}

/// Reads data files back into batches.
#[async_trait]
pub trait ReadCoordinator: Send + Sync + Debug {
    /// Reads `tasks` into batches shaped like `schema`, in task order.
    async fn read(
        &self,
        storage: &TableStorage,
        schema: &SchemaRef,
        tasks: &[ScanTask],
    ) -> Result<Vec<RecordBatch>>;
}

/// One file's worth of rows.
struct FileJob {
    path: String,
    partition_values: PartitionValues,
    batches: Vec<RecordBatch>,
    rows: usize,
}

/// In-process write collaborator.
#[derive(Debug, Clone)]
pub struct LocalWriteCoordinator {
    concurrency: usize,
    target_rows_per_file: usize,
}

impl LocalWriteCoordinator {
    /// Creates a coordinator using the config's concurrency and file size.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.write_concurrency.max(1),
            target_rows_per_file: config.target_rows_per_file.max(1),
        }
    }

    /// Groups rows by partition, first-seen order, then cuts each group into
    /// files of at most `target_rows_per_file` rows.
    fn plan_files(&self, plan: &WritePlan, batches: &[RecordBatch]) -> Result<Vec<FileJob>> {
        let mut index: HashMap<PartitionValues, usize> = HashMap::new();
        let mut groups: Vec<(PartitionValues, Vec<RecordBatch>)> = Vec::new();
        for batch in batches {
            for (values, part) in split_batch(batch, &plan.spec)? {
                match index.get(&values) {
                    Some(&slot) => groups[slot].1.push(part),
                    None => {
                        index.insert(values.clone(), groups.len());
                        groups.push((values, vec![part]));
                    }
                }
            }
        }

        let write_id = Uuid::new_v4();
        let mut jobs: Vec<FileJob> = Vec::new();
        for (values, parts) in groups {
            let mut current: Vec<RecordBatch> = Vec::new();
            let mut rows = 0;
            for part in parts {
                let mut offset = 0;
                while offset < part.num_rows() {
                    let take = (part.num_rows() - offset).min(self.target_rows_per_file - rows);
                    current.push(part.slice(offset, take));
                    rows += take;
                    offset += take;
                    if rows == self.target_rows_per_file {
                        let batches = std::mem::take(&mut current);
                        jobs.push(file_job(jobs.len(), write_id, &values, batches, rows));
                        rows = 0;
                    }
                }
            }
            if rows > 0 {
                jobs.push(file_job(jobs.len(), write_id, &values, current, rows));
            }
        }
        Ok(jobs)
    }
}

fn file_job(
    n: usize,
    write_id: Uuid,
    values: &PartitionValues,
    batches: Vec<RecordBatch>,
    rows: usize,
) -> FileJob {
    let name = format!("part-{n:05}-{write_id}-c000.snappy.parquet");
    let path = if values.is_empty() {
        name
    } else {
        format!("{}/{name}", values.to_path())
    };
    FileJob {
        path,
        partition_values: values.clone(),
        batches,
        rows,
    }
}

async fn write_file(
    storage: &TableStorage,
    file_schema: SchemaRef,
    job: FileJob,
) -> Result<DataFileDescriptor> {
    let bytes = encode_batches(file_schema, &job.batches)?;
    let size = bytes.len() as u64;
    match storage
        .put(&job.path, bytes, WritePrecondition::DoesNotExist)
        .await?
    {
        WriteResult::Success { .. } => {}
        WriteResult::PreconditionFailed { .. } => {
            return Err(tidal_core::Error::storage(format!(
                "data file already exists: {}",
                job.path
            ))
            .into());
        }
    }

    let row_count = job.rows as u64;
    metrics::record_file_written(size, row_count);
    tracing::debug!(path = %job.path, size, rows = row_count, "wrote data file");
    Ok(DataFileDescriptor {
        path: job.path,
        size,
        partition_values: job.partition_values,
        row_count,
    })
}

#[async_trait]
impl WriteCoordinator for LocalWriteCoordinator {
    async fn produce(
        &self,
        storage: &TableStorage,
        plan: &WritePlan,
        batches: &[RecordBatch],
    ) -> Result<Vec<DataFileDescriptor>> {
        let jobs = self.plan_files(plan, batches)?;
        futures::stream::iter(jobs)
            .map(|job| write_file(storage, plan.file_schema.clone(), job))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

/// In-process read collaborator.
#[derive(Debug, Clone)]
pub struct LocalReadCoordinator {
    concurrency: usize,
}

impl LocalReadCoordinator {
    /// Creates a coordinator using the config's read concurrency.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            concurrency: config.read_concurrency.max(1),
        }
    }
}

#[async_trait]
impl ReadCoordinator for LocalReadCoordinator {
    async fn read(
        &self,
        storage: &TableStorage,
        schema: &SchemaRef,
        tasks: &[ScanTask],
    ) -> Result<Vec<RecordBatch>> {
        let per_file: Vec<Vec<RecordBatch>> = futures::stream::iter(tasks.iter().cloned())
            .map(|task| async move { read_data_file(storage, schema, &task).await })
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        Ok(per_file.into_iter().flatten().collect())
    }
}

/// Reads one data file, rebuilding partition columns from `task`.
///
/// Output columns follow `schema`. Columns the file lacks are filled with
/// nulls when nullable.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a non-nullable column is
/// missing.
pub async fn read_data_file(
    storage: &TableStorage,
    schema: &SchemaRef,
    task: &ScanTask,
) -> Result<Vec<RecordBatch>> {
    let bytes = storage.get(&task.path).await?;
    decode_batches(bytes)?
        .iter()
        .filter(|batch| batch.num_rows() > 0)
        .map(|batch| attach_columns(batch, schema, task))
        .collect()
}

fn attach_columns(batch: &RecordBatch, schema: &SchemaRef, task: &ScanTask) -> Result<RecordBatch> {
    let rows = batch.num_rows();
    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            if let Some(value) = task.partition_values.get(field.name()) {
                return partition_column_array(field, value, rows);
            }
            match batch.column_by_name(field.name()) {
                Some(column) if column.data_type() == field.data_type() => Ok(column.clone()),
                Some(column) => Ok(cast(column, field.data_type())?),
                None if field.is_nullable() => Ok(new_null_array(field.data_type(), rows)),
                None => Err(DeltaError::schema_mismatch(format!(
                    "data file {} has no column '{}'",
                    task.path,
                    field.name()
                ))),
            }
        })
        .collect::<Result<Vec<ArrayRef>>>()?;
    Ok(RecordBatch::try_new(schema.clone(), columns)?)
}
