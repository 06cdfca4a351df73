//! End-to-end write path.
//!
//! ```text
//! validate options -> open table -> decide -> produce files -> commit
//!   (no I/O)                        (fail fast)  (coordinator)  (retrying)
//! ```
//!
//! Everything that can be rejected without touching storage is rejected
//! first: mode strings, unknown partition columns and schema problems never
//! leave files behind. `Error` mode on an existing table fails before any
//! file is produced.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use tidal_core::{StorageOptions, StorageOptionsResolver, TableStorage, TableUri};

use crate::commit::{CommitOptions, CommitProtocol, CommitResult, WriteDecision};
use crate::config::EngineConfig;
use crate::coordinator::{DataFileDescriptor, LocalWriteCoordinator, WriteCoordinator, WritePlan};
use crate::error::{DeltaError, Result};
use crate::metrics;
use crate::mode::WriteMode;
use crate::partition::PartitionSpec;
use crate::schema::{canonical_schema, conform_batch, ensure_compatible};
use crate::table::{TableHandle, TableLookup};

/// Caller-facing write settings.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// What to do if the table exists. Defaults to `Error`.
    pub mode: WriteMode,
    /// Partition columns, in directory nesting order. Empty on append means
    /// "use the table's partitioning".
    pub partition_cols: Vec<String>,
    /// Table schema. Inferred from the first batch when absent.
    pub schema: Option<SchemaRef>,
    /// Storage option overrides, applied over detected credentials.
    pub storage_options: StorageOptions,
    /// Table name recorded in new metadata.
    pub name: Option<String>,
    /// Table description recorded in new metadata.
    pub description: Option<String>,
    /// Table properties recorded in new metadata.
    pub configuration: BTreeMap<String, String>,
    /// Extra fields merged into `commitInfo`.
    pub commit_metadata: BTreeMap<String, serde_json::Value>,
}

impl WriteOptions {
    /// Options with `mode` and defaults elsewhere.
    #[must_use]
    pub fn new(mode: WriteMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Options from a mode string such as `"append"`.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidMode`] for unknown modes.
    pub fn with_mode_str(mode: &str) -> Result<Self> {
        Ok(Self::new(WriteMode::parse(mode)?))
    }

    /// Sets the partition columns.
    #[must_use]
    pub fn partition_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_cols = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an explicit schema.
    #[must_use]
    pub fn with_schema(mut self, schema: SchemaRef) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets one table property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    /// Sets one storage option override.
    #[must_use]
    pub fn with_storage_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.storage_options.insert(key, value);
        self
    }

    fn commit_options(&self) -> CommitOptions {
        CommitOptions {
            name: self.name.clone(),
            description: self.description.clone(),
            configuration: self.configuration.clone(),
            commit_metadata: self.commit_metadata.clone(),
        }
    }
}

/// Result of [`DeltaWriter::write`].
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    /// What the commit did.
    pub result: CommitResult,
    /// Files written; empty when skipped or for zero rows.
    pub files: Vec<DataFileDescriptor>,
    /// Rows written across all files.
    pub rows_written: u64,
}

impl WriteOutcome {
    /// Table version after the write.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.result.version()
    }
}

/// Writes batches to one table.
#[derive(Debug, Clone)]
pub struct DeltaWriter {
    storage: TableStorage,
    protocol: CommitProtocol,
    coordinator: Arc<dyn WriteCoordinator>,
}

impl DeltaWriter {
    /// Creates a writer over table-scoped storage with default config.
    #[must_use]
    pub fn new(storage: TableStorage) -> Self {
        let config = EngineConfig::default();
        Self {
            storage,
            coordinator: Arc::new(LocalWriteCoordinator::new(&config)),
            protocol: CommitProtocol::new(config),
        }
    }

    /// Creates a writer for `uri`, resolving credentials for its scheme and
    /// applying `overrides` on top.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::TableUnavailable`] if the URI is malformed or no
    /// store can be built for it.
    pub fn for_uri(uri: &str, overrides: &StorageOptions) -> Result<Self> {
        let parsed = TableUri::parse(uri).map_err(|e| DeltaError::unavailable(uri, e))?;
        let options = StorageOptionsResolver::new().resolve(&parsed, overrides);
        let storage =
            TableStorage::open(&parsed, &options).map_err(|e| DeltaError::unavailable(uri, e))?;
        Ok(Self::new(storage))
    }

    /// Uses `config` for retries, concurrency and file sizes.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.coordinator = Arc::new(LocalWriteCoordinator::new(&config));
        self.protocol = CommitProtocol::new(config);
        self
    }

    /// Uses a custom write collaborator.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<dyn WriteCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    /// Table-scoped storage.
    #[must_use]
    pub fn storage(&self) -> &TableStorage {
        &self.storage
    }

    /// Writes `batches` according to `options`.
    ///
    /// # Errors
    ///
    /// - [`DeltaError::SchemaMismatch`] if there is no batch and no schema, or
    ///   the data does not fit the schema
    /// - [`DeltaError::InvalidPartitionColumns`] before any I/O
    /// - [`DeltaError::AlreadyExists`] in `Error` mode, before any file exists
    /// - [`DeltaError::TableUnavailable`] if the table cannot be inspected
    /// - [`DeltaError::ConcurrentCommitConflict`] if retries are exhausted
    #[tracing::instrument(
        skip_all,
        fields(table = %self.storage.uri(), mode = %options.mode, batches = batches.len())
    )]
    pub async fn write(
        &self,
        batches: &[RecordBatch],
        options: &WriteOptions,
    ) -> Result<WriteOutcome> {
        let schema = match (&options.schema, batches.first()) {
            (Some(schema), _) => schema.clone(),
            (None, Some(batch)) => batch.schema(),
            (None, None) => {
                return Err(DeltaError::schema_mismatch(
                    "cannot infer a schema from zero batches; pass an explicit schema",
                ));
            }
        };
        let schema = canonical_schema(&schema)?;
        let requested = PartitionSpec::new(options.partition_cols.iter().cloned())?;
        requested.validate(&schema)?;
        let mut batches = conform_all(batches, &schema)?;

        let lookup = TableHandle::open_with_storage(self.storage.clone()).await?;
        let decision = self.protocol.decide(&lookup, options.mode)?;
        if decision == WriteDecision::Skip {
            metrics::record_commit(options.mode.as_str(), "skipped", 0.0);
            return Ok(WriteOutcome {
                result: CommitResult::Skipped {
                    version: lookup.version().unwrap_or_default(),
                },
                files: Vec::new(),
                rows_written: 0,
            });
        }

        let (spec, table_schema) = match (&lookup, decision) {
            (TableLookup::Present(handle), WriteDecision::Append) => {
                let table_spec = PartitionSpec::new(handle.partition_columns().iter().cloned())?;
                if !requested.is_empty() && requested != table_spec {
                    return Err(DeltaError::PartitionSpecMismatch {
                        table: table_spec.columns().to_vec(),
                        requested: requested.columns().to_vec(),
                    });
                }
                ensure_compatible(&handle.schema(), &schema)?;
                let table_schema = handle.schema();
                batches = conform_all(&batches, &table_schema)?;
                (table_spec, table_schema)
            }
            _ => (requested, schema),
        };

        let plan = WritePlan::new(spec, table_schema)?;
        let files = self
            .coordinator
            .produce(&self.storage, &plan, &batches)
            .await?;
        let rows_written = files.iter().map(|f| f.row_count).sum();

        let result = self
            .protocol
            .commit(
                &self.storage,
                lookup,
                options.mode,
                &files,
                &plan.spec,
                &plan.table_schema,
                &options.commit_options(),
            )
            .await?;

        Ok(WriteOutcome {
            result,
            files,
            rows_written,
        })
    }
}

/// Writes `batches` to the table at `uri`, resolving credentials and applying
/// `options.storage_options` as overrides.
///
/// # Errors
///
/// See [`DeltaWriter::for_uri`] and [`DeltaWriter::write`].
pub async fn write_table(
    uri: &str,
    batches: &[RecordBatch],
    options: &WriteOptions,
) -> Result<WriteOutcome> {
    DeltaWriter::for_uri(uri, &options.storage_options)?
        .with_config(EngineConfig::from_env()?)
        .write(batches, options)
        .await
}

fn conform_all(batches: &[RecordBatch], schema: &SchemaRef) -> Result<Vec<RecordBatch>> {
    batches
        .iter()
        .map(|batch| {
            if let Some(extra) = batch
                .schema()
                .fields()
                .iter()
                .find(|f| schema.field_with_name(f.name()).is_err())
            {
                return Err(DeltaError::schema_mismatch(format!(
                    "column '{}' is not in the table schema",
                    extra.name()
                )));
            }
            conform_batch(batch, schema)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow::array::{Int32Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use tidal_core::MemoryBackend;

    fn writer() -> DeltaWriter {
        let uri = TableUri::parse("memory://writer-tests").unwrap();
        let storage =
            TableStorage::with_prefix(Arc::new(MemoryBackend::new()), uri, "writer-tests").unwrap();
        DeltaWriter::new(storage)
    }

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("year", DataType::Int32, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Int32Array::from(vec![2023, 2024])),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_zero_batches_need_a_schema() {
        let err = writer()
            .write(&[], &WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeltaError::SchemaMismatch { .. }));

        let outcome = writer()
            .write(&[], &WriteOptions::default().with_schema(batch().schema()))
            .await
            .unwrap();
        assert_eq!(outcome.version(), 0);
        assert!(outcome.files.is_empty());
    }

    #[tokio::test]
    async fn test_append_inherits_table_partitioning() {
        let writer = writer();
        writer
            .write(&[batch()], &WriteOptions::default().partition_by(["year"]))
            .await
            .unwrap();

        let outcome = writer
            .write(&[batch()], &WriteOptions::new(WriteMode::Append))
            .await
            .unwrap();
        assert_eq!(outcome.version(), 1);
        assert!(outcome.files.iter().all(|f| f.path.starts_with("year=")));

        let err = writer
            .write(&[batch()], &WriteOptions::new(WriteMode::Append).partition_by(["id"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DeltaError::PartitionSpecMismatch { .. }));
    }

    #[tokio::test]
    async fn test_extra_columns_are_rejected() {
        let narrow = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let err = writer()
            .write(&[batch()], &WriteOptions::default().with_schema(narrow))
            .await
            .unwrap_err();
        assert!(matches!(err, DeltaError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_invalid_mode_string() {
        assert!(matches!(
            WriteOptions::with_mode_str("upsert"),
            Err(DeltaError::InvalidMode { .. })
        ));
    }
}
