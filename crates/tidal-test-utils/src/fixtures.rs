//! Pre-built test fixtures for common test scenarios.
//!
//! Provides Arrow batches with sensible defaults and [`TestTable`], a table
//! location backed by a shared [`TracingMemoryBackend`].

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use tidal_core::{TableStorage, TableUri};

use crate::storage::TracingMemoryBackend;

/// A table location on a shared in-memory backend.
///
/// Tables created with [`TestTable::on`] share one backend, so a test can
/// model several writers (or several tables) against the same store.
#[derive(Debug, Clone)]
pub struct TestTable {
    /// Shared storage backend.
    pub backend: Arc<TracingMemoryBackend>,
    /// Key prefix of the table inside the backend.
    pub name: String,
}

impl TestTable {
    /// Creates a uniquely named table on a fresh backend.
    #[must_use]
    pub fn new() -> Self {
        Self::on(
            Arc::new(TracingMemoryBackend::new()),
            format!("table-{}", uuid::Uuid::new_v4().as_simple()),
        )
    }

    /// Creates a table named `name` on an existing backend.
    #[must_use]
    pub fn on(backend: Arc<TracingMemoryBackend>, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
        }
    }

    /// Table URI used in logs and errors.
    #[must_use]
    pub fn uri(&self) -> TableUri {
        TableUri::parse(&format!("memory://{}", self.name)).expect("valid memory uri")
    }

    /// Table-scoped storage over the shared backend.
    #[must_use]
    pub fn storage(&self) -> TableStorage {
        TableStorage::with_prefix(self.backend.clone(), self.uri(), self.name.clone())
            .expect("valid table prefix")
    }

    /// All stored paths of this table, relative to the table root, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let prefix = format!("{}/", self.name);
        self.backend
            .paths()
            .into_iter()
            .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Commit versions present in the log, ascending.
    #[must_use]
    pub fn log_versions(&self) -> Vec<u64> {
        let mut versions: Vec<u64> = self
            .paths()
            .iter()
            .filter_map(|p| p.strip_prefix("_delta_log/"))
            .filter_map(|f| f.strip_suffix(".json"))
            .filter_map(|v| v.parse().ok())
            .collect();
        versions.sort_unstable();
        versions
    }

    /// Data files written under the table root.
    #[must_use]
    pub fn data_files(&self) -> Vec<String> {
        self.paths()
            .into_iter()
            .filter(|p| p.ends_with(".parquet"))
            .collect()
    }
}

impl Default for TestTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Schema of [`range_batch`]: `id: Int64 NOT NULL`, `name: Utf8`.
#[must_use]
pub fn range_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

/// `n` rows with ids `0..n`.
#[must_use]
pub fn range_batch(n: usize) -> RecordBatch {
    range_batch_from(0, n)
}

/// `n` rows with ids `start..start + n`.
#[must_use]
pub fn range_batch_from(start: i64, n: usize) -> RecordBatch {
    let ids: Vec<i64> = (start..).take(n).collect();
    let names: Vec<String> = ids.iter().map(|i| format!("row-{i}")).collect();
    RecordBatch::try_new(
        range_schema(),
        vec![
            Arc::new(Int64Array::from(ids)) as ArrayRef,
            Arc::new(StringArray::from(names)) as ArrayRef,
        ],
    )
    .expect("valid range batch")
}

/// Schema of [`year_month_batch`].
#[must_use]
pub fn year_month_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::Int32, false),
        Field::new("amount", DataType::Float64, true),
    ]))
}

/// Three rows spanning two years: 2023-12, 2024-01, 2024-02.
#[must_use]
pub fn year_month_batch() -> RecordBatch {
    RecordBatch::try_new(
        year_month_schema(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
            Arc::new(Int32Array::from(vec![2023, 2024, 2024])) as ArrayRef,
            Arc::new(Int32Array::from(vec![12, 1, 2])) as ArrayRef,
            Arc::new(Float64Array::from(vec![10.0, 20.0, 30.0])) as ArrayRef,
        ],
    )
    .expect("valid year/month batch")
}

/// Four rows whose `category` column is half null.
#[must_use]
pub fn nullable_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("category", DataType::Utf8, true),
        Field::new("score", DataType::Float64, true),
    ]));
    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3, 4])) as ArrayRef,
            Arc::new(StringArray::from(vec![Some("a"), None, Some("b"), None])) as ArrayRef,
            Arc::new(Float64Array::from(vec![Some(1.5), None, None, Some(4.0)])) as ArrayRef,
        ],
    )
    .expect("valid nullable batch")
}

/// A zero-row batch with `schema`.
#[must_use]
pub fn empty_batch(schema: SchemaRef) -> RecordBatch {
    RecordBatch::new_empty(schema)
}

/// Total rows across batches.
#[must_use]
pub fn total_rows(batches: &[RecordBatch]) -> usize {
    batches.iter().map(RecordBatch::num_rows).sum()
}
