//! Snapshot reads.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use crate::config::EngineConfig;
use crate::coordinator::{LocalReadCoordinator, ReadCoordinator};
use crate::error::Result;
use crate::table::{Snapshot, TableHandle};

/// What to read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Version to read; latest when absent.
    pub version: Option<u64>,
    /// Equality filters on partition columns; `None` matches null values.
    pub partition_filters: Vec<(String, Option<String>)>,
}

impl ReadOptions {
    /// Reads `version` instead of the latest.
    #[must_use]
    pub fn at_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Keeps only files whose `column` equals `value`.
    #[must_use]
    pub fn with_partition(mut self, column: impl Into<String>, value: Option<&str>) -> Self {
        self.partition_filters
            .push((column.into(), value.map(str::to_string)));
        self
    }
}

/// Reads table snapshots into batches.
#[derive(Debug, Clone)]
pub struct TableReader {
    handle: TableHandle,
    coordinator: Arc<dyn ReadCoordinator>,
}

impl TableReader {
    /// Creates a reader with the default read collaborator.
    #[must_use]
    pub fn new(handle: TableHandle) -> Self {
        Self {
            handle,
            coordinator: Arc::new(LocalReadCoordinator::new(&EngineConfig::default())),
        }
    }

    /// Uses a custom read collaborator.
    #[must_use]
    pub fn with_coordinator(mut self, coordinator: Arc<dyn ReadCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    fn snapshot(&self, options: &ReadOptions) -> Result<Snapshot> {
        match options.version {
            Some(version) => self.handle.load_version(version),
            None => Ok(self.handle.snapshot().clone()),
        }
    }

    /// Reads matching rows in the table schema, file by file in commit order.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown version, a filter on a non-partition
    /// column or an unreadable file.
    #[tracing::instrument(skip_all, fields(table = %self.handle.uri(), version = ?options.version))]
    pub async fn read(&self, options: &ReadOptions) -> Result<Vec<RecordBatch>> {
        let snapshot = self.snapshot(options)?;
        let tasks = snapshot.scan_tasks(&options.partition_filters)?;
        self.coordinator
            .read(self.handle.storage(), &snapshot.schema(), &tasks)
            .await
    }

    /// Counts matching rows, from file stats when every file has them.
    ///
    /// # Errors
    ///
    /// See [`TableReader::read`].
    pub async fn count_rows(&self, options: &ReadOptions) -> Result<u64> {
        let snapshot = self.snapshot(options)?;
        let tasks = snapshot.scan_tasks(&options.partition_filters)?;
        let from_stats: Option<i64> = tasks.iter().map(|t| t.num_records).sum();
        if let Some(rows) = from_stats {
            return Ok(u64::try_from(rows).unwrap_or_default());
        }
        let batches = self
            .coordinator
            .read(self.handle.storage(), &snapshot.schema(), &tasks)
            .await?;
        Ok(batches.iter().map(|b| b.num_rows() as u64).sum())
    }
}
