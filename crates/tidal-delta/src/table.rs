//! Table handles and snapshots.
//!
//! [`TableHandle::open`] answers "is there a table here?" with a two-variant
//! [`TableLookup`]. A missing log is [`TableLookup::Absent`]; a location that
//! cannot be inspected is [`DeltaError::TableUnavailable`]. The two are never
//! conflated: a writer in `Error` mode must not create a table just because
//! storage was briefly unreachable.
//!
//! A handle caches the parsed log, so time travel and history need no further
//! I/O until [`TableHandle::refresh`].

use std::collections::HashSet;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use futures::{StreamExt as _, TryStreamExt as _};
use tidal_core::{StorageOptions, TableStorage, TableUri};

use crate::actions::{Add, CommitEntry, CommitInfo, Metadata, Protocol};
use crate::error::{DeltaError, Result};
use crate::log;
use crate::partition::PartitionValues;
use crate::schema::schema_from_json;

/// Highest reader version this crate implements.
pub const SUPPORTED_READER_VERSION: i32 = 1;

/// Log entries fetched concurrently while loading a table.
const LOG_READ_CONCURRENCY: usize = 16;

/// Result of probing a location for a table.
#[derive(Debug, Clone)]
pub enum TableLookup {
    /// A table with at least one committed version.
    Present(TableHandle),
    /// No committed version exists.
    Absent,
}

impl TableLookup {
    /// The handle, if a table exists.
    #[must_use]
    pub fn handle(&self) -> Option<&TableHandle> {
        match self {
            Self::Present(handle) => Some(handle),
            Self::Absent => None,
        }
    }

    /// Consumes the lookup, returning the handle if present.
    #[must_use]
    pub fn into_handle(self) -> Option<TableHandle> {
        match self {
            Self::Present(handle) => Some(handle),
            Self::Absent => None,
        }
    }

    /// Returns true if a table exists.
    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Current version, if a table exists.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.handle().map(TableHandle::version)
    }
}

/// One commit as reported by [`TableHandle::history`].
#[derive(Debug, Clone, PartialEq)]
pub struct CommitRecord {
    /// Log version.
    pub version: u64,
    /// The commit's provenance; empty if the entry had none.
    pub info: CommitInfo,
}

/// A data file selected for reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTask {
    /// Table-relative path.
    pub path: String,
    /// File size in bytes.
    pub size: i64,
    /// Partition values in table partition order.
    pub partition_values: PartitionValues,
    /// Rows in the file, if recorded.
    pub num_records: Option<i64>,
}

/// The table state at one version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: u64,
    timestamp: Option<i64>,
    protocol: Protocol,
    metadata: Metadata,
    schema: SchemaRef,
    files: Vec<Add>,
}

impl Snapshot {
    /// Replays `entries`, which must be versions `0..=n` in order.
    pub(crate) fn replay(entries: &[CommitEntry]) -> Result<Self> {
        let mut protocol: Option<Protocol> = None;
        let mut metadata: Option<(Metadata, SchemaRef)> = None;
        let mut files: Vec<Add> = Vec::new();

        for entry in entries {
            let path = TableStorage::log_path(entry.version);
            if let Some(p) = entry.protocol() {
                protocol = Some(p.clone());
            }
            if let Some(m) = entry.metadata() {
                let schema = schema_from_json(&m.schema_string)
                    .map_err(|e| DeltaError::corrupt_log(&path, format!("bad schema: {e}")))?;
                metadata = Some((m.clone(), schema));
            }

            let replaced: HashSet<&str> = entry
                .removes()
                .map(|r| r.path.as_str())
                .chain(entry.adds().map(|a| a.path.as_str()))
                .collect();
            if !replaced.is_empty() {
                files.retain(|f| !replaced.contains(f.path.as_str()));
            }
            files.extend(entry.adds().cloned());
        }

        let last = entries
            .last()
            .ok_or_else(|| DeltaError::corrupt_log(TableStorage::log_prefix(), "log is empty"))?;
        let path = TableStorage::log_path(last.version);
        let protocol = protocol
            .ok_or_else(|| DeltaError::corrupt_log(&path, "no protocol action in log"))?;
        if protocol.min_reader_version > SUPPORTED_READER_VERSION {
            return Err(DeltaError::UnsupportedProtocol {
                min_reader_version: protocol.min_reader_version,
            });
        }
        let (metadata, schema) =
            metadata.ok_or_else(|| DeltaError::corrupt_log(&path, "no metaData action in log"))?;

        Ok(Self {
            version: last.version,
            timestamp: last.timestamp(),
            protocol,
            metadata,
            schema,
            files,
        })
    }

    /// Snapshot version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Commit time of this version in milliseconds, if recorded.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Active protocol.
    #[must_use]
    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Active metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Table schema, including partition columns.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Partition columns in order.
    #[must_use]
    pub fn partition_columns(&self) -> &[String] {
        &self.metadata.partition_columns
    }

    /// Live data files in commit order.
    #[must_use]
    pub fn files(&self) -> &[Add] {
        &self.files
    }

    /// Total rows, or `None` if some file has no recorded row count.
    #[must_use]
    pub fn num_records(&self) -> Option<i64> {
        self.files.iter().map(Add::num_records).sum()
    }

    /// Files matching every `(column, value)` equality filter.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidPartitionColumns`] if a filter names a
    /// column that is not a partition column.
    pub fn scan_tasks(&self, filters: &[(String, Option<String>)]) -> Result<Vec<ScanTask>> {
        let columns = self.partition_columns();
        let missing: Vec<String> = filters
            .iter()
            .filter(|(c, _)| !columns.contains(c))
            .map(|(c, _)| c.clone())
            .collect();
        if !missing.is_empty() {
            return Err(DeltaError::InvalidPartitionColumns {
                missing,
                available: columns.to_vec(),
            });
        }

        Ok(self
            .files
            .iter()
            .map(|add| ScanTask {
                path: add.path.clone(),
                size: add.size,
                partition_values: PartitionValues::from_map(&add.partition_values, columns),
                num_records: add.num_records(),
            })
            .filter(|task| {
                filters
                    .iter()
                    .all(|(c, v)| task.partition_values.get(c) == Some(v.as_deref()))
            })
            .collect())
    }
}

/// An existing table at its latest loaded version.
#[derive(Debug, Clone)]
pub struct TableHandle {
    storage: TableStorage,
    log: Arc<Vec<CommitEntry>>,
    snapshot: Arc<Snapshot>,
}

impl TableHandle {
    /// Opens the table at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::TableUnavailable`] if the URI is malformed or the
    /// location cannot be inspected, and [`DeltaError::CorruptLog`] if a log
    /// entry does not parse.
    #[tracing::instrument(skip(options), fields(table = %uri))]
    pub async fn open(uri: &str, options: &StorageOptions) -> Result<TableLookup> {
        let parsed = TableUri::parse(uri).map_err(|e| DeltaError::unavailable(uri, e))?;
        let storage =
            TableStorage::open(&parsed, options).map_err(|e| DeltaError::unavailable(uri, e))?;
        Self::open_with_storage(storage).await
    }

    /// Opens the table behind an existing storage handle.
    ///
    /// # Errors
    ///
    /// See [`TableHandle::open`].
    pub async fn open_with_storage(storage: TableStorage) -> Result<TableLookup> {
        let entries = load_entries(&storage, 0).await?;
        if entries.is_empty() {
            tracing::debug!(table = %storage.uri(), "no committed versions");
            return Ok(TableLookup::Absent);
        }
        let snapshot = Snapshot::replay(&entries)?;
        tracing::debug!(table = %storage.uri(), version = snapshot.version(), "opened table");
        Ok(TableLookup::Present(Self {
            storage,
            log: Arc::new(entries),
            snapshot: Arc::new(snapshot),
        }))
    }

    /// Table location.
    #[must_use]
    pub fn uri(&self) -> &TableUri {
        self.storage.uri()
    }

    /// Table-scoped storage.
    #[must_use]
    pub fn storage(&self) -> &TableStorage {
        &self.storage
    }

    /// Latest loaded version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    /// Current schema, including partition columns.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        self.snapshot.schema()
    }

    /// Current partition columns.
    #[must_use]
    pub fn partition_columns(&self) -> &[String] {
        self.snapshot.partition_columns()
    }

    /// Returns true if the table has no live data files.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.files().is_empty()
    }

    /// Latest loaded snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Parsed log entry `version`, if loaded.
    #[must_use]
    pub fn entry(&self, version: u64) -> Option<&CommitEntry> {
        usize::try_from(version).ok().and_then(|i| self.log.get(i))
    }

    /// Snapshot at an earlier version.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidVersionRange`] if `version` is newer than
    /// the loaded version.
    pub fn load_version(&self, version: u64) -> Result<Snapshot> {
        let latest = self.version();
        if version == latest {
            return Ok((*self.snapshot).clone());
        }
        let end = usize::try_from(version)
            .ok()
            .filter(|_| version < latest)
            .ok_or(DeltaError::InvalidVersionRange {
                start: version,
                end: version,
                latest,
            })?;
        Snapshot::replay(&self.log[..=end])
    }

    /// Commits newest first, at most `limit` of them.
    #[must_use]
    pub fn history(&self, limit: Option<usize>) -> Vec<CommitRecord> {
        self.log
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|entry| CommitRecord {
                version: entry.version,
                info: entry.commit_info().cloned().unwrap_or_default(),
            })
            .collect()
    }

    /// Latest version committed at or before `timestamp_ms`.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::InvalidTimestamp`] if every commit is newer.
    pub fn version_at(&self, timestamp_ms: i64) -> Result<u64> {
        self.log
            .iter()
            .rev()
            .find(|entry| entry.timestamp().is_some_and(|ts| ts <= timestamp_ms))
            .map(|entry| entry.version)
            .ok_or(DeltaError::InvalidTimestamp { timestamp_ms })
    }

    /// Loads versions committed since this handle was opened.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::TableUnavailable`] if storage cannot be read and
    /// [`DeltaError::CorruptLog`] if a new entry does not parse.
    pub async fn refresh(&mut self) -> Result<()> {
        let next = self.version() + 1;
        let newer = load_entries(&self.storage, next).await?;
        if newer.is_empty() {
            return Ok(());
        }
        let mut entries = (*self.log).clone();
        entries.extend(newer);
        self.snapshot = Arc::new(Snapshot::replay(&entries)?);
        self.log = Arc::new(entries);
        tracing::debug!(table = %self.uri(), version = self.version(), "refreshed table");
        Ok(())
    }
}

/// Reads entries `from..=latest`, checking the versions are contiguous.
async fn load_entries(storage: &TableStorage, from: u64) -> Result<Vec<CommitEntry>> {
    let uri = storage.uri().to_string();
    let versions: Vec<u64> = log::list_versions(storage)
        .await
        .map_err(|e| DeltaError::unavailable(&uri, e))?
        .into_iter()
        .filter(|v| *v >= from)
        .collect();

    for (expected, version) in (from..).zip(&versions) {
        if *version != expected {
            return Err(DeltaError::corrupt_log(
                TableStorage::log_path(expected),
                format!("log entry missing; next present version is {version}"),
            ));
        }
    }

    futures::stream::iter(versions)
        .map(|version| log::read_entry(storage, version))
        .buffered(LOG_READ_CONCURRENCY)
        .map_err(|e| match e {
            DeltaError::Storage(source) => DeltaError::unavailable(&uri, source),
            other => other,
        })
        .try_collect()
        .await
}
