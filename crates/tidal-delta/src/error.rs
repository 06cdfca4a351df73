//! Error types for `tidal-delta`.
//!
//! Every variant names what the caller needs to act on: the offending mode
//! string, the missing columns, the table URI or the version range.

/// Result type for table operations.
pub type Result<T> = std::result::Result<T, DeltaError>;

/// Table-format errors.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    /// A write mode string is not one of `append`, `overwrite`, `error`, `ignore`.
    #[error("invalid write mode '{mode}': expected one of append, overwrite, error, ignore")]
    InvalidMode {
        /// The rejected mode string.
        mode: String,
    },

    /// Partition columns are missing from the data schema.
    #[error("partition columns {missing:?} not found in schema (available: {available:?})")]
    InvalidPartitionColumns {
        /// Requested columns absent from the schema.
        missing: Vec<String>,
        /// Columns the schema does have.
        available: Vec<String>,
    },

    /// `Error` mode hit an existing table.
    #[error("table already exists at {uri}")]
    AlreadyExists {
        /// Table location.
        uri: String,
    },

    /// Another writer kept winning the race for the next log version.
    #[error(
        "concurrent commit conflict at {uri}: version {version} was taken and {attempts} attempts are exhausted"
    )]
    ConcurrentCommitConflict {
        /// Table location.
        uri: String,
        /// The last version this writer tried to create.
        version: u64,
        /// Attempts made before giving up.
        attempts: usize,
    },

    /// A change-feed range is inverted or outside the table's versions.
    #[error("invalid version range {start}..={end}: latest table version is {latest}")]
    InvalidVersionRange {
        /// Requested start version.
        start: u64,
        /// Requested end version.
        end: u64,
        /// Latest committed version.
        latest: u64,
    },

    /// The table location could not be inspected. Never used for "no table".
    #[error("table at {uri} is unavailable: {source}")]
    TableUnavailable {
        /// Table location.
        uri: String,
        /// The underlying storage or URI error.
        #[source]
        source: Box<tidal_core::Error>,
    },

    /// An operation needs an existing table and none exists.
    #[error("no table exists at {uri}")]
    TableNotFound {
        /// Table location.
        uri: String,
    },

    /// Incoming data does not match the table schema.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Which column or type disagrees.
        message: String,
    },

    /// An append named partition columns different from the table's.
    #[error("partition columns {requested:?} do not match table partitioning {table:?}")]
    PartitionSpecMismatch {
        /// The table's partition columns.
        table: Vec<String>,
        /// The columns the write asked for.
        requested: Vec<String>,
    },

    /// A log entry could not be parsed or is inconsistent.
    #[error("corrupt commit log at {path}: {message}")]
    CorruptLog {
        /// Table-relative path of the entry.
        path: String,
        /// What is wrong with it.
        message: String,
    },

    /// The table requires a newer reader than this crate implements.
    #[error("unsupported table protocol: minReaderVersion {min_reader_version} (supported: 1)")]
    UnsupportedProtocol {
        /// The table's minimum reader version.
        min_reader_version: i32,
    },

    /// No version was committed at or before the requested timestamp.
    #[error("no table version committed at or before timestamp {timestamp_ms}ms")]
    InvalidTimestamp {
        /// Requested timestamp, milliseconds since the epoch.
        timestamp_ms: i64,
    },

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] tidal_core::Error),

    /// Arrow compute or batch construction failed.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet encoding or decoding failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Failed to serialize/deserialize JSON.
    #[error("serialization error: {message}")]
    Serialization {
        /// Human-readable serialization details.
        message: String,
    },
}

impl DeltaError {
    /// Creates a schema mismatch error.
    #[must_use]
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Wraps a storage failure observed while inspecting `uri`.
    #[must_use]
    pub fn unavailable(uri: impl Into<String>, source: tidal_core::Error) -> Self {
        Self::TableUnavailable {
            uri: uri.into(),
            source: Box::new(source),
        }
    }

    /// Creates a corrupt log error.
    #[must_use]
    pub fn corrupt_log(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptLog {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if repeating the whole operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentCommitConflict { .. })
    }
}
