//! Commit protocol.
//!
//! A write becomes visible by creating the next log version file with a
//! create-if-absent write. The log is never locked: racing writers both try
//! to create version `N`, exactly one succeeds, and the loser reloads the
//! table and re-applies the mode transition against what it now sees.
//!
//! | Mode | No table | Table exists |
//! |---|---|---|
//! | `Append` | version 0 with the new files | new version adding files |
//! | `Overwrite` | version 0 with the new files | new version removing every live file |
//! | `Error` | version 0 | `AlreadyExists` |
//! | `Ignore` | version 0 | no-op |

use std::collections::BTreeMap;
use std::time::Instant;

use arrow::datatypes::Schema;
use chrono::Utc;
use tidal_core::TableStorage;
use uuid::Uuid;

use crate::actions::{Action, CommitInfo, Format, Metadata, Protocol};
use crate::config::EngineConfig;
use crate::coordinator::DataFileDescriptor;
use crate::error::{DeltaError, Result};
use crate::log::{self, CommitAttempt};
use crate::metrics;
use crate::mode::WriteMode;
use crate::partition::PartitionSpec;
use crate::schema::{ensure_compatible, schema_to_json};
use crate::table::{TableHandle, TableLookup};

/// Writer identification recorded in `commitInfo.engineInfo`.
pub const ENGINE_INFO: &str = concat!("tidal-delta/", env!("CARGO_PKG_VERSION"));

/// What a write does given the current table state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    /// No table exists: create version 0.
    Create,
    /// Add files to the existing table.
    Append,
    /// Replace every live file of the existing table.
    Overwrite,
    /// Leave the existing table untouched.
    Skip,
}

impl WriteDecision {
    /// Returns true if the write must produce data files.
    #[must_use]
    pub fn writes_files(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// Table-level settings applied when a commit writes new metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitOptions {
    /// Table name.
    pub name: Option<String>,
    /// Table description.
    pub description: Option<String>,
    /// Table properties, e.g. `delta.enableChangeDataFeed`.
    pub configuration: BTreeMap<String, String>,
    /// Extra fields merged into `commitInfo`.
    pub commit_metadata: BTreeMap<String, serde_json::Value>,
}

/// Outcome of [`CommitProtocol::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// A new version was written.
    Committed {
        /// The new version.
        version: u64,
        /// `add` actions in the entry.
        files_added: usize,
        /// `remove` actions in the entry.
        files_removed: usize,
    },
    /// `Ignore` hit an existing table; nothing was written.
    Skipped {
        /// The table's unchanged version.
        version: u64,
    },
}

impl CommitResult {
    /// The table version after the call.
    #[must_use]
    pub fn version(&self) -> u64 {
        match self {
            Self::Committed { version, .. } | Self::Skipped { version } => *version,
        }
    }

    /// Returns true if a version was written.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Applies write modes to the log with optimistic concurrency.
#[derive(Debug, Clone, Default)]
pub struct CommitProtocol {
    config: EngineConfig,
}

impl CommitProtocol {
    /// Creates a protocol with the config's retry bound.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Maps `(state, mode)` to a decision.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::AlreadyExists`] for `Error` mode on an existing
    /// table. Existence is log presence: a table with zero rows exists.
    pub fn decide(&self, lookup: &TableLookup, mode: WriteMode) -> Result<WriteDecision> {
        let TableLookup::Present(handle) = lookup else {
            return Ok(WriteDecision::Create);
        };
        match mode {
            WriteMode::Append => Ok(WriteDecision::Append),
            WriteMode::Overwrite => Ok(WriteDecision::Overwrite),
            WriteMode::Error => Err(DeltaError::AlreadyExists {
                uri: handle.uri().to_string(),
            }),
            WriteMode::Ignore => {
                tracing::info!(
                    table = %handle.uri(),
                    version = handle.version(),
                    "table exists; ignore mode leaves it unchanged"
                );
                Ok(WriteDecision::Skip)
            }
        }
    }

    /// Appends one log entry for `new_files`.
    ///
    /// `lookup` is the state the caller observed before producing files. After
    /// a lost race the table is reloaded and the decision, partition and
    /// schema checks run again against the new state.
    ///
    /// # Errors
    ///
    /// - [`DeltaError::InvalidPartitionColumns`] if `spec` is not in `schema`
    /// - [`DeltaError::AlreadyExists`] for `Error` mode on an existing table
    /// - [`DeltaError::PartitionSpecMismatch`] or [`DeltaError::SchemaMismatch`]
    ///   if an append does not fit the table
    /// - [`DeltaError::ConcurrentCommitConflict`] once the retry bound is spent
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(
        skip_all,
        fields(table = %storage.uri(), mode = %mode, files = new_files.len())
    )]
    pub async fn commit(
        &self,
        storage: &TableStorage,
        lookup: TableLookup,
        mode: WriteMode,
        new_files: &[DataFileDescriptor],
        spec: &PartitionSpec,
        schema: &Schema,
        options: &CommitOptions,
    ) -> Result<CommitResult> {
        spec.validate(schema)?;

        let started = Instant::now();
        let result = self
            .commit_inner(storage, lookup, mode, new_files, spec, schema, options)
            .await;
        let outcome = match &result {
            Ok(CommitResult::Committed { .. }) => "committed",
            Ok(CommitResult::Skipped { .. }) => "skipped",
            Err(_) => "failed",
        };
        metrics::record_commit(mode.as_str(), outcome, started.elapsed().as_secs_f64());
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn commit_inner(
        &self,
        storage: &TableStorage,
        mut lookup: TableLookup,
        mode: WriteMode,
        new_files: &[DataFileDescriptor],
        spec: &PartitionSpec,
        schema: &Schema,
        options: &CommitOptions,
    ) -> Result<CommitResult> {
        let max_attempts = self.config.max_commit_attempts.max(1);
        let mut version = 0;

        for attempt in 1..=max_attempts {
            let decision = self.decide(&lookup, mode)?;
            if decision == WriteDecision::Skip {
                return Ok(CommitResult::Skipped {
                    version: lookup.version().unwrap_or_default(),
                });
            }

            let now = Utc::now().timestamp_millis();
            let actions = build_actions(
                decision,
                lookup.handle(),
                mode,
                new_files,
                spec,
                schema,
                options,
                now,
            )?;
            let files_removed = actions
                .iter()
                .filter(|a| matches!(a, Action::Remove(_)))
                .count();
            version = lookup.version().map_or(0, |v| v + 1);

            match log::try_commit(storage, version, actions).await? {
                CommitAttempt::Committed => {
                    tracing::info!(
                        version,
                        files_added = new_files.len(),
                        files_removed,
                        attempt,
                        "committed"
                    );
                    return Ok(CommitResult::Committed {
                        version,
                        files_added: new_files.len(),
                        files_removed,
                    });
                }
                CommitAttempt::VersionTaken => {
                    metrics::record_commit_conflict(mode.as_str());
                    tracing::warn!(
                        version,
                        attempt,
                        max_attempts,
                        "lost race for log version; reloading table"
                    );
                    if attempt < max_attempts {
                        lookup = TableHandle::open_with_storage(storage.clone()).await?;
                    }
                }
            }
        }

        Err(DeltaError::ConcurrentCommitConflict {
            uri: storage.uri().to_string(),
            version,
            attempts: max_attempts,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn build_actions(
    decision: WriteDecision,
    handle: Option<&TableHandle>,
    mode: WriteMode,
    new_files: &[DataFileDescriptor],
    spec: &PartitionSpec,
    schema: &Schema,
    options: &CommitOptions,
    now: i64,
) -> Result<Vec<Action>> {
    let mut actions = vec![Action::CommitInfo(commit_info(
        handle, mode, spec, options, decision, now,
    ))];

    match (decision, handle) {
        (WriteDecision::Append, Some(handle)) => {
            let table_columns = handle.partition_columns();
            if spec.columns() != table_columns && !(spec.is_empty() && new_files.is_empty()) {
                return Err(DeltaError::PartitionSpecMismatch {
                    table: table_columns.to_vec(),
                    requested: spec.columns().to_vec(),
                });
            }
            ensure_compatible(&handle.schema(), schema)?;
        }
        (WriteDecision::Overwrite, Some(handle)) => {
            let previous = handle.snapshot();
            let mut metadata = new_metadata(schema, spec, options, now)?;
            metadata.id.clone_from(&previous.metadata().id);
            metadata.created_time = previous.metadata().created_time;
            if metadata.name.is_none() {
                metadata.name.clone_from(&previous.metadata().name);
            }
            if metadata.description.is_none() {
                metadata
                    .description
                    .clone_from(&previous.metadata().description);
            }
            let mut configuration = previous.metadata().configuration.clone();
            configuration.extend(options.configuration.clone());
            metadata.configuration = configuration;

            let protocol = protocol_for(&metadata);
            if protocol.min_writer_version > previous.protocol().min_writer_version {
                actions.push(Action::Protocol(protocol));
            }
            actions.push(Action::Metadata(metadata));
            actions.extend(
                previous
                    .files()
                    .iter()
                    .map(|add| Action::Remove(add.to_remove(now))),
            );
        }
        _ => {
            let metadata = new_metadata(schema, spec, options, now)?;
            actions.push(Action::Protocol(protocol_for(&metadata)));
            actions.push(Action::Metadata(metadata));
        }
    }

    for file in new_files {
        actions.push(Action::Add(file.to_add(now)?));
    }
    Ok(actions)
}

fn new_metadata(
    schema: &Schema,
    spec: &PartitionSpec,
    options: &CommitOptions,
    now: i64,
) -> Result<Metadata> {
    Ok(Metadata {
        id: Uuid::new_v4().to_string(),
        name: options.name.clone(),
        description: options.description.clone(),
        format: Format::default(),
        schema_string: schema_to_json(schema)?,
        partition_columns: spec.columns().to_vec(),
        configuration: options.configuration.clone(),
        created_time: Some(now),
    })
}

/// Writer version 4 is the lowest that knows change data files.
fn protocol_for(metadata: &Metadata) -> Protocol {
    Protocol {
        min_reader_version: 1,
        min_writer_version: if metadata.change_data_feed_enabled() {
            4
        } else {
            2
        },
    }
}

fn commit_info(
    handle: Option<&TableHandle>,
    mode: WriteMode,
    spec: &PartitionSpec,
    options: &CommitOptions,
    decision: WriteDecision,
    now: i64,
) -> CommitInfo {
    let mut operation_parameters = BTreeMap::new();
    operation_parameters.insert("mode".to_string(), mode.as_operation_parameter().to_string());
    let partition_by =
        serde_json::to_string(spec.columns()).unwrap_or_else(|_| "[]".to_string());
    operation_parameters.insert("partitionBy".to_string(), partition_by);
    if !options.configuration.is_empty() {
        let configuration =
            serde_json::to_string(&options.configuration).unwrap_or_else(|_| "{}".to_string());
        operation_parameters.insert("configuration".to_string(), configuration);
    }

    CommitInfo {
        timestamp: Some(now),
        operation: Some(
            if decision == WriteDecision::Create {
                "CREATE TABLE"
            } else {
                "WRITE"
            }
            .to_string(),
        ),
        operation_parameters,
        read_version: handle.and_then(|h| i64::try_from(h.version()).ok()),
        is_blind_append: Some(matches!(decision, WriteDecision::Append | WriteDecision::Create)),
        engine_info: Some(ENGINE_INFO.to_string()),
        extra: options.commit_metadata.clone(),
    }
}
