//! Commit log actions.
//!
//! A commit file `_delta_log/{version:020}.json` holds one JSON action per
//! line. Reading is lenient: unknown action kinds and unknown fields are
//! skipped, so logs written by newer writers still load.
//!
//! ```text
//! {"commitInfo":{"timestamp":1700000000000,"operation":"WRITE",...}}
//! {"protocol":{"minReaderVersion":1,"minWriterVersion":2}}
//! {"metaData":{"id":"...","schemaString":"{...}","partitionColumns":["year"],...}}
//! {"add":{"path":"year=2024/part-00000-....snappy.parquet","partitionValues":{"year":"2024"},...}}
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tidal_core::TableStorage;

use crate::error::{DeltaError, Result};

/// Partition values as stored in the log: column name to string or null.
pub type PartitionValueMap = BTreeMap<String, Option<String>>;

/// Reader/writer feature gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    /// Minimum reader version able to read the table.
    pub min_reader_version: i32,
    /// Minimum writer version able to write the table.
    pub min_writer_version: i32,
}

/// Data file format descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    /// Always `parquet`.
    pub provider: String,
    /// Format options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            provider: "parquet".to_string(),
            options: BTreeMap::new(),
        }
    }
}

/// Table metadata: schema, partitioning, properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Unique table id.
    pub id: String,
    /// Optional table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Data file format.
    #[serde(default)]
    pub format: Format,
    /// Schema serialized as Delta schema JSON.
    pub schema_string: String,
    /// Ordered partition columns.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Table properties.
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
    /// Creation time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
}

impl Metadata {
    /// Returns true if the table records change data files.
    #[must_use]
    pub fn change_data_feed_enabled(&self) -> bool {
        self.configuration
            .get(CHANGE_DATA_FEED_PROPERTY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }
}

/// Table property enabling change data files.
pub const CHANGE_DATA_FEED_PROPERTY: &str = "delta.enableChangeDataFeed";

/// Per-file statistics carried in `add.stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    /// Rows in the file.
    pub num_records: i64,
}

/// A data file becoming part of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Add {
    /// Table-relative path.
    pub path: String,
    /// Partition values of the file.
    #[serde(default)]
    pub partition_values: PartitionValueMap,
    /// File size in bytes.
    pub size: i64,
    /// Write time in milliseconds since the epoch.
    pub modification_time: i64,
    /// False for files that only rearrange existing rows.
    pub data_change: bool,
    /// JSON-encoded [`FileStats`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
}

impl Add {
    /// Row count from `stats`, if recorded.
    #[must_use]
    pub fn num_records(&self) -> Option<i64> {
        let stats = self.stats.as_deref()?;
        serde_json::from_str::<FileStats>(stats)
            .ok()
            .map(|s| s.num_records)
    }

    /// The `remove` action that logically deletes this file.
    #[must_use]
    pub fn to_remove(&self, deletion_timestamp: i64) -> Remove {
        Remove {
            path: self.path.clone(),
            deletion_timestamp: Some(deletion_timestamp),
            data_change: true,
            extended_file_metadata: Some(true),
            partition_values: Some(self.partition_values.clone()),
            size: Some(self.size),
            stats: self.stats.clone(),
        }
    }
}

/// A data file leaving the table. The file itself is not deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Remove {
    /// Table-relative path.
    pub path: String,
    /// Removal time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,
    /// False for files that only rearrange existing rows.
    pub data_change: bool,
    /// True when partition values and size are present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_file_metadata: Option<bool>,
    /// Partition values of the removed file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<PartitionValueMap>,
    /// File size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Stats copied from the original `add`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
}

impl Remove {
    /// Row count from `stats`, if recorded.
    #[must_use]
    pub fn num_records(&self) -> Option<i64> {
        let stats = self.stats.as_deref()?;
        serde_json::from_str::<FileStats>(stats)
            .ok()
            .map(|s| s.num_records)
    }
}

/// A change data file: rows tagged with `_change_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCdcFile {
    /// Table-relative path.
    pub path: String,
    /// Partition values of the file.
    #[serde(default)]
    pub partition_values: PartitionValueMap,
    /// File size in bytes.
    pub size: i64,
    /// Always false: change files never alter the table's data.
    #[serde(default)]
    pub data_change: bool,
}

/// Provenance of a commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    /// Commit time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Operation name, e.g. `WRITE` or `CREATE TABLE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    /// Operation parameters, values JSON-encoded as strings.
    #[serde(default)]
    pub operation_parameters: BTreeMap<String, String>,
    /// Version the writer read before committing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_version: Option<i64>,
    /// True if the commit only added files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_blind_append: Option<bool>,
    /// Writer identification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_info: Option<String>,
    /// Caller-supplied commit metadata.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Application transaction marker for idempotent writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Txn {
    /// Application id.
    pub app_id: String,
    /// Application-defined version.
    pub version: i64,
    /// Last update time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
}

/// One line of a commit file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// `protocol`
    Protocol(Protocol),
    /// `metaData`
    #[serde(rename = "metaData")]
    Metadata(Metadata),
    /// `add`
    Add(Add),
    /// `remove`
    Remove(Remove),
    /// `cdc`
    Cdc(AddCdcFile),
    /// `commitInfo`
    CommitInfo(CommitInfo),
    /// `txn`
    Txn(Txn),
}

/// Lenient line shape: every known kind optional, everything else ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    protocol: Option<Protocol>,
    #[serde(rename = "metaData")]
    meta_data: Option<Metadata>,
    add: Option<Add>,
    remove: Option<Remove>,
    cdc: Option<AddCdcFile>,
    commit_info: Option<CommitInfo>,
    txn: Option<Txn>,
}

impl RawAction {
    fn into_action(self) -> Option<Action> {
        if let Some(p) = self.protocol {
            return Some(Action::Protocol(p));
        }
        if let Some(m) = self.meta_data {
            return Some(Action::Metadata(m));
        }
        if let Some(a) = self.add {
            return Some(Action::Add(a));
        }
        if let Some(r) = self.remove {
            return Some(Action::Remove(r));
        }
        if let Some(c) = self.cdc {
            return Some(Action::Cdc(c));
        }
        if let Some(c) = self.commit_info {
            return Some(Action::CommitInfo(c));
        }
        self.txn.map(Action::Txn)
    }
}

/// One immutable log version.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEntry {
    /// Log version.
    pub version: u64,
    /// Actions in file order.
    pub actions: Vec<Action>,
}

impl CommitEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(version: u64, actions: Vec<Action>) -> Self {
        Self { version, actions }
    }

    /// Parses a commit file.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::CorruptLog`] if a line is not valid JSON or a
    /// known action is malformed.
    pub fn from_bytes(version: u64, bytes: &[u8]) -> Result<Self> {
        let path = TableStorage::log_path(version);
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DeltaError::corrupt_log(&path, format!("not UTF-8: {e}")))?;

        let mut actions = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let raw: RawAction = serde_json::from_str(line).map_err(|e| {
                DeltaError::corrupt_log(&path, format!("line {}: {e}", line_no + 1))
            })?;
            if let Some(action) = raw.into_action() {
                actions.push(action);
            }
        }

        Ok(Self { version, actions })
    }

    /// Serializes to newline-delimited JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DeltaError::Serialization`] if an action cannot be encoded.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut out = Vec::new();
        for action in &self.actions {
            serde_json::to_writer(&mut out, action).map_err(|e| {
                DeltaError::serialization(format!("failed to encode log action: {e}"))
            })?;
            out.push(b'\n');
        }
        Ok(Bytes::from(out))
    }

    /// Files added, in commit order.
    pub fn adds(&self) -> impl Iterator<Item = &Add> {
        self.actions.iter().filter_map(|a| match a {
            Action::Add(add) => Some(add),
            _ => None,
        })
    }

    /// Files removed, in commit order.
    pub fn removes(&self) -> impl Iterator<Item = &Remove> {
        self.actions.iter().filter_map(|a| match a {
            Action::Remove(remove) => Some(remove),
            _ => None,
        })
    }

    /// Change data files, in commit order.
    pub fn cdc_files(&self) -> impl Iterator<Item = &AddCdcFile> {
        self.actions.iter().filter_map(|a| match a {
            Action::Cdc(cdc) => Some(cdc),
            _ => None,
        })
    }

    /// The commit's `commitInfo`, if any.
    #[must_use]
    pub fn commit_info(&self) -> Option<&CommitInfo> {
        self.actions.iter().find_map(|a| match a {
            Action::CommitInfo(info) => Some(info),
            _ => None,
        })
    }

    /// The commit's `metaData`, if it changed the metadata.
    #[must_use]
    pub fn metadata(&self) -> Option<&Metadata> {
        self.actions.iter().find_map(|a| match a {
            Action::Metadata(m) => Some(m),
            _ => None,
        })
    }

    /// The commit's `protocol`, if it changed the protocol.
    #[must_use]
    pub fn protocol(&self) -> Option<&Protocol> {
        self.actions.iter().find_map(|a| match a {
            Action::Protocol(p) => Some(p),
            _ => None,
        })
    }

    /// Commit timestamp from `commitInfo`.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        self.commit_info().and_then(|c| c.timestamp)
    }

    /// Distinct partition values of every file touched, first-seen order.
    #[must_use]
    pub fn partition_values_touched(&self) -> Vec<PartitionValueMap> {
        let mut seen: Vec<PartitionValueMap> = Vec::new();
        let touched = self
            .adds()
            .map(|a| Some(&a.partition_values))
            .chain(self.removes().map(|r| r.partition_values.as_ref()))
            .chain(self.cdc_files().map(|c| Some(&c.partition_values)))
            .flatten();
        for values in touched {
            if !values.is_empty() && !seen.contains(values) {
                seen.push(values.clone());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(path: &str, year: Option<&str>, rows: i64) -> Add {
        let mut partition_values = PartitionValueMap::new();
        partition_values.insert("year".into(), year.map(str::to_string));
        Add {
            path: path.into(),
            partition_values,
            size: 100,
            modification_time: 1_700_000_000_000,
            data_change: true,
            stats: Some(format!("{{\"numRecords\":{rows}}}")),
        }
    }

    #[test]
    fn test_entry_serializes_one_action_per_line() {
        let entry = CommitEntry::new(
            0,
            vec![
                Action::Protocol(Protocol {
                    min_reader_version: 1,
                    min_writer_version: 2,
                }),
                Action::Add(add("year=2024/a.parquet", Some("2024"), 5)),
                Action::CommitInfo(CommitInfo {
                    timestamp: Some(1_700_000_000_000),
                    operation: Some("WRITE".into()),
                    ..CommitInfo::default()
                }),
            ],
        );

        let bytes = entry.to_bytes().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("{\"protocol\":{\"minReaderVersion\":1"));
        assert!(lines[1].starts_with("{\"add\":"));
        assert!(lines[1].contains("\"partitionValues\":{\"year\":\"2024\"}"));
        assert!(lines[2].starts_with("{\"commitInfo\":"));

        let parsed = CommitEntry::from_bytes(0, &bytes).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.timestamp(), Some(1_700_000_000_000));
        assert_eq!(parsed.adds().next().unwrap().num_records(), Some(5));
    }

    #[test]
    fn test_unknown_kinds_and_fields_ignored() {
        let text = concat!(
            "{\"domainMetadata\":{\"domain\":\"x\",\"configuration\":\"{}\",\"removed\":false}}\n",
            "{\"add\":{\"path\":\"a.parquet\",\"partitionValues\":{},\"size\":1,",
            "\"modificationTime\":2,\"dataChange\":true,\"tags\":{\"k\":\"v\"},\"baseRowId\":7}}\n",
            "\n",
        );
        let entry = CommitEntry::from_bytes(3, text.as_bytes()).unwrap();
        assert_eq!(entry.actions.len(), 1);
        assert_eq!(entry.adds().count(), 1);
        assert!(entry.adds().next().unwrap().num_records().is_none());
    }

    #[test]
    fn test_malformed_line_is_corrupt_log() {
        let err = CommitEntry::from_bytes(7, b"{\"add\":{\"path\":1}}\n").unwrap_err();
        match err {
            DeltaError::CorruptLog { path, message } => {
                assert_eq!(path, "_delta_log/00000000000000000007.json");
                assert!(message.starts_with("line 1"));
            }
            other => panic!("expected CorruptLog, got {other:?}"),
        }
        assert!(CommitEntry::from_bytes(7, b"not json").is_err());
    }

    #[test]
    fn test_null_partition_values_and_touched() {
        let entry = CommitEntry::new(
            1,
            vec![
                Action::Add(add("year=2024/a.parquet", Some("2024"), 1)),
                Action::Add(add("year=2024/b.parquet", Some("2024"), 1)),
                Action::Add(add("year=__HIVE_DEFAULT_PARTITION__/c.parquet", None, 1)),
            ],
        );
        let bytes = entry.to_bytes().unwrap();
        assert!(std::str::from_utf8(&bytes)
            .unwrap()
            .contains("\"partitionValues\":{\"year\":null}"));

        let touched = entry.partition_values_touched();
        assert_eq!(touched.len(), 2);
        assert_eq!(touched[1].get("year"), Some(&None));
    }

    #[test]
    fn test_remove_keeps_stats() {
        let remove = add("a.parquet", Some("2024"), 9).to_remove(42);
        assert_eq!(remove.deletion_timestamp, Some(42));
        assert_eq!(remove.num_records(), Some(9));
        assert!(remove.data_change);
    }

    #[test]
    fn test_commit_info_extra_fields_flatten() {
        let mut info = CommitInfo {
            timestamp: Some(1),
            ..CommitInfo::default()
        };
        info.extra
            .insert("userName".into(), serde_json::Value::String("etl".into()));
        let entry = CommitEntry::new(0, vec![Action::CommitInfo(info)]);
        let bytes = entry.to_bytes().unwrap();
        assert!(std::str::from_utf8(&bytes).unwrap().contains("\"userName\":\"etl\""));
        let parsed = CommitEntry::from_bytes(0, &bytes).unwrap();
        assert_eq!(
            parsed.commit_info().unwrap().extra.get("userName"),
            Some(&serde_json::Value::String("etl".into()))
        );
    }
}
