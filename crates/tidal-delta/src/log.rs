//! Commit log access.
//!
//! The log is a directory of immutable entries numbered from zero. Appending
//! is the only mutation and it is a create-if-absent write of the next
//! version file: whoever creates `N.json` first owns version `N`.

use tidal_core::{TableStorage, WritePrecondition, WriteResult};

use crate::actions::{Action, CommitEntry};
use crate::error::Result;

/// Outcome of a single append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAttempt {
    /// This writer created the version file.
    Committed,
    /// Another writer created the version file first.
    VersionTaken,
}

fn parse_log_version(path: &str) -> Option<u64> {
    let name = path.strip_prefix(&TableStorage::log_prefix())?;
    let digits = name.strip_suffix(".json")?;
    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lists committed versions, ascending.
///
/// Checkpoints, checksum files and temporary files are ignored.
///
/// # Errors
///
/// Returns the storage error if the log cannot be listed.
pub async fn list_versions(storage: &TableStorage) -> tidal_core::Result<Vec<u64>> {
    let mut versions: Vec<u64> = storage
        .list(&TableStorage::log_prefix())
        .await?
        .iter()
        .filter_map(|meta| parse_log_version(&meta.path))
        .collect();
    versions.sort_unstable();
    versions.dedup();
    Ok(versions)
}

/// Returns the highest committed version, or `None` for an empty log.
///
/// # Errors
///
/// Returns the storage error if the log cannot be listed.
pub async fn latest_version(storage: &TableStorage) -> tidal_core::Result<Option<u64>> {
    Ok(list_versions(storage).await?.last().copied())
}

/// Reads and parses one log entry.
///
/// # Errors
///
/// Returns [`crate::DeltaError::Storage`] if the entry cannot be read and
/// [`crate::DeltaError::CorruptLog`] if it does not parse.
pub async fn read_entry(storage: &TableStorage, version: u64) -> Result<CommitEntry> {
    let bytes = storage.get(&TableStorage::log_path(version)).await?;
    CommitEntry::from_bytes(version, &bytes)
}

/// Attempts to create log entry `version` holding `actions`.
///
/// # Errors
///
/// Returns an error if the actions cannot be encoded or the write fails for
/// any reason other than the version already existing.
#[tracing::instrument(skip(storage, actions), fields(table = %storage.uri(), actions = actions.len()))]
pub async fn try_commit(
    storage: &TableStorage,
    version: u64,
    actions: Vec<Action>,
) -> Result<CommitAttempt> {
    let entry = CommitEntry::new(version, actions);
    let bytes = entry.to_bytes()?;
    let result = storage
        .put(
            &TableStorage::log_path(version),
            bytes,
            WritePrecondition::DoesNotExist,
        )
        .await?;
    Ok(match result {
        WriteResult::Success { .. } => CommitAttempt::Committed,
        WriteResult::PreconditionFailed { .. } => CommitAttempt::VersionTaken,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use tidal_core::{MemoryBackend, TableUri};

    use crate::actions::CommitInfo;

    fn storage() -> TableStorage {
        let uri = TableUri::parse("memory://log-tests").unwrap();
        TableStorage::with_prefix(Arc::new(MemoryBackend::new()), uri, "log-tests").unwrap()
    }

    fn info() -> Vec<Action> {
        vec![Action::CommitInfo(CommitInfo {
            timestamp: Some(1),
            operation: Some("WRITE".into()),
            ..CommitInfo::default()
        })]
    }

    #[test]
    fn test_parse_log_version() {
        assert_eq!(
            parse_log_version("_delta_log/00000000000000000007.json"),
            Some(7)
        );
        assert_eq!(parse_log_version("_delta_log/7.json"), None);
        assert_eq!(
            parse_log_version("_delta_log/00000000000000000007.checkpoint.parquet"),
            None
        );
        assert_eq!(parse_log_version("_delta_log/_last_checkpoint"), None);
        assert_eq!(parse_log_version("part-00000.parquet"), None);
    }

    #[tokio::test]
    async fn test_empty_log_has_no_versions() {
        let storage = storage();
        assert!(list_versions(&storage).await.unwrap().is_empty());
        assert_eq!(latest_version(&storage).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_second_writer_loses_version() {
        let storage = storage();
        assert_eq!(
            try_commit(&storage, 0, info()).await.unwrap(),
            CommitAttempt::Committed
        );
        assert_eq!(
            try_commit(&storage, 0, info()).await.unwrap(),
            CommitAttempt::VersionTaken
        );
        assert_eq!(
            try_commit(&storage, 1, info()).await.unwrap(),
            CommitAttempt::Committed
        );

        assert_eq!(list_versions(&storage).await.unwrap(), vec![0, 1]);
        assert_eq!(latest_version(&storage).await.unwrap(), Some(1));

        let entry = read_entry(&storage, 1).await.unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.timestamp(), Some(1));
    }

    #[tokio::test]
    async fn test_unrelated_log_files_are_ignored() {
        let storage = storage();
        storage
            .put(
                "_delta_log/_last_checkpoint",
                Bytes::from_static(b"{}"),
                WritePrecondition::None,
            )
            .await
            .unwrap();
        try_commit(&storage, 0, info()).await.unwrap();
        assert_eq!(list_versions(&storage).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_found() {
        let err = read_entry(&storage(), 3).await.unwrap_err();
        assert!(matches!(err, crate::DeltaError::Storage(ref e) if e.is_not_found()));
    }
}
