//! Integration tests for table discovery, log replay and snapshot reads.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::Bytes;
use tidal_core::{StorageOptions, TableStorage, WritePrecondition};
use tidal_delta::prelude::*;
use tidal_test_utils::{
    range_batch, range_batch_from, total_rows, year_month_batch, InjectedFailure, TestTable,
};

async fn write(table: &TestTable, rows: usize, start: i64) -> WriteOutcome {
    DeltaWriter::new(table.storage())
        .write(
            &[range_batch_from(start, rows)],
            &WriteOptions::new(WriteMode::Append),
        )
        .await
        .expect("write")
}

async fn open(table: &TestTable) -> TableHandle {
    TableHandle::open_with_storage(table.storage())
        .await
        .expect("open")
        .into_handle()
        .expect("table exists")
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn missing_table_is_absent() {
    let table = TestTable::new();
    let lookup = TableHandle::open_with_storage(table.storage())
        .await
        .expect("lookup");
    assert!(!lookup.is_present());
    assert_eq!(lookup.version(), None);
}

#[tokio::test]
async fn unreachable_storage_is_unavailable_not_absent() {
    let table = TestTable::new();
    write(&table, 5, 0).await;

    for kind in [InjectedFailure::Unavailable, InjectedFailure::PermissionDenied] {
        table.backend.clear_failures();
        table.backend.inject(format!("{}/", table.name), kind);

        let err = TableHandle::open_with_storage(table.storage())
            .await
            .expect_err("storage fails");
        assert!(
            matches!(err, DeltaError::TableUnavailable { .. }),
            "{kind:?}: {err}"
        );
    }
}

#[tokio::test]
async fn unavailable_table_fails_every_mode() {
    let table = TestTable::new();
    table.backend.inject_failure(format!("{}/", table.name));

    for mode in [WriteMode::Append, WriteMode::Error, WriteMode::Ignore] {
        let err = DeltaWriter::new(table.storage())
            .write(&[range_batch(5)], &WriteOptions::new(mode))
            .await
            .expect_err("unavailable");
        assert!(matches!(err, DeltaError::TableUnavailable { .. }), "{mode}: {err}");
    }
}

#[tokio::test]
async fn malformed_uri_is_unavailable() {
    let err = TableHandle::open("s3://", &StorageOptions::default())
        .await
        .expect_err("no bucket");
    assert!(matches!(err, DeltaError::TableUnavailable { .. }), "{err}");
}

#[tokio::test]
async fn empty_local_directory_is_absent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lookup = TableHandle::open(dir.path().to_str().unwrap(), &StorageOptions::default())
        .await
        .expect("lookup");
    assert!(!lookup.is_present());
}

// ============================================================================
// Log integrity
// ============================================================================

#[tokio::test]
async fn unparseable_entry_is_corrupt_log() {
    let table = TestTable::new();
    write(&table, 5, 0).await;
    table
        .storage()
        .put(
            &TableStorage::log_path(1),
            Bytes::from("{not json"),
            WritePrecondition::DoesNotExist,
        )
        .await
        .unwrap();

    let err = TableHandle::open_with_storage(table.storage())
        .await
        .expect_err("corrupt");
    match err {
        DeltaError::CorruptLog { path, .. } => {
            assert_eq!(path, "_delta_log/00000000000000000001.json");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn missing_version_is_corrupt_log() {
    let table = TestTable::new();
    write(&table, 5, 0).await;
    let storage = table.storage();
    let first = storage.get(&TableStorage::log_path(0)).await.unwrap();
    storage
        .put(
            &TableStorage::log_path(2),
            first,
            WritePrecondition::DoesNotExist,
        )
        .await
        .unwrap();

    let err = TableHandle::open_with_storage(storage)
        .await
        .expect_err("gap at version 1");
    assert!(matches!(err, DeltaError::CorruptLog { .. }), "{err}");
}

#[tokio::test]
async fn unrelated_log_files_are_ignored() {
    let table = TestTable::new();
    write(&table, 5, 0).await;
    let storage = table.storage();
    for path in [
        "_delta_log/00000000000000000000.crc",
        "_delta_log/.00000000000000000001.json.tmp",
        "_delta_log/_last_checkpoint",
    ] {
        storage
            .put(path, Bytes::from("x"), WritePrecondition::None)
            .await
            .unwrap();
    }

    assert_eq!(open(&table).await.version(), 0);
}

// ============================================================================
// History, time travel, refresh
// ============================================================================

#[tokio::test]
async fn history_is_newest_first() {
    let table = TestTable::new();
    for i in 0..3 {
        write(&table, 5, i * 5).await;
    }

    let handle = open(&table).await;
    let versions: Vec<u64> = handle.history(None).iter().map(|c| c.version).collect();
    assert_eq!(versions, vec![2, 1, 0]);
    assert_eq!(handle.history(Some(1)).len(), 1);

    let newest = &handle.history(Some(1))[0];
    assert_eq!(newest.info.operation.as_deref(), Some("WRITE"));
    assert_eq!(newest.info.read_version, Some(1));
    assert_eq!(newest.info.is_blind_append, Some(true));
}

#[tokio::test]
async fn version_at_resolves_timestamps() {
    let table = TestTable::new();
    for i in 0..3 {
        write(&table, 5, i * 5).await;
    }
    let handle = open(&table).await;
    let first_ts = handle.history(None)[2].info.timestamp.expect("timestamp");

    assert_eq!(handle.version_at(i64::MAX).unwrap(), 2);
    assert!(handle.version_at(first_ts).is_ok());
    let err = handle.version_at(first_ts - 1).expect_err("before creation");
    assert!(matches!(err, DeltaError::InvalidTimestamp { .. }));
}

#[tokio::test]
async fn old_versions_stay_readable() {
    let table = TestTable::new();
    write(&table, 10, 0).await;
    DeltaWriter::new(table.storage())
        .write(&[range_batch(3)], &WriteOptions::new(WriteMode::Overwrite))
        .await
        .unwrap();

    let reader = TableReader::new(open(&table).await);
    let now = reader.read(&ReadOptions::default()).await.unwrap();
    let before = reader
        .read(&ReadOptions::default().at_version(0))
        .await
        .unwrap();
    assert_eq!(total_rows(&now), 3);
    assert_eq!(total_rows(&before), 10);

    let err = reader
        .read(&ReadOptions::default().at_version(7))
        .await
        .expect_err("future version");
    assert!(matches!(err, DeltaError::InvalidVersionRange { .. }));
}

#[tokio::test]
async fn refresh_picks_up_new_commits() {
    let table = TestTable::new();
    write(&table, 5, 0).await;
    let mut handle = open(&table).await;

    write(&table, 5, 5).await;
    write(&table, 5, 10).await;
    assert_eq!(handle.version(), 0);

    handle.refresh().await.unwrap();
    assert_eq!(handle.version(), 2);
    assert_eq!(handle.snapshot().files().len(), 3);
    assert_eq!(handle.snapshot().num_records(), Some(15));

    handle.refresh().await.unwrap();
    assert_eq!(handle.version(), 2);
}

// ============================================================================
// Reader
// ============================================================================

#[tokio::test]
async fn partition_filters_prune_files() {
    let table = TestTable::new();
    DeltaWriter::new(table.storage())
        .write(
            &[year_month_batch()],
            &WriteOptions::new(WriteMode::Error).partition_by(["year"]),
        )
        .await
        .unwrap();

    let reader = TableReader::new(open(&table).await);
    let filter = ReadOptions::default().with_partition("year", Some("2024"));
    let batches = reader.read(&filter).await.unwrap();
    assert_eq!(total_rows(&batches), 2);
    assert_eq!(reader.count_rows(&filter).await.unwrap(), 2);
    assert_eq!(reader.count_rows(&ReadOptions::default()).await.unwrap(), 3);

    let none = ReadOptions::default().with_partition("year", Some("1999"));
    assert_eq!(reader.count_rows(&none).await.unwrap(), 0);

    let err = reader
        .read(&ReadOptions::default().with_partition("month", Some("1")))
        .await
        .expect_err("not a partition column");
    assert!(matches!(err, DeltaError::InvalidPartitionColumns { .. }));
}

#[tokio::test]
async fn reads_follow_commit_order() {
    let table = TestTable::new();
    write(&table, 2, 0).await;
    write(&table, 2, 10).await;

    let batches = TableReader::new(open(&table).await)
        .read(&ReadOptions::default())
        .await
        .unwrap();
    let first_ids: Vec<i64> = batches
        .iter()
        .map(|b| {
            b.column(0)
                .as_any()
                .downcast_ref::<arrow::array::Int64Array>()
                .unwrap()
                .value(0)
        })
        .collect();
    assert_eq!(first_ids, vec![0, 10]);
    assert_eq!(batches[0].schema().fields().len(), range_batch(0).num_columns());
}
