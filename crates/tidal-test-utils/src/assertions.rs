//! Custom assertion helpers for integration tests.

use crate::fixtures::TestTable;
use crate::storage::StorageOp;

/// Asserts that the table's log holds exactly `expected` versions.
///
/// # Panics
///
/// Panics if the committed versions differ.
pub fn assert_log_versions(table: &TestTable, expected: &[u64]) {
    let actual = table.log_versions();
    assert_eq!(
        actual, expected,
        "Expected log versions {expected:?}, found {actual:?}"
    );
}

/// Asserts that no data file exists under the table.
///
/// # Panics
///
/// Panics if any `.parquet` file was written.
pub fn assert_no_data_files(table: &TestTable) {
    let files = table.data_files();
    assert!(files.is_empty(), "Expected no data files, found {files:?}");
}

/// Asserts that no operation wrote anything.
///
/// # Panics
///
/// Panics if any recorded operation is a put.
pub fn assert_no_writes(ops: &[StorageOp]) {
    let puts: Vec<&str> = ops
        .iter()
        .filter(|op| op.is_put())
        .map(StorageOp::path)
        .collect();
    assert!(puts.is_empty(), "Expected no writes, found {puts:?}");
}

/// Asserts that every data file sits under a `col=value` directory chain
/// matching `columns`, in order.
///
/// # Panics
///
/// Panics if a data file is not nested by `columns`.
pub fn assert_partitioned_by(table: &TestTable, columns: &[&str]) {
    for file in table.data_files() {
        let segments: Vec<&str> = file.split('/').collect();
        assert_eq!(
            segments.len(),
            columns.len() + 1,
            "Data file {file} not nested by {columns:?}"
        );
        for (segment, column) in segments.iter().zip(columns) {
            assert!(
                segment.starts_with(&format!("{column}=")),
                "Data file {file}: segment {segment} is not a {column}= directory"
            );
        }
    }
}
