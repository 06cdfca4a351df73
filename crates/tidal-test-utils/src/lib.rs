//! Shared test utilities for tidal integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: In-memory storage with operation recording and
//!   failure injection
//! - [`TestTable`]: a table location on a shared tracing backend
//! - Arrow batch fixtures
//! - Log and layout assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use tidal_test_utils::{assert_log_versions, range_batch, TestTable};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let table = TestTable::new();
//!     let writer = DeltaWriter::new(table.storage());
//!     writer.write(&[range_batch(100)], &WriteOptions::default()).await.unwrap();
//!     assert_log_versions(&table, &[0]);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tidal=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
