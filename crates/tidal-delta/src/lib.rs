//! # tidal-delta
//!
//! Transactional writes, snapshot reads and change data feed for Delta
//! tables.
//!
//! A table is a directory of Parquet data files plus an ordered log under
//! `_delta_log/`. A version exists once its log entry exists, and log
//! entries are created with an atomic create-if-absent write, so two writers
//! can never both commit the same version.
//!
//! ## Write modes
//!
//! | Mode        | Table absent | Table present                           |
//! |-------------|--------------|-----------------------------------------|
//! | `append`    | create       | add files                               |
//! | `overwrite` | create       | remove every live file, add new ones    |
//! | `error`     | create       | fail with `AlreadyExists`, nothing written |
//! | `ignore`    | create       | no-op                                   |
//!
//! ## Components
//!
//! - [`DeltaWriter`]: validates, produces files through a
//!   [`WriteCoordinator`] and commits through [`CommitProtocol`]
//! - [`TableHandle`]: log replay, history and time travel
//! - [`TableReader`]: snapshot reads with partition filters
//! - [`ChangeFeedReader`]: row-level changes between versions
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidal_delta::prelude::*;
//!
//! let options = WriteOptions::new(WriteMode::Append).partition_by(["year"]);
//! let outcome = write_table("s3://bucket/events", &batches, &options).await?;
//! println!("committed version {}", outcome.version());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod actions;
pub mod change_feed;
pub mod commit;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod log;
pub mod metrics;
pub mod mode;
pub mod parquet_io;
pub mod partition;
pub mod reader;
pub mod schema;
pub mod table;
pub mod writer;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tidal_delta::prelude::*;
/// ```
pub mod prelude {
    pub use crate::change_feed::{ChangeBatch, ChangeFeedReader, ChangeType};
    pub use crate::config::EngineConfig;
    pub use crate::error::{DeltaError, Result};
    pub use crate::mode::WriteMode;
    pub use crate::reader::{ReadOptions, TableReader};
    pub use crate::table::{TableHandle, TableLookup};
    pub use crate::writer::{write_table, DeltaWriter, WriteOptions, WriteOutcome};
}

// Re-export key types at crate root for ergonomics
pub use change_feed::{ChangeBatch, ChangeFeedReader, ChangeStream, ChangeType};
pub use commit::{CommitOptions, CommitProtocol, CommitResult, WriteDecision};
pub use config::EngineConfig;
pub use coordinator::{
    DataFileDescriptor, LocalReadCoordinator, LocalWriteCoordinator, ReadCoordinator,
    WriteCoordinator, WritePlan,
};
pub use error::{DeltaError, Result};
pub use mode::WriteMode;
pub use partition::{PartitionSpec, PartitionValues};
pub use reader::{ReadOptions, TableReader};
pub use table::{ScanTask, Snapshot, TableHandle, TableLookup};
pub use writer::{write_table, DeltaWriter, WriteOptions, WriteOutcome};
