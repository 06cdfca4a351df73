//! # tidal-core
//!
//! Shared primitives for the tidal table engine.
//!
//! - **Table URIs**: [`TableUri`] and the [`StorageScheme`] that picks a
//!   credential provider and a storage backend
//! - **Storage**: the [`StorageBackend`] contract with its one hard guarantee
//!   (atomic create-if-absent), an in-memory backend and an `object_store`
//!   backend
//! - **Table storage**: [`TableStorage`], table-relative paths over a backend
//! - **Credentials**: [`StorageOptionsResolver`], best-effort ambient detection
//!   merged with caller overrides
//! - **Observability**: logging setup and table spans
//!
//! ## Example
//!
//! ```rust
//! use tidal_core::prelude::*;
//!
//! let uri = TableUri::parse("s3://bucket/events").unwrap();
//! let overrides: StorageOptions = [("AWS_REGION", "eu-west-1")].into_iter().collect();
//! let options = StorageOptionsResolver::new().resolve(&uri, &overrides);
//! assert_eq!(options.get("AWS_REGION"), Some("eu-west-1"));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod credentials;
pub mod error;
pub mod object_store_backend;
pub mod observability;
pub mod storage;
pub mod table_storage;
pub mod uri;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use tidal_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::credentials::{StorageOptions, StorageOptionsResolver};
    pub use crate::error::{Error, Result};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
    pub use crate::table_storage::TableStorage;
    pub use crate::uri::{StorageScheme, TableUri};
}

// Re-export key types at crate root for ergonomics
pub use credentials::{
    AmbientEnvironment, AzureTokenSource, CredentialProvider, DetectionError, ProcessEnvironment,
    StaticEnvironment, StorageOptions, StorageOptionsResolver,
};
pub use error::{Error, Result};
pub use object_store_backend::ObjectStoreBackend;
pub use observability::{init_logging, table_span, LogFormat, Redacted};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
pub use table_storage::TableStorage;
pub use uri::{StorageScheme, TableUri};
