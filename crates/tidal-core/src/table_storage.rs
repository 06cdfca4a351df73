//! Table-scoped storage.
//!
//! A [`TableStorage`] addresses every object of one table by a path relative to
//! the table root (`_delta_log/00000000000000000003.json`,
//! `year=2024/part-00000-....parquet`). An optional key prefix lets several
//! tables share one backend, which is how tests put many tables in a single
//! [`MemoryBackend`](crate::storage::MemoryBackend).
//!
//! # Path rules
//!
//! Relative paths are validated before reaching the backend:
//! - no absolute paths
//! - no `.` or `..` segments
//! - no backslashes or control characters

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::credentials::StorageOptions;
use crate::error::{Error, Result};
use crate::object_store_backend::ObjectStoreBackend;
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
use crate::uri::TableUri;

/// Directory holding the commit log, relative to the table root.
pub const LOG_DIR: &str = "_delta_log";

/// Storage wrapper scoped to a single table.
#[derive(Clone)]
pub struct TableStorage {
    backend: Arc<dyn StorageBackend>,
    uri: TableUri,
    prefix: Option<String>,
}

impl fmt::Debug for TableStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableStorage")
            .field("uri", &self.uri.as_str())
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl TableStorage {
    /// Wraps a backend already rooted at the table location.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, uri: TableUri) -> Self {
        Self {
            backend,
            uri,
            prefix: None,
        }
    }

    /// Wraps a shared backend, placing the table under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix` is not a valid relative path.
    pub fn with_prefix(
        backend: Arc<dyn StorageBackend>,
        uri: TableUri,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix.into();
        let prefix = prefix.trim_matches('/').to_string();
        if prefix.is_empty() {
            return Ok(Self::new(backend, uri));
        }
        validate_path(&prefix)?;
        Ok(Self {
            backend,
            uri,
            prefix: Some(prefix),
        })
    }

    /// Builds an object-store backend for `uri` using resolved options.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme is unsupported or the store cannot be
    /// configured from `options`.
    pub fn open(uri: &TableUri, options: &StorageOptions) -> Result<Self> {
        let backend = ObjectStoreBackend::for_uri(uri, options)?;
        Ok(Self::new(Arc::new(backend), uri.clone()))
    }

    /// Returns the table URI.
    #[must_use]
    pub fn uri(&self) -> &TableUri {
        &self.uri
    }

    /// Returns the backend for advanced operations.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Path of the commit file for `version`.
    #[must_use]
    pub fn log_path(version: u64) -> String {
        format!("{LOG_DIR}/{version:020}.json")
    }

    /// Prefix under which all commit files live.
    #[must_use]
    pub fn log_prefix() -> String {
        format!("{LOG_DIR}/")
    }

    fn full_path(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{path}"),
            None => path.to_string(),
        }
    }

    fn strip_prefix<'a>(&self, path: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => path
                .strip_prefix(prefix.as_str())
                .and_then(|p| p.strip_prefix('/')),
            None => Some(path),
        }
    }

    /// Reads an object at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the object is not found.
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        validate_path(path)?;
        self.backend.get(&self.full_path(path)).await
    }

    /// Writes an object at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        validate_path(path)?;
        self.backend
            .put(&self.full_path(path), data, precondition)
            .await
    }

    /// Returns object metadata, or `None` if the object does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        validate_path(path)?;
        self.backend.head(&self.full_path(path)).await
    }

    /// Returns true if an object exists at the path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }

    /// Deletes an object. Missing objects are not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the backend fails.
    pub async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        self.backend.delete(&self.full_path(path)).await
    }

    /// Lists objects under a table-relative prefix.
    ///
    /// Returned paths are table-relative. Order is unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid or the backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        if !prefix.is_empty() {
            validate_path(prefix)?;
        }
        let metas = self.backend.list(&self.full_path(prefix)).await?;
        Ok(metas
            .into_iter()
            .filter_map(|mut meta| {
                let relative = self.strip_prefix(&meta.path)?.to_string();
                meta.path = relative;
                Some(meta)
            })
            .collect())
    }
}

/// Validates a table-relative path.
fn validate_path(path: &str) -> Result<()> {
    if path.starts_with('/') {
        return Err(Error::InvalidInput(format!(
            "absolute paths not allowed: {path}"
        )));
    }

    if path.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "backslashes not allowed in paths: {path}"
        )));
    }

    if path.chars().any(char::is_control) {
        return Err(Error::InvalidInput(format!(
            "control characters not allowed in paths: {path:?}"
        )));
    }

    for segment in path.split('/') {
        if segment == "." || segment == ".." {
            return Err(Error::InvalidInput(format!(
                "path traversal not allowed: {path}"
            )));
        }
    }

    Ok(())
}
