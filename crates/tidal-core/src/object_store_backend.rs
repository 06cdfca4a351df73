//! [`StorageBackend`] over the `object_store` crate.
//!
//! One backend is rooted at one table location. Keys handed to it are
//! table-relative; the backend prepends the bucket prefix (cloud) or the table
//! directory (local filesystem).
//!
//! Conditional writes map onto `object_store` put modes:
//!
//! | Precondition | `PutMode` |
//! |---|---|
//! | `DoesNotExist` | `Create` |
//! | `MatchesVersion(etag)` | `Update` |
//! | `None` | `Overwrite` |

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StorePath;
use object_store::prefix::PrefixStore;
use object_store::{ObjectStore, PutMode, PutOptions, UpdateVersion};
use std::sync::Arc;

use crate::credentials::StorageOptions;
use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
use crate::uri::{StorageScheme, TableUri};

/// Option that makes S3 `PutMode::Create` atomic.
const AWS_CONDITIONAL_PUT: &str = "aws_conditional_put";

/// Production storage backend.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    /// Wraps an existing store. Keys are used as-is.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Builds a backend rooted at the table location.
    ///
    /// Option keys are matched case-insensitively against the provider's
    /// configuration keys; unknown keys are ignored by the provider.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unsupported`] for `memory://` and unknown schemes, and
    /// [`Error::InvalidInput`] when the store cannot be configured.
    pub fn for_uri(uri: &TableUri, options: &StorageOptions) -> Result<Self> {
        match uri.scheme() {
            StorageScheme::Local => {
                let path = uri
                    .local_path()
                    .ok_or_else(|| Error::invalid_uri(uri.as_str(), "missing local path"))?;
                std::fs::create_dir_all(path).map_err(|e| {
                    Error::storage_with_source(
                        format!("failed to create table directory '{}'", path.display()),
                        e,
                    )
                })?;
                let fs = LocalFileSystem::new_with_prefix(path).map_err(|e| {
                    Error::InvalidInput(format!("local filesystem '{}': {e}", path.display()))
                })?;
                Ok(Self::new(Arc::new(fs)))
            }
            StorageScheme::Aws | StorageScheme::Azure | StorageScheme::Gcs => {
                let url = uri
                    .url()
                    .ok_or_else(|| Error::invalid_uri(uri.as_str(), "missing url"))?;
                let mut url = url.clone();
                if url.scheme() == "gcs" {
                    url.set_scheme("gs").map_err(|()| {
                        Error::invalid_uri(uri.as_str(), "cannot normalize gcs scheme")
                    })?;
                }

                let mut opts: Vec<(String, String)> = options
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect();
                if *uri.scheme() == StorageScheme::Aws
                    && !opts.iter().any(|(k, _)| k == AWS_CONDITIONAL_PUT)
                {
                    opts.push((AWS_CONDITIONAL_PUT.to_string(), "etag".to_string()));
                }

                let (store, prefix) = object_store::parse_url_opts(&url, opts).map_err(|e| {
                    Error::InvalidInput(format!("cannot configure store for {uri}: {e}"))
                })?;
                let store: Arc<dyn ObjectStore> = if prefix.as_ref().is_empty() {
                    Arc::from(store)
                } else {
                    Arc::new(PrefixStore::new(store, prefix))
                };
                Ok(Self::new(store))
            }
            StorageScheme::Memory | StorageScheme::Other(_) => Err(Error::Unsupported(format!(
                "no object store backend for scheme '{}'",
                uri.scheme()
            ))),
        }
    }
}

fn store_path(path: &str) -> Result<StorePath> {
    StorePath::parse(path.trim_end_matches('/'))
        .map_err(|e| Error::InvalidInput(format!("invalid object path '{path}': {e}")))
}

fn map_err(path: &str, err: object_store::Error) -> Error {
    match err {
        object_store::Error::NotFound { .. } => Error::NotFound(format!("object not found: {path}")),
        e @ (object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. }) => {
            Error::permission_denied(format!("access to '{path}' denied"), e)
        }
        e @ object_store::Error::NotImplemented => {
            Error::Unsupported(format!("operation on '{path}' not supported by store: {e}"))
        }
        e => Error::storage_with_source(format!("object store operation on '{path}' failed"), e),
    }
}

fn version_token(e_tag: Option<String>, version: Option<String>) -> String {
    e_tag.or(version).unwrap_or_default()
}

fn to_meta(meta: object_store::ObjectMeta) -> ObjectMeta {
    ObjectMeta {
        path: meta.location.to_string(),
        size: meta.size as u64,
        version: version_token(meta.e_tag, meta.version),
        last_modified: Some(meta.last_modified),
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = store_path(path)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_err(path, e))?;
        result.bytes().await.map_err(|e| map_err(path, e))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let location = store_path(path)?;
        let mode = match precondition {
            WritePrecondition::DoesNotExist => PutMode::Create,
            WritePrecondition::MatchesVersion(e_tag) => PutMode::Update(UpdateVersion {
                e_tag: Some(e_tag),
                version: None,
            }),
            WritePrecondition::None => PutMode::Overwrite,
        };
        let opts = PutOptions {
            mode,
            ..PutOptions::default()
        };

        match self.store.put_opts(&location, data.into(), opts).await {
            Ok(result) => Ok(WriteResult::Success {
                version: version_token(result.e_tag, result.version),
            }),
            Err(
                object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. },
            ) => {
                let current_version = self
                    .head(path)
                    .await?
                    .map(|m| m.version)
                    .unwrap_or_default();
                Ok(WriteResult::PreconditionFailed { current_version })
            }
            Err(e) => Err(map_err(path, e)),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = store_path(path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(map_err(path, e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let location = if prefix.trim_end_matches('/').is_empty() {
            None
        } else {
            Some(store_path(prefix)?)
        };
        self.store
            .list(location.as_ref())
            .map_ok(to_meta)
            .try_collect()
            .await
            .map_err(|e| map_err(prefix, e))
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let location = store_path(path)?;
        match self.store.head(&location).await {
            Ok(meta) => Ok(Some(to_meta(meta))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_err(path, e)),
        }
    }
}
