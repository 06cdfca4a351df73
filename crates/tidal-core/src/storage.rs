//! The object-store contract the table layer is written against.
//!
//! A table is nothing but immutable data files plus a numbered log, so the
//! backend surface is small: whole-object reads, prefix listings, idempotent
//! deletes and one conditional write. Commits rely on that conditional write:
//! a put with [`WritePrecondition::DoesNotExist`] must be atomic, so that of
//! two writers racing for `_delta_log/<n>.json` exactly one lands.
//!
//! Object versions are opaque strings. Cloud stores hand back an `ETag` or
//! generation; [`MemoryBackend`] hands back a store-wide sequence number.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Condition a put must satisfy before it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// The key must be vacant. Used for log entries and data files.
    DoesNotExist,
    /// The stored object must carry this version token.
    MatchesVersion(String),
    /// Last writer wins.
    None,
}

impl WritePrecondition {
    /// Whether a put is allowed given the version currently stored at the key.
    #[must_use]
    pub fn admits(&self, current: Option<&str>) -> bool {
        match (self, current) {
            (Self::None, _) | (Self::DoesNotExist, None) => true,
            (Self::DoesNotExist, Some(_)) | (Self::MatchesVersion(_), None) => false,
            (Self::MatchesVersion(expected), Some(actual)) => expected == actual,
        }
    }
}

/// Outcome of a put.
///
/// A failed precondition is an answer, not an error: it tells the committer
/// that someone else claimed the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// The object was stored.
    Success {
        /// Version token of the stored object.
        version: String,
    },
    /// The precondition rejected the write and nothing was stored.
    PreconditionFailed {
        /// Version token found at the key, `"0"` when the key is vacant.
        current_version: String,
    },
}

impl WriteResult {
    /// Returns true if the object was stored.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Listing entry for a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Key relative to the backend root.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Opaque version token.
    pub version: String,
    /// When the object was last written, if the store reports it.
    pub last_modified: Option<DateTime<Utc>>,
}

/// A flat key/value object store.
///
/// Implemented by the `object_store` adapter for real locations and by
/// [`MemoryBackend`] for tests.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads a whole object, failing with [`Error::NotFound`] if it is absent.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Stores an object if `precondition` holds.
    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Removes an object. Removing a missing key is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists every object whose key starts with `prefix`, in no particular
    /// order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Returns an object's metadata, or `None` if it is absent.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

// ============================================================================
// MemoryBackend
// ============================================================================

/// Process-local object store. Clones share contents.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, MemoryObject>,
    sequence: u64,
}

#[derive(Debug)]
struct MemoryObject {
    bytes: Bytes,
    sequence: u64,
    written_at: DateTime<Utc>,
}

impl MemoryObject {
    fn describe(&self, path: &str) -> ObjectMeta {
        ObjectMeta {
            path: path.to_owned(),
            size: self.bytes.len() as u64,
            version: self.sequence.to_string(),
            last_modified: Some(self.written_at),
        }
    }
}

impl MemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Version token stored at `path`, if any.
    pub fn version_of(&self, path: &str) -> Result<Option<String>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.objects.get(path).map(|o| o.sequence.to_string()))
    }

    /// Every stored key in lexicographic order.
    pub fn keys(&self) -> Result<Vec<String>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.objects.keys().cloned().collect())
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "memory store lock poisoned".into(),
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let state = self.state.read().map_err(|_| poisoned())?;
        match state.objects.get(path) {
            Some(object) => Ok(object.bytes.clone()),
            None => Err(Error::NotFound(format!("object not found: {path}"))),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let current = state.objects.get(path).map(|o| o.sequence.to_string());
        if !precondition.admits(current.as_deref()) {
            return Ok(WriteResult::PreconditionFailed {
                current_version: current.unwrap_or_else(|| "0".into()),
            });
        }

        state.sequence += 1;
        let sequence = state.sequence;
        state.objects.insert(
            path.to_owned(),
            MemoryObject {
                bytes: data,
                sequence,
                written_at: Utc::now(),
            },
        );
        Ok(WriteResult::Success {
            version: sequence.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        state.objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .objects
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| object.describe(key))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state.objects.get(path).map(|o| o.describe(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG_0: &str = "t/_delta_log/00000000000000000000.json";
    const LOG_1: &str = "t/_delta_log/00000000000000000001.json";

    #[test]
    fn test_precondition_admits() {
        assert!(WritePrecondition::None.admits(Some("3")));
        assert!(WritePrecondition::DoesNotExist.admits(None));
        assert!(!WritePrecondition::DoesNotExist.admits(Some("1")));
        assert!(WritePrecondition::MatchesVersion("2".into()).admits(Some("2")));
        assert!(!WritePrecondition::MatchesVersion("2".into()).admits(Some("5")));
        assert!(!WritePrecondition::MatchesVersion("2".into()).admits(None));
    }

    #[tokio::test]
    async fn test_log_entry_claimed_once() {
        let backend = MemoryBackend::new();

        let first = backend
            .put(LOG_0, Bytes::from("winner"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        assert!(first.is_success());

        let second = backend
            .put(LOG_0, Bytes::from("loser"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        assert_eq!(
            second,
            WriteResult::PreconditionFailed {
                current_version: "1".into()
            }
        );
        assert_eq!(backend.get(LOG_0).await.expect("get"), Bytes::from("winner"));
    }

    #[tokio::test]
    async fn test_versions_advance_across_keys() {
        let backend = MemoryBackend::new();
        for path in [LOG_0, LOG_1] {
            backend
                .put(path, Bytes::from("{}"), WritePrecondition::DoesNotExist)
                .await
                .expect("put");
        }
        assert_eq!(backend.version_of(LOG_0).unwrap().as_deref(), Some("1"));
        assert_eq!(backend.version_of(LOG_1).unwrap().as_deref(), Some("2"));

        let stale = backend
            .put(
                LOG_0,
                Bytes::from("x"),
                WritePrecondition::MatchesVersion("2".into()),
            )
            .await
            .expect("put");
        assert!(!stale.is_success());

        let fresh = backend
            .put(
                LOG_0,
                Bytes::from("x"),
                WritePrecondition::MatchesVersion("1".into()),
            )
            .await
            .expect("put");
        assert_eq!(
            fresh,
            WriteResult::Success {
                version: "3".into()
            }
        );
    }

    #[tokio::test]
    async fn test_list_is_prefix_scoped() {
        let backend = MemoryBackend::new();
        for path in [LOG_0, LOG_1, "t/part-0.parquet", "u/_delta_log/x.json"] {
            backend
                .put(path, Bytes::from("x"), WritePrecondition::None)
                .await
                .unwrap();
        }

        let log: Vec<String> = backend
            .list("t/_delta_log/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(log, vec![LOG_0.to_string(), LOG_1.to_string()]);
        assert_eq!(backend.list("t/").await.unwrap().len(), 3);
        assert!(backend.list("v/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_objects() {
        let backend = MemoryBackend::new();
        assert!(backend.get(LOG_0).await.unwrap_err().is_not_found());
        assert!(backend.head(LOG_0).await.unwrap().is_none());
        backend.delete(LOG_0).await.expect("delete of a missing key");

        backend
            .put(LOG_0, Bytes::from("abc"), WritePrecondition::None)
            .await
            .unwrap();
        let meta = backend.head(LOG_0).await.unwrap().expect("meta");
        assert_eq!(meta.size, 3);
        backend.delete(LOG_0).await.unwrap();
        assert!(backend.keys().unwrap().is_empty());
    }
}
