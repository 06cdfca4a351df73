//! An instrumented in-memory backend.
//!
//! [`TracingMemoryBackend`] wraps [`MemoryBackend`], journals every call so
//! tests can assert on what a write path touched, and fails calls under
//! chosen key prefixes to simulate an unreachable or forbidden store.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tidal_core::error::{Error, Result};
use tidal_core::storage::{
    MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
};

/// Which backend call was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    /// `get`
    Get,
    /// `head`
    Head,
    /// `put` of `bytes` under a precondition.
    Put {
        /// Payload size.
        bytes: usize,
        /// Precondition the caller asked for.
        precondition: WritePrecondition,
    },
    /// `delete`
    Delete,
    /// `list`; the recorded path is the prefix.
    List,
}

/// One journaled backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageOp {
    /// The call.
    pub kind: OpKind,
    /// Key, or prefix for listings.
    pub path: String,
}

impl StorageOp {
    /// Key or prefix the call addressed.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns true for writes.
    #[must_use]
    pub fn is_put(&self) -> bool {
        matches!(self.kind, OpKind::Put { .. })
    }
}

/// How an injected failure surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// `Error::Storage`, like an unreachable endpoint.
    Unavailable,
    /// `Error::PermissionDenied`, like rejected credentials.
    PermissionDenied,
}

#[derive(Debug, thiserror::Error)]
#[error("injected {kind:?} at {path}")]
struct Injected {
    kind: InjectedFailure,
    path: String,
}

/// Journaling, fault-injecting wrapper over [`MemoryBackend`].
///
/// Clones share contents, journal and faults.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    store: MemoryBackend,
    journal: Arc<Mutex<Vec<StorageOp>>>,
    faults: Arc<Mutex<Vec<(String, InjectedFailure)>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl TracingMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Journaled calls, oldest first. Calls rejected by a fault are not
    /// journaled.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        locked(&self.journal).clone()
    }

    /// Journaled writes, oldest first.
    #[must_use]
    pub fn puts(&self) -> Vec<StorageOp> {
        locked(&self.journal)
            .iter()
            .filter(|op| op.is_put())
            .cloned()
            .collect()
    }

    /// Empties the journal.
    pub fn clear_operations(&self) {
        locked(&self.journal).clear();
    }

    /// Fails every call under `prefix` as unavailable.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.inject(prefix, InjectedFailure::Unavailable);
    }

    /// Fails every call under `prefix` with `kind`.
    pub fn inject(&self, prefix: impl Into<String>, kind: InjectedFailure) {
        locked(&self.faults).push((prefix.into(), kind));
    }

    /// Removes every injected fault.
    pub fn clear_failures(&self) {
        locked(&self.faults).clear();
    }

    /// Every stored key, sorted.
    ///
    /// # Panics
    ///
    /// Panics if the inner store's lock is poisoned.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.store.keys().expect("memory store readable")
    }

    fn admit(&self, kind: OpKind, path: &str) -> Result<()> {
        let fault = locked(&self.faults)
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, kind)| *kind);

        if let Some(kind) = fault {
            let cause = Injected {
                kind,
                path: path.to_owned(),
            };
            return Err(match kind {
                InjectedFailure::Unavailable => {
                    Error::storage_with_source(format!("backend unreachable: {path}"), cause)
                }
                InjectedFailure::PermissionDenied => {
                    Error::permission_denied(format!("access to '{path}' denied"), cause)
                }
            });
        }

        locked(&self.journal).push(StorageOp {
            kind,
            path: path.to_owned(),
        });
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.admit(OpKind::Get, path)?;
        self.store.get(path).await
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let kind = OpKind::Put {
            bytes: data.len(),
            precondition: precondition.clone(),
        };
        self.admit(kind, path)?;
        self.store.put(path, data, precondition).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.admit(OpKind::Delete, path)?;
        self.store.delete(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.admit(OpKind::List, prefix)?;
        self.store.list(prefix).await
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.admit(OpKind::Head, path)?;
        self.store.head(path).await
    }
}
