//! Store - the locked boundary used by every repository
//!
//! Combines the [`DocumentStore`], the [`LockManager`] and the
//! [`TransactionCoordinator`]:
//!
//! - `exists` / `read` take a read lock on the one path they touch
//! - `write` / `delete` take a write lock on the one path they touch
//! - `run_in_transaction` takes write locks on a whole set
//!
//! Locks are reentrant, so a unit of work running inside a transaction can
//! call the same methods on the paths it already holds.

use crate::config::VaultConfig;
use crate::error::Result;
use crate::lock::{Acquire, LockManager, ReadGuard, WriteGuard};
use crate::storage::DocumentStore;
use crate::txn::TransactionCoordinator;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cheaply cloneable handle; clones share documents and locks
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    documents: DocumentStore,
    txn: TransactionCoordinator,
    acquire: Acquire,
    config: VaultConfig,
}

impl Store {
    /// Open a store over `root`, sharing locks with other handles on the same root
    pub fn open(root: impl Into<PathBuf>, config: VaultConfig) -> Self {
        let root = root.into();
        let locks = LockManager::for_root(&root);
        Self::with_locks(root, config, locks)
    }

    /// Open a store with an explicit lock registry
    pub fn with_locks(root: impl Into<PathBuf>, config: VaultConfig, locks: Arc<LockManager>) -> Self {
        let mut acquire = Acquire::new().with_poll_interval(config.poll_interval());
        if let Some(timeout) = config.lock_timeout() {
            acquire = acquire.with_timeout(timeout);
        }

        Self {
            inner: Arc::new(StoreInner {
                documents: DocumentStore::new(root, config.fsync),
                txn: TransactionCoordinator::new(locks, acquire.clone()),
                acquire,
                config,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        self.inner.documents.root()
    }

    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    /// Unlocked access to the underlying documents
    pub fn documents(&self) -> &DocumentStore {
        &self.inner.documents
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        self.inner.txn.locks()
    }

    /// Default wait limits, from the config
    pub fn acquire(&self) -> &Acquire {
        &self.inner.acquire
    }

    pub fn read_lock(&self, resource: &str) -> Result<ReadGuard> {
        self.locks().acquire_read(resource, &self.inner.acquire)
    }

    pub fn write_lock(&self, resource: &str) -> Result<WriteGuard> {
        self.locks().acquire_write(resource, &self.inner.acquire)
    }

    pub fn exists(&self, path: &str) -> Result<bool> {
        let _guard = self.read_lock(path)?;
        self.inner.documents.exists(path)
    }

    pub fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let _guard = self.read_lock(path)?;
        self.inner.documents.read(path)
    }

    pub fn write<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let _guard = self.write_lock(path)?;
        self.inner.documents.write(path, value)
    }

    pub fn read_bytes(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.read_lock(path)?;
        self.inner.documents.read_bytes(path)
    }

    pub fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let _guard = self.write_lock(path)?;
        self.inner.documents.write_bytes(path, bytes)
    }

    /// Idempotent; directories carry no content, so no lock is taken
    pub fn create_dir(&self, path: &str) -> Result<()> {
        self.inner.documents.create_dir(path)
    }

    pub fn delete(&self, path: &str) -> Result<bool> {
        let _guard = self.write_lock(path)?;
        self.inner.documents.delete(path)
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.inner.documents.list_dir(path)
    }

    /// See [`TransactionCoordinator::run_in_transaction`]
    pub fn run_in_transaction<T, I, S, F>(&self, resources: I, work: F) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce() -> Result<T>,
    {
        self.inner.txn.run_in_transaction(resources, work)
    }

    /// See [`TransactionCoordinator::run_in_transaction_with`]
    pub fn run_in_transaction_with<T, I, S, F>(
        &self,
        resources: I,
        acquire: &Acquire,
        work: F,
    ) -> Result<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce() -> Result<T>,
    {
        self.inner.txn.run_in_transaction_with(resources, acquire, work)
    }
}
