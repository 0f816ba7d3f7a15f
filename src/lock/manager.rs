//! Lock registry keyed by resource id
//!
//! A resource id is either a logical path or an opaque id such as
//! `session:{id}`. The same id always maps to the same [`ResourceLock`].
//! Locks are created on first use and kept until [`LockManager::prune`]
//! finds them unreferenced.

use super::cancel::Acquire;
use super::rwlock::{ReadGuard, ResourceLock, WriteGuard};
use crate::error::Result;
use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Registries shared by every handle opened on the same storage root
static ROOT_REGISTRIES: OnceLock<DashMap<PathBuf, Arc<LockManager>>> = OnceLock::new();

#[derive(Debug, Default)]
pub struct LockManager {
    locks: DashMap<String, Arc<ResourceLock>>,
}

impl LockManager {
    /// A private registry, not shared with other handles
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry for a storage root
    pub fn for_root(root: &Path) -> Arc<LockManager> {
        let key = registry_key(root);
        ROOT_REGISTRIES
            .get_or_init(DashMap::new)
            .entry(key)
            .or_insert_with(|| Arc::new(LockManager::new()))
            .value()
            .clone()
    }

    fn lock_for(&self, resource: &str) -> Arc<ResourceLock> {
        if let Some(lock) = self.locks.get(resource) {
            return lock.value().clone();
        }
        self.locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(ResourceLock::new(resource)))
            .value()
            .clone()
    }

    pub fn acquire_read(&self, resource: &str, acquire: &Acquire) -> Result<ReadGuard> {
        let guard = self.lock_for(resource).read(acquire)?;
        debug!(resource, "read lock acquired");
        Ok(guard)
    }

    pub fn acquire_write(&self, resource: &str, acquire: &Acquire) -> Result<WriteGuard> {
        let guard = self.lock_for(resource).write(acquire)?;
        debug!(resource, "write lock acquired");
        Ok(guard)
    }

    /// Drop registry entries that no guard or waiter references
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before.saturating_sub(self.locks.len());
        if removed > 0 {
            debug!(removed, "pruned idle locks");
        }
        removed
    }

    /// Number of registered locks
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Canonical form of a root that may not exist yet
///
/// The deepest existing ancestor is canonicalized and the missing tail is
/// appended, so the key stays the same once the directory is created.
fn registry_key(root: &Path) -> PathBuf {
    let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
    let mut normal = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other),
        }
    }

    let mut existing = normal.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |key, name| key.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name);
                existing = parent;
            }
            _ => return normal.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn quick() -> Acquire {
        Acquire::new()
            .with_timeout(Duration::from_millis(40))
            .with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_same_id_same_lock() {
        let manager = Arc::new(LockManager::new());
        let _held = manager.acquire_write("projects/p1/tests/_index.json", &quick()).unwrap();

        let other = Arc::clone(&manager);
        let blocked = thread::spawn(move || {
            other
                .acquire_write("projects/p1/tests/_index.json", &quick())
                .map(drop)
        })
        .join()
        .unwrap();
        assert!(blocked.is_err());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_distinct_ids_do_not_block() {
        let manager = Arc::new(LockManager::new());
        let _held = manager.acquire_write("projects/A/tests/_index.json", &quick()).unwrap();

        let other = Arc::clone(&manager);
        let free = thread::spawn(move || {
            other
                .acquire_read("projects/B/tests/_tags.json", &quick())
                .map(drop)
        })
        .join()
        .unwrap();
        assert!(free.is_ok());
    }

    #[test]
    fn test_prune_keeps_held_locks() {
        let manager = LockManager::new();
        let held = manager.acquire_read("session:abc", &quick()).unwrap();
        drop(manager.acquire_read("session:def", &quick()).unwrap());

        assert_eq!(manager.prune(), 1);
        assert_eq!(manager.len(), 1);
        drop(held);
        assert_eq!(manager.prune(), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_registry_shared_per_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let a = LockManager::for_root(tmp.path());
        let b = LockManager::for_root(tmp.path());
        assert!(Arc::ptr_eq(&a, &b));

        let other = tempfile::TempDir::new().unwrap();
        assert!(!Arc::ptr_eq(&a, &LockManager::for_root(other.path())));
    }

    #[test]
    fn test_registry_key_stable_across_creation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let indirect = tmp.path().join("nested").join("..").join("vault");
        let before = LockManager::for_root(&indirect);

        std::fs::create_dir_all(tmp.path().join("vault")).unwrap();
        let after = LockManager::for_root(&tmp.path().join("vault"));
        assert!(Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&after, &LockManager::for_root(&indirect)));
    }

    #[test]
    fn test_relative_root_matches_absolute() {
        let relative = Path::new("not-created-yet").join("vault");
        let absolute = std::env::current_dir().unwrap().join(&relative);
        assert_eq!(registry_key(&relative), registry_key(&absolute));
        assert!(Arc::ptr_eq(
            &LockManager::for_root(&relative),
            &LockManager::for_root(&absolute)
        ));
    }
}
