//! DocumentStore - JSON documents stored as files under a root directory
//!
//! Logical paths are `/`-separated and relative to the root:
//! ```text
//! {root}/
//!   projects/p1/tests/_index.json
//!   projects/p1/tests/7/test.json
//! ```
//!
//! Every write goes to a hidden sibling temp file first and is renamed into
//! place, so a reader sees either the previous document or the new one.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Marker embedded in temporary file names
const TEMP_MARKER: &str = ".tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// File-backed document storage
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    fsync: bool,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, fsync: bool) -> Self {
        Self {
            root: root.into(),
            fsync,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a logical path onto the filesystem
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.starts_with('/') || trimmed.contains('\\') {
            return Err(Error::InvalidIdentifier {
                kind: "path",
                value: path.to_string(),
                reason: "must be relative and '/'-separated",
            });
        }

        let mut resolved = self.root.clone();
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::InvalidIdentifier {
                    kind: "path",
                    value: path.to_string(),
                    reason: "contains an empty or relative segment",
                });
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }

    /// True iff a document is currently stored at `path`
    pub fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.resolve(path)?.is_file())
    }

    /// Read and deserialize the document at `path`
    pub fn read<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let bytes = match self.read_bytes(path)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::corrupt(path, e))
    }

    /// Serialize `value` and store it at `path`, replacing any prior content
    pub fn write<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let target = self.resolve(path)?;
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| {
            Error::io(&target, io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        self.write_atomic(&target, &bytes)?;
        debug!(path, bytes = bytes.len(), "document written");
        Ok(())
    }

    /// Raw bytes at `path`, `None` when absent
    pub fn read_bytes(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let target = self.resolve(path)?;
        match fs::read(&target) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(target, e)),
        }
    }

    /// Store raw bytes at `path` with the same atomic replacement as [`write`](Self::write)
    pub fn write_bytes(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        self.write_atomic(&target, bytes)?;
        debug!(path, bytes = bytes.len(), "attachment written");
        Ok(())
    }

    /// Create a directory and any missing parents. Idempotent.
    pub fn create_dir(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        fs::create_dir_all(&target).map_err(|e| Error::io(target, e))
    }

    /// Remove a document, or a directory and everything beneath it
    pub fn delete(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        let result = if target.is_dir() {
            fs::remove_dir_all(&target)
        } else {
            fs::remove_file(&target)
        };

        match result {
            Ok(()) => {
                debug!(path, "deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(target, e)),
        }
    }

    /// Names of the immediate children of a directory, sorted
    ///
    /// An absent directory lists as empty. Temporary files are skipped.
    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        let target = self.resolve(path)?;
        if !target.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in WalkDir::new(&target)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| walk_error(&target, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_temp_name(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Remove temporary files left behind by interrupted writes
    pub fn sweep_temp_files(&self) -> Result<usize> {
        if !self.root.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| walk_error(&self.root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if is_temp_name(&entry.file_name().to_string_lossy()) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %entry.path().display(), error = %e, "could not remove temp file"),
                }
            }
        }

        if removed > 0 {
            debug!(removed, "swept temporary files");
        }
        Ok(removed)
    }

    /// Write to a unique sibling temp file, then rename over `target`
    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;

        let tmp = temp_sibling(target);
        let written = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            if self.fsync {
                file.sync_all()?;
            }
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io(target, e));
        }

        if let Err(e) = fs::rename(&tmp, target) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::io(target, e));
        }

        if self.fsync {
            fsync_dir(parent).ok();
        }
        Ok(())
    }
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(".{}{}{}-{}", name, TEMP_MARKER, std::process::id(), seq))
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

fn walk_error(root: &Path, err: walkdir::Error) -> Error {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop detected"));
    Error::io(path, source)
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    fn store() -> (TempDir, DocumentStore) {
        let tmp = TempDir::new().unwrap();
        let store = DocumentStore::new(tmp.path(), false);
        (tmp, store)
    }

    #[test]
    fn test_document_crud() {
        let (_tmp, store) = store();
        let path = "projects/p1/tests/t1/test.json";

        assert!(!store.exists(path).unwrap());
        assert_eq!(store.read::<Sample>(path).unwrap(), None);

        let doc = Sample { name: "login".into(), count: 1 };
        store.write(path, &doc).unwrap();
        assert!(store.exists(path).unwrap());
        assert_eq!(store.read::<Sample>(path).unwrap(), Some(doc));

        let updated = Sample { name: "login".into(), count: 2 };
        store.write(path, &updated).unwrap();
        assert_eq!(store.read::<Sample>(path).unwrap(), Some(updated));

        assert!(store.delete(path).unwrap());
        assert!(!store.delete(path).unwrap());
        assert!(!store.exists(path).unwrap());
    }

    #[test]
    fn test_delete_directory_recursively() {
        let (_tmp, store) = store();
        store.write("projects/p1/tests/t1/test.json", &1).unwrap();
        store.write_bytes("projects/p1/tests/t1/shots/1.png", b"png").unwrap();

        assert!(store.delete("projects/p1/tests/t1").unwrap());
        assert!(!store.exists("projects/p1/tests/t1/test.json").unwrap());
        assert!(!store.delete("projects/p1/tests/t1").unwrap());
    }

    #[test]
    fn test_corrupt_document() {
        let (tmp, store) = store();
        let dir = tmp.path().join("projects/p1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad.json"), "{ not json").unwrap();

        let err = store.read::<Sample>("projects/p1/bad.json").unwrap_err();
        assert!(matches!(err, Error::CorruptDocument { .. }));
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let (_tmp, store) = store();
        store.write("a.json", &vec![1, 2, 3]).unwrap();
        assert!(matches!(
            store.read::<Sample>("a.json"),
            Err(Error::CorruptDocument { .. })
        ));
    }

    #[test]
    fn test_create_dir_idempotent() {
        let (tmp, store) = store();
        store.create_dir("projects/p1/tests").unwrap();
        store.create_dir("projects/p1/tests").unwrap();
        assert!(tmp.path().join("projects/p1/tests").is_dir());
    }

    #[test]
    fn test_list_dir_skips_temp_files() {
        let (tmp, store) = store();
        store.write("projects/p1/tests/_index.json", &0).unwrap();
        store.create_dir("projects/p1/tests/b").unwrap();
        store.create_dir("projects/p1/tests/a").unwrap();
        fs::write(tmp.path().join("projects/p1/tests/.x.json.tmp-1-1"), "{").unwrap();

        assert_eq!(
            store.list_dir("projects/p1/tests").unwrap(),
            vec!["_index.json", "a", "b"]
        );
        assert!(store.list_dir("projects/missing").unwrap().is_empty());
    }

    #[test]
    fn test_sweep_temp_files() {
        let (tmp, store) = store();
        store.write("projects/p1/a.json", &0).unwrap();
        fs::write(tmp.path().join("projects/p1/.a.json.tmp-9-3"), "{").unwrap();

        assert_eq!(store.sweep_temp_files().unwrap(), 1);
        assert_eq!(store.sweep_temp_files().unwrap(), 0);
        assert!(store.exists("projects/p1/a.json").unwrap());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let (_tmp, store) = store();
        assert!(store.resolve("../outside.json").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("projects//x.json").is_err());
    }

    #[test]
    fn test_write_leaves_no_temp_file() {
        let (tmp, store) = store();
        store.write("projects/p1/a.json", &"value").unwrap();
        let names: Vec<_> = fs::read_dir(tmp.path().join("projects/p1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json"]);
    }
}
