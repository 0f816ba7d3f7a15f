//! Store configuration
//!
//! Stored in `.testvault/config.yaml` under the storage root:
//!
//! ```yaml
//! lock_timeout_ms: 30000
//! lock_poll_interval_ms: 25
//! fsync: true
//! reconcile_on_open: false
//! sweep_temp_on_open: true
//! ```
//!
//! A missing file means defaults. Unknown keys are rejected so typos do not
//! silently fall back to a default.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the root holding store metadata
pub const META_DIR: &str = ".testvault";

/// Config file name inside [`META_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Upper bound on any single lock wait. `None` waits until granted or cancelled.
    pub lock_timeout_ms: Option<u64>,
    /// How often a blocked acquisition re-checks its cancellation token
    pub lock_poll_interval_ms: u64,
    /// fsync temporary files before renaming them into place
    pub fsync: bool,
    /// Rebuild every index from entity directories when the vault opens
    pub reconcile_on_open: bool,
    /// Remove temporary files left by interrupted writes when the vault opens
    pub sweep_temp_on_open: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: Some(30_000),
            lock_poll_interval_ms: 25,
            fsync: true,
            reconcile_on_open: false,
            sweep_temp_on_open: true,
        }
    }
}

impl VaultConfig {
    pub fn path(root: &Path) -> PathBuf {
        root.join(META_DIR).join(CONFIG_FILE)
    }

    /// Load the config for a storage root, falling back to defaults
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        serde_yaml::from_str(&content).map_err(|e| Error::Config {
            path,
            message: e.to_string(),
        })
    }

    /// Write this config to the storage root
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        let dir = root.join(META_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let content = serde_yaml::to_string(self).map_err(|e| Error::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| Error::io(&path, e))
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = VaultConfig::load(tmp.path()).unwrap();
        assert_eq!(config, VaultConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let config = VaultConfig {
            lock_timeout_ms: None,
            reconcile_on_open: true,
            ..Default::default()
        };
        config.save(tmp.path()).unwrap();

        let loaded = VaultConfig::load(tmp.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.lock_timeout(), None);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_rest() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(META_DIR)).unwrap();
        std::fs::write(VaultConfig::path(tmp.path()), "fsync: false\n").unwrap();

        let config = VaultConfig::load(tmp.path()).unwrap();
        assert!(!config.fsync);
        assert_eq!(config.lock_timeout_ms, Some(30_000));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(META_DIR)).unwrap();
        std::fs::write(VaultConfig::path(tmp.path()), "lock_timout_ms: 5\n").unwrap();

        assert!(matches!(
            VaultConfig::load(tmp.path()),
            Err(Error::Config { .. })
        ));
    }
}
