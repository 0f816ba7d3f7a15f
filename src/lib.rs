//! testvault - transactional file-backed document store
//!
//! Persists test definitions, executions, recording sessions and
//! environments as JSON documents, with secondary indexes kept in agreement
//! by per-resource locks and ordered multi-resource transactions.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                             Vault                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────┐ │
//! │  │   Tests     │  │ Executions  │  │ Recordings  │  │  Envs   │ │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘  └────┬────┘ │
//! │         └────────────────┴───────┬────────┴──────────────┘      │
//! │                                  ▼                              │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │        Repository<E> + indexes + Reconciler                 ││
//! │  └──────────────────────────┬──────────────────────────────────┘│
//! │                             ▼                                   │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                        Store                                ││
//! │  │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  ││
//! │  │  │  Document   │  │  Lock       │  │  Transaction        │  ││
//! │  │  │  Store      │  │  Manager    │  │  Coordinator        │  ││
//! │  │  └──────┬──────┘  └─────────────┘  └─────────────────────┘  ││
//! │  └─────────┼───────────────────────────────────────────────────┘│
//! │            ▼                                                    │
//! │  ┌─────────────────────────────────────────────────────────────┐│
//! │  │                 File System (JSON documents)                ││
//! │  │  projects/{p}/{kind}/{id}/{kind}.json                       ││
//! │  │  projects/{p}/{kind}/_index.json  (id -> summary)           ││
//! │  │  projects/{p}/{kind}/_{name}.json (key -> ids)              ││
//! │  └─────────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod repo;
pub mod storage;
pub mod store;
pub mod txn;
pub mod validation;

pub use config::VaultConfig;
pub use error::{Error, Result};
pub use store::Store;
pub use vaultpath::{EntityKind, ParsedPath};

use repo::{
    EnvironmentRepository, ExecutionRepository, RebuildReport, Reconciler, RecordingRepository,
    TestRepository,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The main store handle
///
/// Cheap to clone. Handles opened on the same directory share one lock
/// registry, so they exclude each other like clones do.
#[derive(Debug, Clone)]
pub struct Vault {
    store: Store,
    tests: TestRepository,
    executions: ExecutionRepository,
    recordings: RecordingRepository,
    environments: EnvironmentRepository,
}

impl Vault {
    /// Open a vault, reading `.testvault/config.yaml` if present
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = VaultConfig::load(&root)?;
        Self::open_with_config(root, config)
    }

    /// Open a vault with an explicit configuration
    pub fn open_with_config(root: impl Into<PathBuf>, config: VaultConfig) -> Result<Self> {
        let root = root.into();
        let store = Store::open(&root, config.clone());

        if config.sweep_temp_on_open {
            let swept = store.documents().sweep_temp_files()?;
            if swept > 0 {
                warn!(swept, "removed temporary files left by interrupted writes");
            }
        }

        let vault = Self {
            tests: TestRepository::new(store.clone()),
            executions: ExecutionRepository::new(store.clone()),
            recordings: RecordingRepository::new(store.clone()),
            environments: EnvironmentRepository::new(store.clone()),
            store,
        };

        if config.reconcile_on_open {
            vault.reconcile_all()?;
        }

        info!(root = %root.display(), "vault opened");
        Ok(vault)
    }

    /// Create the storage layout and a default config file, then open
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let projects = root.join(vaultpath::PROJECTS_DIR);
        std::fs::create_dir_all(&projects).map_err(|e| Error::io(&projects, e))?;

        let config = if VaultConfig::path(&root).exists() {
            VaultConfig::load(&root)?
        } else {
            let config = VaultConfig::default();
            config.save(&root)?;
            config
        };
        Self::open_with_config(root, config)
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn config(&self) -> &VaultConfig {
        self.store.config()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn tests(&self) -> &TestRepository {
        &self.tests
    }

    pub fn executions(&self) -> &ExecutionRepository {
        &self.executions
    }

    pub fn recordings(&self) -> &RecordingRepository {
        &self.recordings
    }

    pub fn environments(&self) -> &EnvironmentRepository {
        &self.environments
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.store.clone())
    }

    /// Ids of every project directory, sorted
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let names = self.store.list_dir(vaultpath::PROJECTS_DIR)?;
        Ok(names
            .into_iter()
            .filter(|name| validation::validate_project_id(name).is_ok())
            .collect())
    }

    /// Entity counts per kind, as recorded in the id indexes
    pub fn project_status(&self, project: &str) -> Result<ProjectStatus> {
        let counts = BTreeMap::from([
            (EntityKind::Test, self.tests.count(project)?),
            (EntityKind::Execution, self.executions.count(project)?),
            (EntityKind::Recording, self.recordings.count(project)?),
            (EntityKind::Environment, self.environments.count(project)?),
        ]);
        Ok(ProjectStatus {
            project: project.to_string(),
            counts,
        })
    }

    /// Rebuild every index of one project from its entity directories
    pub fn reconcile_project(&self, project: &str) -> Result<Vec<RebuildReport>> {
        self.reconciler().rebuild_project(project)
    }

    /// Rebuild every index of every project
    pub fn reconcile_all(&self) -> Result<Vec<RebuildReport>> {
        let reconciler = self.reconciler();
        let mut reports = Vec::new();
        for project in self.list_projects()? {
            reports.extend(reconciler.rebuild_project(&project)?);
        }
        info!(reports = reports.len(), "reconciliation finished");
        Ok(reports)
    }
}

/// Per-project entity counts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectStatus {
    pub project: String,
    pub counts: BTreeMap<EntityKind, usize>,
}

impl ProjectStatus {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}
