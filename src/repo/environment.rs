//! Environment configurations

use super::{Entity, EntityMeta, Repository};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::validation::{validate_entity_id, validate_project_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Deref;
use tracing::debug;
use vaultpath::EntityKind;

pub const BY_NAME_INDEX: &str = "by_name";

const SET_DEFAULT_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl Environment {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            project_id: String::new(),
            name: name.into(),
            base_url: base_url.into(),
            variables: BTreeMap::new(),
            is_default: false,
            meta: EntityMeta::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub name: String,
    pub base_url: String,
    pub is_default: bool,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Environment {
    type Summary = EnvironmentSummary;

    const KIND: EntityKind = EntityKind::Environment;
    const INDEXES: &'static [&'static str] = &[BY_NAME_INDEX];

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn set_project_id(&mut self, project: String) {
        self.project_id = project;
    }

    fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut EntityMeta {
        &mut self.meta
    }

    fn summary(&self) -> EnvironmentSummary {
        EnvironmentSummary {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            is_default: self.is_default,
            updated_at: self.meta.updated_at,
        }
    }

    fn index_keys(&self, index: &str) -> Vec<String> {
        match index {
            BY_NAME_INDEX => vec![self.name.clone()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvironmentRepository {
    inner: Repository<Environment>,
}

impl Deref for EnvironmentRepository {
    type Target = Repository<Environment>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl EnvironmentRepository {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Repository::new(store),
        }
    }

    /// Most recently updated environment with this exact name
    pub fn find_by_name(&self, project: &str, name: &str) -> Result<Option<Environment>> {
        Ok(self
            .inner
            .find_by_keys(project, BY_NAME_INDEX, &[name], false)?
            .into_iter()
            .next())
    }

    /// The environment flagged as default, if any
    pub fn default_environment(&self, project: &str) -> Result<Option<Environment>> {
        let defaults = self.current_defaults(project)?;
        let mut found = self.inner.hydrate(project, defaults)?;
        found.retain(|env| env.is_default);
        super::sort_recent(&mut found);
        Ok(found.into_iter().next())
    }

    /// Make `id` the only default environment of the project
    ///
    /// Locks the indexes, the target and every environment currently flagged
    /// as default. Nothing is written unless the target exists. If the set of
    /// defaults changes between choosing the locks and taking them, the
    /// attempt is retried.
    pub fn set_default(&self, project: &str, id: &str) -> Result<Environment> {
        validate_project_id(project)?;
        validate_entity_id(id)?;

        for attempt in 1..=SET_DEFAULT_ATTEMPTS {
            let previous = self.current_defaults(project)?;
            let mut resources = self.inner.index_resources(project);
            resources.push(self.inner.entity_path(project, id));
            resources.extend(previous.iter().map(|other| self.inner.entity_path(project, other)));

            let outcome = self.inner.store().run_in_transaction(resources, || {
                if self.current_defaults(project)? != previous {
                    return Ok(None);
                }
                if !self.inner.exists(project, id)? {
                    return Err(Error::not_found(EntityKind::Environment, project, id));
                }
                let mut cleared = Vec::new();
                for other in previous.iter().filter(|other| other.as_str() != id) {
                    if self.inner.exists(project, other)? {
                        cleared.push(other);
                    }
                }

                for other in cleared {
                    self.inner.modify(project, other, |env| {
                        env.is_default = false;
                        Ok(())
                    })?;
                }
                self.inner
                    .modify(project, id, |env| {
                        env.is_default = true;
                        Ok(())
                    })
                    .map(Some)
            })?;

            match outcome {
                Some(env) => return Ok(env),
                None => debug!(project, id, attempt, "default environments changed while locking"),
            }
        }

        Err(Error::TransactionAborted {
            resource: self.inner.entity_path(project, id),
            reason: format!("default environment kept changing after {SET_DEFAULT_ATTEMPTS} attempts"),
        })
    }

    fn current_defaults(&self, project: &str) -> Result<BTreeSet<String>> {
        Ok(self.inner.summaries(project)?.select(|s| s.is_default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use tempfile::TempDir;

    fn setup() -> (TempDir, EnvironmentRepository) {
        let tmp = TempDir::new().unwrap();
        let config = VaultConfig {
            fsync: false,
            ..Default::default()
        };
        let repo = EnvironmentRepository::new(Store::open(tmp.path(), config));
        (tmp, repo)
    }

    #[test]
    fn test_find_by_name() {
        let (_tmp, repo) = setup();
        repo.create(
            "p1",
            Environment::new("staging", "https://staging.test").with_variable("USER", "qa"),
        )
        .unwrap();

        let found = repo.find_by_name("p1", "staging").unwrap().unwrap();
        assert_eq!(found.variables.get("USER").map(String::as_str), Some("qa"));
        assert!(repo.find_by_name("p1", "prod").unwrap().is_none());
    }

    #[test]
    fn test_rename_moves_name_index() {
        let (_tmp, repo) = setup();
        repo.create("p1", Environment::new("stage", "https://a.test").with_id("e1"))
            .unwrap();
        repo.modify("p1", "e1", |env| {
            env.name = "staging".into();
            Ok(())
        })
        .unwrap();

        assert!(repo.find_by_name("p1", "stage").unwrap().is_none());
        assert_eq!(repo.find_by_name("p1", "staging").unwrap().unwrap().id, "e1");
    }

    #[test]
    fn test_set_default_is_exclusive() {
        let (_tmp, repo) = setup();
        repo.create("p1", Environment::new("dev", "https://dev.test").with_id("dev").as_default())
            .unwrap();
        repo.create("p1", Environment::new("prod", "https://prod.test").with_id("prod"))
            .unwrap();

        assert_eq!(repo.default_environment("p1").unwrap().unwrap().id, "dev");

        let prod = repo.set_default("p1", "prod").unwrap();
        assert!(prod.is_default);
        assert!(!repo.get("p1", "dev").unwrap().unwrap().is_default);
        assert_eq!(repo.default_environment("p1").unwrap().unwrap().id, "prod");
        assert_eq!(repo.current_defaults("p1").unwrap().len(), 1);
    }

    #[test]
    fn test_set_default_missing_is_not_found() {
        let (_tmp, repo) = setup();
        let err = repo.set_default("p1", "ghost").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(repo.default_environment("p1").unwrap().is_none());
    }

    #[test]
    fn test_set_default_missing_keeps_current_default() {
        let (_tmp, repo) = setup();
        repo.create("p1", Environment::new("dev", "https://dev.test").with_id("dev").as_default())
            .unwrap();

        let err = repo.set_default("p1", "ghost").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let dev = repo.get("p1", "dev").unwrap().unwrap();
        assert!(dev.is_default);
        assert_eq!(dev.meta.version, 1);
        assert_eq!(repo.default_environment("p1").unwrap().unwrap().id, "dev");
    }
}
