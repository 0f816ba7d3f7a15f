//! Index reconciliation
//!
//! Transactions keep entity documents and indexes in agreement only while
//! the process survives them. After a crash, or after documents were edited
//! by hand, the indexes of a project can be rebuilt from the entity
//! directories:
//!
//! ```text
//! 1. list the kind directory, keep entries that parse as entity dirs
//! 2. transaction over {id index, inverted indexes, every listed entity doc}
//! 3. list again, load each document
//!      absent   -> reported, skipped
//!      corrupt  -> reported, skipped
//!      id differs from its directory -> indexed under the directory id
//! 4. overwrite the id index and every inverted index from what loaded
//! ```
//!
//! Entries that appear between steps 1 and 3 are still indexed: every
//! mutation holds the index locks for its whole duration, so nothing can be
//! half-written while the rebuild holds them.

use super::environment::Environment;
use super::execution::Execution;
use super::index::{IdIndex, InvertedIndex};
use super::recording::RecordingSession;
use super::test_case::TestCase;
use super::{Entity, Repository};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::validation::validate_project_id;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};
use vaultpath::{EntityKind, ParsedPath};

/// What one rebuild found and changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildReport {
    pub project: String,
    pub kind: EntityKind,
    /// Entities present in the rebuilt id index
    pub indexed: usize,
    /// Ids that were missing from the previous id index
    pub added: Vec<String>,
    /// Ids the previous id index listed without a loadable document
    pub removed: Vec<String>,
    /// Documents that failed to parse
    pub corrupt: Vec<String>,
    /// Entity directories holding no document
    pub missing_document: Vec<String>,
    /// Documents whose stored id or project disagreed with their location
    pub relocated: Vec<String>,
}

impl RebuildReport {
    fn new(project: &str, kind: EntityKind) -> Self {
        Self {
            project: project.to_string(),
            kind,
            indexed: 0,
            added: Vec::new(),
            removed: Vec::new(),
            corrupt: Vec::new(),
            missing_document: Vec::new(),
            relocated: Vec::new(),
        }
    }

    /// True if the indexes already matched the documents
    pub fn is_clean(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.corrupt.is_empty()
            && self.missing_document.is_empty()
            && self.relocated.is_empty()
    }
}

/// Rebuilds indexes from entity directories
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: Store,
}

impl Reconciler {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Rebuild every kind of one project
    pub fn rebuild_project(&self, project: &str) -> Result<Vec<RebuildReport>> {
        EntityKind::ALL
            .iter()
            .map(|kind| self.rebuild_kind(project, *kind))
            .collect()
    }

    pub fn rebuild_kind(&self, project: &str, kind: EntityKind) -> Result<RebuildReport> {
        match kind {
            EntityKind::Test => self.rebuild::<TestCase>(project),
            EntityKind::Execution => self.rebuild::<Execution>(project),
            EntityKind::Recording => self.rebuild::<RecordingSession>(project),
            EntityKind::Environment => self.rebuild::<Environment>(project),
        }
    }

    /// Rebuild the id index and inverted indexes of one kind
    pub fn rebuild<E: Entity>(&self, project: &str) -> Result<RebuildReport> {
        validate_project_id(project)?;
        let repo: Repository<E> = Repository::new(self.store.clone());

        let listed = self.entity_ids(project, E::KIND)?;
        let mut resources = repo.index_resources(project);
        resources.extend(listed.iter().map(|id| repo.entity_path(project, id)));

        let report = self.store.run_in_transaction(resources, || {
            let mut report = RebuildReport::new(project, E::KIND);
            let previous = self.previous_ids::<E>(&repo, project)?;

            let mut ids: IdIndex<E::Summary> = IdIndex::default();
            let mut inverted: BTreeMap<&str, InvertedIndex> =
                E::INDEXES.iter().map(|name| (*name, InvertedIndex::default())).collect();

            for id in self.entity_ids(project, E::KIND)? {
                let path = repo.entity_path(project, &id);
                let mut entity: E = match self.store.read(&path) {
                    Ok(Some(entity)) => entity,
                    Ok(None) => {
                        warn!(path = %path, "entity directory without a document");
                        report.missing_document.push(id);
                        continue;
                    }
                    Err(Error::CorruptDocument { message, .. }) => {
                        warn!(path = %path, error = %message, "skipping corrupt document");
                        report.corrupt.push(path);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                if entity.id() != id || entity.project_id() != project {
                    warn!(path = %path, stored_id = entity.id(), "document disagrees with its location");
                    entity.set_id(id.clone());
                    entity.set_project_id(project.to_string());
                    report.relocated.push(id.clone());
                }

                for (name, index) in inverted.iter_mut() {
                    for key in entity.index_keys(name) {
                        index.add(key, id.as_str());
                    }
                }
                if !previous.contains(&id) {
                    report.added.push(id.clone());
                }
                ids.insert(id, entity.summary());
            }

            report.removed = previous
                .into_iter()
                .filter(|id| !ids.contains(id))
                .collect();
            report.indexed = ids.len();

            self.store.write(&repo.id_index_path(project), &ids)?;
            for (name, index) in &inverted {
                self.store.write(&repo.index_path(project, name), index)?;
            }
            Ok(report)
        })?;

        if report.is_clean() {
            info!(project, kind = %E::KIND, indexed = report.indexed, "indexes verified");
        } else {
            warn!(
                project,
                kind = %E::KIND,
                indexed = report.indexed,
                added = report.added.len(),
                removed = report.removed.len(),
                corrupt = report.corrupt.len(),
                "indexes repaired"
            );
        }
        Ok(report)
    }

    /// Ids of the entity directories under a kind directory
    fn entity_ids(&self, project: &str, kind: EntityKind) -> Result<Vec<String>> {
        let dir = vaultpath::kind_dir(project, kind);
        let mut ids = Vec::new();
        for name in self.store.list_dir(&dir)? {
            let path = format!("{dir}/{name}");
            match vaultpath::parse(&path) {
                Ok(ParsedPath::EntityDir { id, .. }) => ids.push(id),
                Ok(parsed) if parsed.is_index() => {}
                Ok(_) | Err(_) => warn!(path = %path, "ignoring unexpected entry"),
            }
        }
        Ok(ids)
    }

    /// Ids in the current id index; a corrupt index counts as empty
    fn previous_ids<E: Entity>(&self, repo: &Repository<E>, project: &str) -> Result<BTreeSet<String>> {
        let path = repo.id_index_path(project);
        match self.store.read::<IdIndex<serde_json::Value>>(&path) {
            Ok(index) => Ok(index.map(|i| i.ids().cloned().collect()).unwrap_or_default()),
            Err(Error::CorruptDocument { message, .. }) => {
                warn!(path = %path, error = %message, "replacing corrupt id index");
                Ok(BTreeSet::new())
            }
            Err(e) => Err(e),
        }
    }
}
