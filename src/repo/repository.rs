//! Generic repository over one entity kind

use super::index::{IdIndex, InvertedIndex};
use super::{sort_recent, Entity};
use crate::error::{Error, Result};
use crate::store::Store;
use crate::validation::{validate_entity_id, validate_project_id};
use chrono::Utc;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use tracing::{debug, warn};
use uuid::Uuid;

/// CRUD and index maintenance for entities of kind `E`
pub struct Repository<E: Entity> {
    store: Store,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self::new(self.store.clone())
    }
}

impl<E: Entity> std::fmt::Debug for Repository<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("kind", &E::KIND)
            .field("root", &self.store.root())
            .finish()
    }
}

impl<E: Entity> Repository<E> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ==========================================================================
    // Paths
    // ==========================================================================

    pub fn entity_path(&self, project: &str, id: &str) -> String {
        vaultpath::entity_path(project, E::KIND, id)
    }

    pub fn entity_dir(&self, project: &str, id: &str) -> String {
        vaultpath::entity_dir(project, E::KIND, id)
    }

    pub fn id_index_path(&self, project: &str) -> String {
        vaultpath::id_index_path(project, E::KIND)
    }

    pub fn index_path(&self, project: &str, name: &str) -> String {
        vaultpath::inverted_index_path(project, E::KIND, name)
    }

    /// The id index and every inverted index of a project
    pub fn index_resources(&self, project: &str) -> Vec<String> {
        let mut resources = vec![self.id_index_path(project)];
        resources.extend(E::INDEXES.iter().map(|name| self.index_path(project, name)));
        resources
    }

    /// Everything a mutation of one entity locks
    pub fn resources(&self, project: &str, id: &str) -> Vec<String> {
        let mut resources = self.index_resources(project);
        resources.push(self.entity_path(project, id));
        resources.extend(E::family_resource(id));
        resources
    }

    // ==========================================================================
    // Mutations
    // ==========================================================================

    /// Persist a new entity, generating an id if it has none
    pub fn create(&self, project: &str, mut entity: E) -> Result<E> {
        validate_project_id(project)?;
        if entity.id().is_empty() {
            entity.set_id(Uuid::new_v4().to_string());
        }
        let id = entity.id().to_string();
        validate_entity_id(&id)?;

        entity.set_project_id(project.to_string());
        let now = Utc::now();
        let meta = entity.meta_mut();
        meta.created_at = now;
        meta.updated_at = now;
        meta.version = 1;

        let path = self.entity_path(project, &id);
        let entity = self.store.run_in_transaction(self.resources(project, &id), || {
            if self.store.exists(&path)? {
                return Err(Error::AlreadyExists {
                    kind: E::KIND,
                    project: project.to_string(),
                    id: id.clone(),
                });
            }
            self.store.create_dir(&self.entity_dir(project, &id))?;
            self.store.write(&path, &entity)?;
            self.write_indexes(project, &id, Some(&entity))?;
            Ok(entity)
        })?;

        debug!(kind = %E::KIND, project, id = %id, "created");
        Ok(entity)
    }

    /// Replace an entity, keeping its creation metadata
    pub fn update(&self, project: &str, id: &str, entity: E) -> Result<E> {
        self.replace_with(project, id, move |existing| {
            let mut next = entity;
            next.preserve_from(existing);
            Ok(next)
        })
    }

    /// Read-modify-write an entity under its transaction
    pub fn modify<F>(&self, project: &str, id: &str, change: F) -> Result<E>
    where
        F: FnOnce(&mut E) -> Result<()>,
    {
        self.replace_with(project, id, |existing| {
            let mut next = existing.clone();
            change(&mut next)?;
            Ok(next)
        })
    }

    fn replace_with<F>(&self, project: &str, id: &str, make: F) -> Result<E>
    where
        F: FnOnce(&E) -> Result<E>,
    {
        check_ids(project, id)?;
        let path = self.entity_path(project, id);

        let entity = self.store.run_in_transaction(self.resources(project, id), || {
            let existing: E = self
                .store
                .read(&path)?
                .ok_or_else(|| Error::not_found(E::KIND, project, id))?;

            let mut next = make(&existing)?;
            next.set_id(id.to_string());
            next.set_project_id(project.to_string());

            let previous = existing.meta();
            let meta = next.meta_mut();
            meta.created_at = previous.created_at;
            meta.created_by = previous.created_by.clone();
            meta.version = previous.version + 1;
            meta.updated_at = Utc::now().max(previous.updated_at);

            self.store.write(&path, &next)?;
            self.write_indexes(project, id, Some(&next))?;
            Ok(next)
        })?;

        debug!(kind = %E::KIND, project, id, version = entity.meta().version, "updated");
        Ok(entity)
    }

    /// Remove an entity, its directory and every index reference to it
    ///
    /// Returns false when there was nothing to delete.
    pub fn delete(&self, project: &str, id: &str) -> Result<bool> {
        check_ids(project, id)?;
        let path = self.entity_path(project, id);

        let deleted = self.store.run_in_transaction(self.resources(project, id), || {
            // existence only, so a corrupt document can still be deleted
            if !self.store.exists(&path)? {
                return Ok(false);
            }
            self.store.documents().delete(&self.entity_dir(project, id))?;
            self.write_indexes(project, id, None)?;
            Ok(true)
        })?;

        if deleted {
            debug!(kind = %E::KIND, project, id, "deleted");
        }
        Ok(deleted)
    }

    /// Bring the id index and inverted indexes in line with `entity`
    ///
    /// `None` removes every reference to `id`. Callers hold the index locks.
    fn write_indexes(&self, project: &str, id: &str, entity: Option<&E>) -> Result<()> {
        let index_path = self.id_index_path(project);
        let mut ids: IdIndex<E::Summary> = self.store.read(&index_path)?.unwrap_or_default();
        match entity {
            Some(entity) => {
                ids.insert(id, entity.summary());
            }
            None => {
                ids.remove(id);
            }
        }
        self.store.write(&index_path, &ids)?;

        for name in E::INDEXES {
            let path = self.index_path(project, name);
            let mut inverted: InvertedIndex = self.store.read(&path)?.unwrap_or_default();
            let keys = entity.map(|e| e.index_keys(name)).unwrap_or_default();
            inverted.set_keys(id, &keys);
            self.store.write(&path, &inverted)?;
        }
        Ok(())
    }

    // ==========================================================================
    // Queries
    // ==========================================================================

    pub fn get(&self, project: &str, id: &str) -> Result<Option<E>> {
        check_ids(project, id)?;
        self.store.read(&self.entity_path(project, id))
    }

    pub fn exists(&self, project: &str, id: &str) -> Result<bool> {
        check_ids(project, id)?;
        self.store.exists(&self.entity_path(project, id))
    }

    /// The id index; empty if the project has none yet
    pub fn summaries(&self, project: &str) -> Result<IdIndex<E::Summary>> {
        validate_project_id(project)?;
        Ok(self.store.read(&self.id_index_path(project))?.unwrap_or_default())
    }

    /// An inverted index; empty if the project has none yet
    pub fn inverted(&self, project: &str, name: &str) -> Result<InvertedIndex> {
        validate_project_id(project)?;
        Ok(self.store.read(&self.index_path(project, name))?.unwrap_or_default())
    }

    pub fn count(&self, project: &str) -> Result<usize> {
        Ok(self.summaries(project)?.len())
    }

    /// Every entity of the project, most recently updated first
    pub fn find_all(&self, project: &str) -> Result<Vec<E>> {
        let ids: Vec<String> = self.summaries(project)?.ids().cloned().collect();
        let mut entities = self.hydrate(project, ids)?;
        sort_recent(&mut entities);
        Ok(entities)
    }

    /// Ids under `keys` in the inverted index `index`
    pub fn candidate_ids<K: AsRef<str>>(
        &self,
        project: &str,
        index: &str,
        keys: &[K],
        match_all: bool,
    ) -> Result<BTreeSet<String>> {
        let inverted = self.inverted(project, index)?;
        Ok(if match_all {
            inverted.match_all(keys)
        } else {
            inverted.match_any(keys)
        })
    }

    /// Entities whose keys in `index` match all (or any) of `keys`
    pub fn find_by_keys<K: AsRef<str>>(
        &self,
        project: &str,
        index: &str,
        keys: &[K],
        match_all: bool,
    ) -> Result<Vec<E>> {
        let ids = self.candidate_ids(project, index, keys, match_all)?;
        let mut entities = self.hydrate(project, ids)?;

        // the index was read before the documents; re-check against what was loaded
        entities.retain(|entity| keys_match(&entity.index_keys(index), keys, match_all));
        sort_recent(&mut entities);
        Ok(entities)
    }

    /// Load each id, skipping ids whose document has gone
    pub fn hydrate<I>(&self, project: &str, ids: I) -> Result<Vec<E>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut entities = Vec::new();
        for id in ids {
            match self.get(project, &id)? {
                Some(entity) => entities.push(entity),
                None => warn!(kind = %E::KIND, project, id = %id, "index references a missing document"),
            }
        }
        Ok(entities)
    }
}

fn check_ids(project: &str, id: &str) -> Result<()> {
    validate_project_id(project)?;
    validate_entity_id(id)?;
    Ok(())
}

fn keys_match<K: AsRef<str>>(entity_keys: &[String], wanted: &[K], match_all: bool) -> bool {
    let has = |key: &K| entity_keys.iter().any(|k| k == key.as_ref());
    if match_all {
        wanted.iter().all(has)
    } else {
        wanted.iter().any(has)
    }
}
