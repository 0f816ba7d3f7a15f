//! Repository / index layer
//!
//! Every entity kind follows one recipe, implemented once in
//! [`Repository`]:
//!
//! ```text
//! create:  stamp metadata, then under one transaction over
//!          {entity doc, id index, inverted indexes}:
//!          write entity, insert summary, insert key pairs
//! update:  same transaction set: read old (NotFound if absent), keep
//!          creation metadata, bump version, write, replace key pairs
//! delete:  same transaction set: read (false if absent), remove
//!          directory, drop summary and key pairs
//! queries: narrow ids through indexes, then hydrate documents
//! ```
//!
//! Kinds only describe their summary and secondary keys via [`Entity`].

pub mod environment;
pub mod execution;
pub mod filter;
pub mod index;
pub mod reconcile;
pub mod recording;
pub mod repository;
pub mod test_case;

pub use environment::{Environment, EnvironmentRepository, EnvironmentSummary};
pub use execution::{Execution, ExecutionFilter, ExecutionRepository, ExecutionStatus, ExecutionSummary, StepResult};
pub use filter::Pattern;
pub use index::{IdIndex, InvertedIndex};
pub use reconcile::{RebuildReport, Reconciler};
pub use recording::{RecordedEvent, RecordingRepository, RecordingSession, RecordingStatus, RecordingSummary};
pub use repository::Repository;
pub use test_case::{TestCase, TestFilter, TestRepository, TestStatus, TestStep, TestSummary};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use vaultpath::EntityKind;

/// Bookkeeping carried by every entity document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Default for EntityMeta {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            version: 0,
            created_by: None,
        }
    }
}

/// A persisted entity kind
pub trait Entity: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// What the id index stores for each entity
    type Summary: Serialize + DeserializeOwned + Clone + Debug + PartialEq;

    const KIND: EntityKind;

    /// Names of the inverted indexes this kind maintains
    const INDEXES: &'static [&'static str];

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn project_id(&self) -> &str;
    fn set_project_id(&mut self, project: String);
    fn meta(&self) -> &EntityMeta;
    fn meta_mut(&mut self) -> &mut EntityMeta;

    fn summary(&self) -> Self::Summary;

    /// Keys this entity contributes to the inverted index `index`
    fn index_keys(&self, index: &str) -> Vec<String>;

    /// Extra resource locked alongside the entity document, if any
    fn family_resource(_id: &str) -> Option<String> {
        None
    }

    /// Carry over fields an `update` must not replace
    fn preserve_from(&mut self, _previous: &Self) {}
}

/// Most recently updated first; ties broken by id so the order is stable
pub fn sort_recent<E: Entity>(entities: &mut [E]) {
    entities.sort_by(|a, b| {
        b.meta()
            .updated_at
            .cmp(&a.meta().updated_at)
            .then_with(|| a.id().cmp(b.id()))
    });
}
