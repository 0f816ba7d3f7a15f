//! vaultpath - logical path scheme for testvault
//!
//! Maps a logical entity ("test 7 in project 3") to its storage path and to
//! the companion index documents kept next to it. Paths are `/`-separated and
//! relative to the storage root.
//!
//! # Layout
//!
//! ```text
//! projects/
//!   {project}/
//!     tests/
//!       _index.json          id -> summary
//!       _tags.json           tag -> ids
//!       {id}/test.json
//!     executions/
//!       _index.json
//!       _by_test.json        test id -> execution ids
//!       _by_run.json         run id -> execution ids
//!       {id}/execution.json
//!     recordings/
//!       _index.json
//!       _by_test.json
//!       {id}/recording.json
//!       {id}/screenshots/{seq}.png
//!     environments/
//!       _index.json
//!       _by_name.json
//!       {id}/environment.json
//! ```
//!
//! The scheme knows nothing about what the documents contain. [`parse`] goes
//! the other way and classifies a logical path.

mod error;
mod parser;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use error::ParseError;

/// Top-level directory holding every project subtree
pub const PROJECTS_DIR: &str = "projects";

/// File name of the id -> summary index in each kind directory
pub const ID_INDEX_FILE: &str = "_index.json";

/// Prefix of every index document name
pub const INDEX_PREFIX: char = '_';

/// Prefix of resource ids that name a recording session rather than a path
pub const SESSION_RESOURCE_PREFIX: &str = "session:";

/// The kinds of entity persisted in a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Test,
    Execution,
    Recording,
    Environment,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Test,
        EntityKind::Execution,
        EntityKind::Recording,
        EntityKind::Environment,
    ];

    /// Directory holding every entity of this kind within a project
    pub fn dir_name(self) -> &'static str {
        match self {
            EntityKind::Test => "tests",
            EntityKind::Execution => "executions",
            EntityKind::Recording => "recordings",
            EntityKind::Environment => "environments",
        }
    }

    /// Canonical document file inside each entity directory
    pub fn file_name(self) -> &'static str {
        match self {
            EntityKind::Test => "test.json",
            EntityKind::Execution => "execution.json",
            EntityKind::Recording => "recording.json",
            EntityKind::Environment => "environment.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Test => "test",
            EntityKind::Execution => "execution",
            EntityKind::Recording => "recording",
            EntityKind::Environment => "environment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.dir_name() == s)
            .ok_or_else(|| ParseError::new(format!("Unknown entity kind: {}", s)))
    }
}

/// `projects/{project}`
pub fn project_dir(project: &str) -> String {
    format!("{}/{}", PROJECTS_DIR, project)
}

/// `projects/{project}/{kind dir}`
pub fn kind_dir(project: &str, kind: EntityKind) -> String {
    format!("{}/{}", project_dir(project), kind.dir_name())
}

/// `projects/{project}/{kind dir}/{id}`
pub fn entity_dir(project: &str, kind: EntityKind, id: &str) -> String {
    format!("{}/{}", kind_dir(project, kind), id)
}

/// `projects/{project}/{kind dir}/{id}/{file}`
pub fn entity_path(project: &str, kind: EntityKind, id: &str) -> String {
    format!("{}/{}", entity_dir(project, kind, id), kind.file_name())
}

/// `projects/{project}/{kind dir}/_index.json`
pub fn id_index_path(project: &str, kind: EntityKind) -> String {
    format!("{}/{}", kind_dir(project, kind), ID_INDEX_FILE)
}

/// `projects/{project}/{kind dir}/_{name}.json`
pub fn inverted_index_path(project: &str, kind: EntityKind, name: &str) -> String {
    format!("{}/{}{}.json", kind_dir(project, kind), INDEX_PREFIX, name)
}

/// `projects/{project}/{kind dir}/{id}/{name}` for files stored beside the entity document
pub fn attachment_path(project: &str, kind: EntityKind, id: &str, name: &str) -> String {
    format!("{}/{}", entity_dir(project, kind, id), name)
}

/// Resource id of a recording session
pub fn session_resource(session_id: &str) -> String {
    format!("{}{}", SESSION_RESOURCE_PREFIX, session_id)
}

/// What a logical path refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParsedPath {
    /// `projects`
    Root,
    /// `projects/{project}`
    Project { project: String },
    /// `projects/{project}/{kind dir}`
    KindDir { project: String, kind: EntityKind },
    /// `projects/{project}/{kind dir}/_index.json`
    IdIndex { project: String, kind: EntityKind },
    /// `projects/{project}/{kind dir}/_{name}.json`
    InvertedIndex {
        project: String,
        kind: EntityKind,
        name: String,
    },
    /// `projects/{project}/{kind dir}/{id}`
    EntityDir {
        project: String,
        kind: EntityKind,
        id: String,
    },
    /// `projects/{project}/{kind dir}/{id}/{file}`
    Entity {
        project: String,
        kind: EntityKind,
        id: String,
    },
    /// Any other file under an entity directory
    Attachment {
        project: String,
        kind: EntityKind,
        id: String,
        name: String,
    },
}

impl ParsedPath {
    pub fn project(&self) -> Option<&str> {
        match self {
            ParsedPath::Root => None,
            ParsedPath::Project { project }
            | ParsedPath::KindDir { project, .. }
            | ParsedPath::IdIndex { project, .. }
            | ParsedPath::InvertedIndex { project, .. }
            | ParsedPath::EntityDir { project, .. }
            | ParsedPath::Entity { project, .. }
            | ParsedPath::Attachment { project, .. } => Some(project),
        }
    }

    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            ParsedPath::Root | ParsedPath::Project { .. } => None,
            ParsedPath::KindDir { kind, .. }
            | ParsedPath::IdIndex { kind, .. }
            | ParsedPath::InvertedIndex { kind, .. }
            | ParsedPath::EntityDir { kind, .. }
            | ParsedPath::Entity { kind, .. }
            | ParsedPath::Attachment { kind, .. } => Some(*kind),
        }
    }

    /// True for `_index.json` and inverted index documents
    pub fn is_index(&self) -> bool {
        matches!(
            self,
            ParsedPath::IdIndex { .. } | ParsedPath::InvertedIndex { .. }
        )
    }
}

/// Classify a logical path
pub fn parse(input: &str) -> Result<ParsedPath, ParseError> {
    parser::parse_path(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_paths() {
        assert_eq!(
            entity_path("3", EntityKind::Test, "7"),
            "projects/3/tests/7/test.json"
        );
        assert_eq!(id_index_path("3", EntityKind::Test), "projects/3/tests/_index.json");
        assert_eq!(
            inverted_index_path("3", EntityKind::Test, "tags"),
            "projects/3/tests/_tags.json"
        );
        assert_eq!(
            inverted_index_path("p", EntityKind::Execution, "by_test"),
            "projects/p/executions/_by_test.json"
        );
    }

    #[test]
    fn test_session_resource_is_not_a_path() {
        let resource = session_resource("abc");
        assert_eq!(resource, "session:abc");
        assert!(parse(&resource).is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("tests".parse::<EntityKind>().unwrap(), EntityKind::Test);
        assert_eq!("execution".parse::<EntityKind>().unwrap(), EntityKind::Execution);
        assert!("widgets".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_scheme_and_parser_agree() {
        for kind in EntityKind::ALL {
            let path = entity_path("p1", kind, "e-1");
            assert_eq!(
                parse(&path).unwrap(),
                ParsedPath::Entity {
                    project: "p1".into(),
                    kind,
                    id: "e-1".into()
                }
            );
            assert!(parse(&id_index_path("p1", kind)).unwrap().is_index());
        }
    }
}
