//! Test definitions

use super::filter::{contains_text, within, Pattern};
use super::{sort_recent, Entity, EntityMeta, Repository};
use crate::error::Result;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use vaultpath::EntityKind;

/// Inverted index of tags
pub const TAGS_INDEX: &str = "tags";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Draft,
    Active,
    Deprecated,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Active => "active",
            TestStatus::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(TestStatus::Draft),
            "active" => Ok(TestStatus::Active),
            "deprecated" => Ok(TestStatus::Deprecated),
            other => Err(format!("unknown test status '{other}'")),
        }
    }
}

/// One step of a test: an action against an optional target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub status: TestStatus,
    #[serde(default)]
    pub steps: Vec<TestStep>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            project_id: String::new(),
            name: name.into(),
            description: String::new(),
            tags: BTreeSet::new(),
            status: TestStatus::default(),
            steps: Vec::new(),
            meta: EntityMeta::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: TestStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_step(mut self, step: TestStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// Id-index entry for a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub name: String,
    pub status: TestStatus,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for TestCase {
    type Summary = TestSummary;

    const KIND: EntityKind = EntityKind::Test;
    const INDEXES: &'static [&'static str] = &[TAGS_INDEX];

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

    fn summary(&self) -> TestSummary {
        TestSummary {
            name: self.name.clone(),
            status: self.status,
            tags: self.tags.clone(),
            updated_at: self.meta.updated_at,
        }
    }

    fn index_keys(&self, index: &str) -> Vec<String> {
        match index {
            TAGS_INDEX => self.tags.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

/// Criteria for [`TestRepository::find_by_filters`]; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    pub tags: Vec<String>,
    /// Require every tag instead of any
    pub match_all_tags: bool,
    pub status: Option<TestStatus>,
    /// `%` / `_` wildcard pattern over the name
    pub name_pattern: Option<String>,
    /// Substring of the name or description
    pub text: Option<String>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

/// Repository of [`TestCase`]s
#[derive(Debug, Clone)]
pub struct TestRepository {
    inner: Repository<TestCase>,
}

impl Deref for TestRepository {
    type Target = Repository<TestCase>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl TestRepository {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Repository::new(store),
        }
    }

    pub fn find_by_tags<K: AsRef<str>>(
        &self,
        project: &str,
        tags: &[K],
        match_all: bool,
    ) -> Result<Vec<TestCase>> {
        self.inner.find_by_keys(project, TAGS_INDEX, tags, match_all)
    }

    pub fn find_by_filters(&self, project: &str, filter: &TestFilter) -> Result<Vec<TestCase>> {
        let pattern = filter.name_pattern.as_deref().map(Pattern::new).transpose()?;
        let summaries = self.inner.summaries(project)?;

        let candidates = if filter.tags.is_empty() {
            summaries.ids().cloned().collect()
        } else {
            self.inner
                .candidate_ids(project, TAGS_INDEX, filter.tags.as_slice(), filter.match_all_tags)?
        };

        // narrow on summaries first so only survivors are loaded
        let narrowed = candidates.into_iter().filter(|id| match summaries.get(id) {
            Some(summary) => {
                filter.status.map_or(true, |s| summary.status == s)
                    && pattern.as_ref().map_or(true, |p| p.is_match(&summary.name))
            }
            None => true,
        });

        let mut tests = self.inner.hydrate(project, narrowed)?;
        tests.retain(|test| matches(test, filter, pattern.as_ref()));
        sort_recent(&mut tests);
        Ok(tests)
    }
}

fn matches(test: &TestCase, filter: &TestFilter, pattern: Option<&Pattern>) -> bool {
    if !filter.tags.is_empty() {
        let has = |tag: &String| test.tags.contains(tag);
        let tagged = if filter.match_all_tags {
            filter.tags.iter().all(has)
        } else {
            filter.tags.iter().any(has)
        };
        if !tagged {
            return false;
        }
    }
    filter.status.map_or(true, |s| test.status == s)
        && pattern.map_or(true, |p| p.is_match(&test.name))
        && filter
            .text
            .as_deref()
            .map_or(true, |t| contains_text(t, [test.name.as_str(), test.description.as_str()]))
        && within(
            Some(test.meta.updated_at),
            filter.updated_after,
            filter.updated_before,
        )
}
