//! Test executions

use super::filter::within;
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

pub const BY_TEST_INDEX: &str = "by_test";
pub const BY_RUN_INDEX: &str = "by_run";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Queued,
    Running,
    Passed,
    Failed,
    Skipped,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Passed => "passed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Error => "error",
        }
    }

    /// Whether the execution has stopped for good
    pub fn is_finished(&self) -> bool {
        !matches!(self, ExecutionStatus::Queued | ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queued" => Ok(ExecutionStatus::Queued),
            "running" => Ok(ExecutionStatus::Running),
            "passed" => Ok(ExecutionStatus::Passed),
            "failed" => Ok(ExecutionStatus::Failed),
            "skipped" => Ok(ExecutionStatus::Skipped),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

/// Outcome of one test step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    pub test_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl Execution {
    pub fn new(test_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            project_id: String::new(),
            test_id: test_id.into(),
            run_id: None,
            environment_id: None,
            status: ExecutionStatus::default(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            error_message: None,
            step_results: Vec::new(),
            meta: EntityMeta::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_environment(mut self, environment_id: impl Into<String>) -> Self {
        self.environment_id = Some(environment_id.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn started(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Record the final status, deriving the duration from `started_at`
    pub fn finish(&mut self, status: ExecutionStatus, at: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(at);
        if let Some(started) = self.started_at {
            self.duration_ms = u64::try_from((at - started).num_milliseconds()).ok();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub test_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Entity for Execution {
    type Summary = ExecutionSummary;

    const KIND: EntityKind = EntityKind::Execution;
    const INDEXES: &'static [&'static str] = &[BY_TEST_INDEX, BY_RUN_INDEX];

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

    fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            test_id: self.test_id.clone(),
            run_id: self.run_id.clone(),
            status: self.status,
            started_at: self.started_at,
            updated_at: self.meta.updated_at,
        }
    }

    fn index_keys(&self, index: &str) -> Vec<String> {
        match index {
            BY_TEST_INDEX => vec![self.test_id.clone()],
            BY_RUN_INDEX => self.run_id.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub test_id: Option<String>,
    pub run_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ExecutionRepository {
    inner: Repository<Execution>,
}

impl Deref for ExecutionRepository {
    type Target = Repository<Execution>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl ExecutionRepository {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Repository::new(store),
        }
    }

    pub fn find_by_test(&self, project: &str, test_id: &str) -> Result<Vec<Execution>> {
        self.inner.find_by_keys(project, BY_TEST_INDEX, &[test_id], false)
    }

    pub fn find_by_run(&self, project: &str, run_id: &str) -> Result<Vec<Execution>> {
        self.inner.find_by_keys(project, BY_RUN_INDEX, &[run_id], false)
    }

    /// Most recently updated execution of a test
    pub fn latest_for_test(&self, project: &str, test_id: &str) -> Result<Option<Execution>> {
        Ok(self.find_by_test(project, test_id)?.into_iter().next())
    }

    pub fn find_by_filters(&self, project: &str, filter: &ExecutionFilter) -> Result<Vec<Execution>> {
        // intersect whichever key indexes the filter names
        let mut candidates: Option<BTreeSet<String>> = None;
        let keyed = [
            (BY_TEST_INDEX, filter.test_id.as_deref()),
            (BY_RUN_INDEX, filter.run_id.as_deref()),
        ];
        for (index, key) in keyed {
            if let Some(key) = key {
                let ids = self.inner.candidate_ids(project, index, &[key], false)?;
                candidates = Some(match candidates {
                    Some(current) => current.intersection(&ids).cloned().collect(),
                    None => ids,
                });
            }
        }

        let summaries = self.inner.summaries(project)?;
        let candidates = candidates.unwrap_or_else(|| summaries.ids().cloned().collect());
        let narrowed = candidates.into_iter().filter(|id| {
            summaries
                .get(id)
                .map_or(true, |s| filter.status.map_or(true, |status| s.status == status))
        });

        let mut executions = self.inner.hydrate(project, narrowed)?;
        executions.retain(|e| {
            filter.test_id.as_deref().map_or(true, |t| e.test_id == t)
                && filter
                    .run_id
                    .as_deref()
                    .map_or(true, |r| e.run_id.as_deref() == Some(r))
                && filter.status.map_or(true, |s| e.status == s)
                && within(e.started_at, filter.started_after, filter.started_before)
        });
        sort_recent(&mut executions);
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use chrono::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ExecutionRepository) {
        let tmp = TempDir::new().unwrap();
        let config = VaultConfig {
            fsync: false,
            ..Default::default()
        };
        let repo = ExecutionRepository::new(Store::open(tmp.path(), config));
        (tmp, repo)
    }

    #[test]
    fn test_find_by_test_and_run() {
        let (_tmp, repo) = setup();
        repo.create("p1", Execution::new("t1").with_id("e1").with_run("r1"))
            .unwrap();
        repo.create("p1", Execution::new("t1").with_id("e2").with_run("r2"))
            .unwrap();
        repo.create("p1", Execution::new("t2").with_id("e3").with_run("r1"))
            .unwrap();

        assert_eq!(repo.find_by_test("p1", "t1").unwrap().len(), 2);
        let run: Vec<_> = repo
            .find_by_run("p1", "r1")
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(run.len(), 2);
        assert!(run.contains(&"e1".to_string()) && run.contains(&"e3".to_string()));
    }

    #[test]
    fn test_latest_for_test_follows_updates() {
        let (_tmp, repo) = setup();
        repo.create("p1", Execution::new("t1").with_id("e1")).unwrap();
        repo.create("p1", Execution::new("t1").with_id("e2")).unwrap();
        repo.modify("p1", "e1", |e| {
            e.finish(ExecutionStatus::Passed, Utc::now());
            Ok(())
        })
        .unwrap();

        let latest = repo.latest_for_test("p1", "t1").unwrap().unwrap();
        assert_eq!(latest.id, "e1");
        assert_eq!(latest.status, ExecutionStatus::Passed);
        assert!(repo.latest_for_test("p1", "t9").unwrap().is_none());
    }

    #[test]
    fn test_moving_run_updates_index() {
        let (_tmp, repo) = setup();
        repo.create("p1", Execution::new("t1").with_id("e1").with_run("r1"))
            .unwrap();
        repo.modify("p1", "e1", |e| {
            e.run_id = Some("r2".into());
            Ok(())
        })
        .unwrap();

        assert!(repo.find_by_run("p1", "r1").unwrap().is_empty());
        assert_eq!(repo.find_by_run("p1", "r2").unwrap().len(), 1);
        assert!(repo.inverted("p1", BY_RUN_INDEX).unwrap().ids_for("r1").is_none());
    }

    #[test]
    fn test_find_by_filters() {
        let (_tmp, repo) = setup();
        let now = Utc::now();
        repo.create(
            "p1",
            Execution::new("t1")
                .with_id("e1")
                .with_run("r1")
                .with_status(ExecutionStatus::Failed)
                .started(now - Duration::hours(2)),
        )
        .unwrap();
        repo.create(
            "p1",
            Execution::new("t1")
                .with_id("e2")
                .with_run("r1")
                .with_status(ExecutionStatus::Passed)
                .started(now),
        )
        .unwrap();
        repo.create("p1", Execution::new("t2").with_id("e3").with_run("r1"))
            .unwrap();

        let failed = ExecutionFilter {
            run_id: Some("r1".into()),
            status: Some(ExecutionStatus::Failed),
            ..Default::default()
        };
        let found = repo.find_by_filters("p1", &failed).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "e1");

        let recent = ExecutionFilter {
            test_id: Some("t1".into()),
            started_after: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        let found = repo.find_by_filters("p1", &recent).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "e2");

        assert_eq!(repo.find_by_filters("p1", &ExecutionFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn test_finish_computes_duration() {
        let start = Utc::now();
        let mut execution = Execution::new("t1").started(start);
        execution.finish(ExecutionStatus::Failed, start + Duration::milliseconds(1500));
        assert_eq!(execution.duration_ms, Some(1500));
        assert!(execution.status.is_finished());
    }
}
