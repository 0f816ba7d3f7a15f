//! Recording sessions
//!
//! A session accumulates browser events, optionally with a screenshot per
//! event, until it is stopped and later converted into a test. Every change
//! to a session, including its screenshot files, happens under the session's
//! own resource lock (`session:{id}`) in addition to its document lock.

use super::{Entity, EntityMeta, Repository};
use crate::error::{Error, Result};
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use vaultpath::EntityKind;

pub const BY_TEST_INDEX: &str = "by_test";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    #[default]
    Recording,
    Stopped,
    Converted,
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordingStatus::Recording => "recording",
            RecordingStatus::Stopped => "stopped",
            RecordingStatus::Converted => "converted",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Position in the session, starting at 1; assigned on append
    #[serde(default)]
    pub seq: u64,
    /// Event type, e.g. `click` or `input`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Attachment name of the screenshot, relative to the session directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl RecordedEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            seq: 0,
            kind: kind.into(),
            selector: None,
            value: None,
            timestamp: Utc::now(),
            screenshot: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub start_url: String,
    #[serde(default)]
    pub status: RecordingStatus,
    #[serde(default)]
    pub events: Vec<RecordedEvent>,
    /// Test produced from this session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(flatten)]
    pub meta: EntityMeta,
}

impl RecordingSession {
    pub fn new(name: impl Into<String>, start_url: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            project_id: String::new(),
            name: name.into(),
            start_url: start_url.into(),
            status: RecordingStatus::default(),
            events: Vec::new(),
            test_id: None,
            meta: EntityMeta::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn next_seq(&self) -> u64 {
        self.events.last().map_or(1, |e| e.seq + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub name: String,
    pub status: RecordingStatus,
    pub event_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl Entity for RecordingSession {
    type Summary = RecordingSummary;

    const KIND: EntityKind = EntityKind::Recording;
    const INDEXES: &'static [&'static str] = &[BY_TEST_INDEX];

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

    fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            name: self.name.clone(),
            status: self.status,
            event_count: self.events.len(),
            updated_at: self.meta.updated_at,
        }
    }

    fn index_keys(&self, index: &str) -> Vec<String> {
        match index {
            BY_TEST_INDEX => self.test_id.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn family_resource(id: &str) -> Option<String> {
        Some(vaultpath::session_resource(id))
    }

    // events only change through append_event
    fn preserve_from(&mut self, previous: &Self) {
        self.events = previous.events.clone();
    }
}

fn screenshot_name(seq: u64) -> String {
    format!("screenshots/{seq}.png")
}

#[derive(Debug, Clone)]
pub struct RecordingRepository {
    inner: Repository<RecordingSession>,
}

impl Deref for RecordingRepository {
    type Target = Repository<RecordingSession>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl RecordingRepository {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Repository::new(store),
        }
    }

    /// Append an event to a session that is still recording
    ///
    /// The event gets the next sequence number. A screenshot, if given, is
    /// stored beside the session document before the document is written.
    pub fn append_event(
        &self,
        project: &str,
        session_id: &str,
        mut event: RecordedEvent,
        screenshot: Option<&[u8]>,
    ) -> Result<RecordedEvent> {
        let documents = self.inner.store().documents();

        let session = self.inner.modify(project, session_id, |session| {
            if session.status != RecordingStatus::Recording {
                return Err(Error::InvalidState {
                    kind: EntityKind::Recording,
                    id: session_id.to_string(),
                    message: format!("session is {}, not recording", session.status),
                });
            }

            event.seq = session.next_seq();
            event.screenshot = None;
            if let Some(bytes) = screenshot {
                let name = screenshot_name(event.seq);
                let path = vaultpath::attachment_path(project, EntityKind::Recording, session_id, &name);
                documents.write_bytes(&path, bytes)?;
                event.screenshot = Some(name);
            }
            session.events.push(event);
            Ok(())
        })?;

        session.events.last().cloned().ok_or_else(|| Error::InvalidState {
            kind: EntityKind::Recording,
            id: session_id.to_string(),
            message: "appended event missing after write".into(),
        })
    }

    /// Screenshot bytes of one event, if it has any
    pub fn screenshot(&self, project: &str, session_id: &str, seq: u64) -> Result<Option<Vec<u8>>> {
        crate::validation::validate_project_id(project)?;
        crate::validation::validate_entity_id(session_id)?;
        let store = self.inner.store();

        // every writer of the session holds this lock, so plain reads are safe under it
        let _session = store.read_lock(&vaultpath::session_resource(session_id))?;
        let path = self.inner.entity_path(project, session_id);
        let Some(session) = store.documents().read::<RecordingSession>(&path)? else {
            return Ok(None);
        };
        let Some(name) = session
            .events
            .iter()
            .find(|e| e.seq == seq)
            .and_then(|e| e.screenshot.clone())
        else {
            return Ok(None);
        };
        crate::validation::validate_attachment_name(&name)?;
        let path = vaultpath::attachment_path(project, EntityKind::Recording, session_id, &name);
        store.documents().read_bytes(&path)
    }

    /// Stop recording; stopping an already stopped session is a no-op
    pub fn stop(&self, project: &str, session_id: &str) -> Result<RecordingSession> {
        crate::validation::validate_project_id(project)?;
        crate::validation::validate_entity_id(session_id)?;
        let resources = self.inner.resources(project, session_id);
        self.inner.store().run_in_transaction(resources, || {
            let session = self
                .inner
                .get(project, session_id)?
                .ok_or_else(|| Error::not_found(EntityKind::Recording, project, session_id))?;

            match session.status {
                RecordingStatus::Stopped => Ok(session),
                RecordingStatus::Recording => self.inner.modify(project, session_id, |session| {
                    session.status = RecordingStatus::Stopped;
                    Ok(())
                }),
                RecordingStatus::Converted => Err(Error::InvalidState {
                    kind: EntityKind::Recording,
                    id: session_id.to_string(),
                    message: "session was already converted".into(),
                }),
            }
        })
    }

    /// Link a stopped session to the test produced from it
    pub fn mark_converted(&self, project: &str, session_id: &str, test_id: &str) -> Result<RecordingSession> {
        self.inner.modify(project, session_id, |session| {
            if session.status == RecordingStatus::Recording {
                return Err(Error::InvalidState {
                    kind: EntityKind::Recording,
                    id: session_id.to_string(),
                    message: "stop the session before converting it".into(),
                });
            }
            session.status = RecordingStatus::Converted;
            session.test_id = Some(test_id.to_string());
            Ok(())
        })
    }

    pub fn find_by_test(&self, project: &str, test_id: &str) -> Result<Vec<RecordingSession>> {
        self.inner.find_by_keys(project, BY_TEST_INDEX, &[test_id], false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VaultConfig;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RecordingRepository) {
        let tmp = TempDir::new().unwrap();
        let config = VaultConfig {
            fsync: false,
            ..Default::default()
        };
        let repo = RecordingRepository::new(Store::open(tmp.path(), config));
        (tmp, repo)
    }

    #[test]
    fn test_append_events_with_screenshots() {
        let (_tmp, repo) = setup();
        repo.create("p1", RecordingSession::new("checkout", "https://shop.test").with_id("s1"))
            .unwrap();

        let first = repo
            .append_event("p1", "s1", RecordedEvent::new("click").with_selector("#buy"), Some(b"png-1".as_slice()))
            .unwrap();
        let second = repo
            .append_event("p1", "s1", RecordedEvent::new("input").with_value("42"), None)
            .unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(first.screenshot.as_deref(), Some("screenshots/1.png"));
        assert_eq!(second.seq, 2);
        assert_eq!(repo.screenshot("p1", "s1", 1).unwrap(), Some(b"png-1".to_vec()));
        assert_eq!(repo.screenshot("p1", "s1", 2).unwrap(), None);
        assert_eq!(repo.summaries("p1").unwrap().get("s1").unwrap().event_count, 2);
    }

    #[test]
    fn test_concurrent_appends_keep_every_event() {
        let (_tmp, repo) = setup();
        repo.create("p1", RecordingSession::new("busy", "https://app.test").with_id("s1"))
            .unwrap();

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let repo = repo.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..5 {
                        repo.append_event("p1", "s1", RecordedEvent::new(format!("click-{n}")), None)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let session = repo.get("p1", "s1").unwrap().unwrap();
        let seqs: Vec<u64> = session.events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_stop_twice_leaves_session_untouched() {
        let (_tmp, repo) = setup();
        repo.create("p1", RecordingSession::new("short", "https://app.test").with_id("s1"))
            .unwrap();

        let stopped = repo.stop("p1", "s1").unwrap();
        assert_eq!(stopped.status, RecordingStatus::Stopped);
        assert_eq!(stopped.meta.version, 2);

        let again = repo.stop("p1", "s1").unwrap();
        assert_eq!(again, stopped);
        assert_eq!(repo.get("p1", "s1").unwrap().unwrap().meta.version, 2);
        assert!(matches!(repo.stop("p1", "ghost").unwrap_err(), Error::NotFound { .. }));
    }

    #[test]
    fn test_stopped_session_refuses_events() {
        let (_tmp, repo) = setup();
        repo.create("p1", RecordingSession::new("short", "https://app.test").with_id("s1"))
            .unwrap();
        repo.stop("p1", "s1").unwrap();

        let err = repo
            .append_event("p1", "s1", RecordedEvent::new("click"), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));

        let converted = repo.mark_converted("p1", "s1", "t1").unwrap();
        assert_eq!(converted.status, RecordingStatus::Converted);
        assert_eq!(repo.find_by_test("p1", "t1").unwrap().len(), 1);
        assert!(repo.stop("p1", "s1").is_err());
    }

    #[test]
    fn test_update_keeps_events() {
        let (_tmp, repo) = setup();
        repo.create("p1", RecordingSession::new("a", "https://app.test").with_id("s1"))
            .unwrap();
        repo.append_event("p1", "s1", RecordedEvent::new("click"), None)
            .unwrap();

        let renamed = repo
            .update("p1", "s1", RecordingSession::new("renamed", "https://app.test"))
            .unwrap();
        assert_eq!(renamed.name, "renamed");
        assert_eq!(renamed.events.len(), 1);
    }

    #[test]
    fn test_delete_removes_screenshots() {
        let (tmp, repo) = setup();
        repo.create("p1", RecordingSession::new("a", "https://app.test").with_id("s1"))
            .unwrap();
        repo.append_event("p1", "s1", RecordedEvent::new("click"), Some(b"png".as_slice()))
            .unwrap();

        assert!(repo.delete("p1", "s1").unwrap());
        assert!(!tmp.path().join("projects/p1/recordings/s1").exists());
        assert_eq!(repo.screenshot("p1", "s1", 1).unwrap(), None);
    }
}
