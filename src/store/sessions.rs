//! Project-nested persistence of chat sessions and their append-only
//! message logs.
//!
//! Each session is an independent aggregate under
//! `<data>/projects/<project_id>/chat_sessions/<session_id>/`, holding
//! `metadata.json` and `messages.json`. The legacy flat layout
//! `<data>/chat_sessions/<session_id>/` stays readable for sessions that
//! predate projects (their records carry an empty project id). Writers on
//! one session serialize through a per-session lock; the message append and
//! the cached count update are only ever observable together.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::{MessageId, ProjectId, ProviderId, SessionId};
use crate::dispatch::request::{ChatRole, FinishReason, TokenUsage};
use crate::store::context::ContextStore;

const METADATA_FILE: &str = "metadata.json";
const MESSAGES_FILE: &str = "messages.json";

/// Records written by the legacy flat layout carry no project id.
fn empty_project_id() -> ProjectId {
    ProjectId::from_string("")
}

/// A chat session record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatSession {
    /// Stable identifier.
    pub id: SessionId,
    /// Owning project; empty only for legacy flat-layout sessions.
    #[serde(default = "empty_project_id")]
    pub project_id: ProjectId,
    /// Title.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Inactive sessions are hidden from default listings.
    pub active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp; bumped on every append.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata bag.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Cached message count; always equals the log length.
    pub message_count: u64,
}

impl ChatSession {
    /// Create a session record under a project.
    #[must_use]
    pub fn new(project_id: ProjectId, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            project_id,
            title: title.into(),
            description: None,
            active: true,
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Null,
            message_count: 0,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the metadata bag.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Structured metadata carried by stored messages.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Model that produced an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Provider the assistant message came through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<ProviderId>,
    /// Token accounting for the exchange.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Why the upstream stopped generating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Free-form extras.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

/// One entry of a session's append-only message log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Stable identifier.
    pub id: MessageId,
    /// Message role.
    pub role: ChatRole,
    /// Message content.
    pub content: String,
    /// Wall-clock timestamp; ordering is by append position, not time.
    pub timestamp: DateTime<Utc>,
    /// Structured metadata.
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// Create a message with empty metadata.
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// File-backed session and message store.
pub struct SessionStore {
    data_dir: PathBuf,
    contexts: Arc<ContextStore>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionStore {
    /// Open the store over the data directory.
    ///
    /// # Errors
    /// Returns an error if the base directories cannot be created.
    pub fn new(data_dir: &Path, contexts: Arc<ContextStore>) -> ChatResult<Self> {
        fs::create_dir_all(data_dir.join("projects"))?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            contexts,
            locks: DashMap::new(),
        })
    }

    /// Create a session under its project.
    ///
    /// # Errors
    /// Fails with `missing_project_id` when the record carries an empty
    /// project id and `project_not_found` when the project does not exist.
    pub async fn create_session(&self, session: ChatSession) -> ChatResult<ChatSession> {
        if session.project_id.is_empty() {
            return Err(ChatError::MissingProjectId);
        }
        if !self.project_exists(&session.project_id) {
            return Err(ChatError::ProjectNotFound(session.project_id.clone()));
        }

        let lock = self.lock_for(&session.id);
        let _guard = lock.lock().await;

        let dir = self.session_dir(&session.project_id, &session.id);
        fs::create_dir_all(&dir)?;
        write_json(&dir.join(MESSAGES_FILE), &Vec::<Message>::new())?;
        write_json(&dir.join(METADATA_FILE), &session)?;
        info!("Created session {} under project {}", session.id, session.project_id);
        Ok(session)
    }

    /// Fetch a session by id under a specific project. Cross-project reads
    /// return `None`.
    ///
    /// # Errors
    /// Fails with `missing_project_id` / `invalid_argument` when either id
    /// is empty, or on unreadable records.
    pub async fn get_session(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
    ) -> ChatResult<Option<ChatSession>> {
        if project_id.is_empty() {
            return Err(ChatError::MissingProjectId);
        }
        if session_id.is_empty() {
            return Err(ChatError::InvalidArgument(
                "session id must not be empty".to_string(),
            ));
        }

        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        read_json_opt(&self.session_dir(project_id, session_id).join(METADATA_FILE))
    }

    /// Locate a session by id alone: the legacy flat layout first, then
    /// every project subtree. This is the resolution path the orchestrator
    /// uses, since send requests carry only a session id.
    ///
    /// # Errors
    /// Returns an error on unreadable records or directories.
    pub async fn find_session(&self, session_id: &SessionId) -> ChatResult<Option<ChatSession>> {
        if session_id.is_empty() {
            return Err(ChatError::InvalidArgument(
                "session id must not be empty".to_string(),
            ));
        }

        let legacy = self.legacy_dir(session_id).join(METADATA_FILE);
        if let Some(session) = read_json_opt::<ChatSession>(&legacy)? {
            return Ok(Some(session));
        }

        let projects_root = self.data_dir.join("projects");
        for entry in fs::read_dir(&projects_root)? {
            let project_dir = entry?.path();
            if !project_dir.is_dir() {
                continue;
            }
            let candidate = project_dir
                .join("chat_sessions")
                .join(session_id.as_str())
                .join(METADATA_FILE);
            if let Some(session) = read_json_opt::<ChatSession>(&candidate)? {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }

    /// List sessions of a project, most recently updated first.
    ///
    /// # Errors
    /// Fails with `missing_project_id` when the project id is empty, or on
    /// unreadable records.
    pub fn list_sessions(
        &self,
        project_id: &ProjectId,
        include_inactive: bool,
    ) -> ChatResult<Vec<ChatSession>> {
        if project_id.is_empty() {
            return Err(ChatError::MissingProjectId);
        }

        let root = self
            .data_dir
            .join("projects")
            .join(project_id.as_str())
            .join("chat_sessions");
        let mut sessions = Vec::new();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let candidate = entry?.path().join(METADATA_FILE);
            if let Some(session) = read_json_opt::<ChatSession>(&candidate)? {
                if include_inactive || session.active {
                    sessions.push(session);
                }
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    /// Replace a session's metadata record, bumping `updated_at`.
    ///
    /// The project binding is immutable; an update that moves the session
    /// is rejected.
    ///
    /// # Errors
    /// Fails with `session_not_found` for unknown sessions and
    /// `invalid_argument` for a project move.
    pub async fn update_session(&self, mut session: ChatSession) -> ChatResult<ChatSession> {
        let lock = self.lock_for(&session.id);
        let _guard = lock.lock().await;

        let dir = self.session_dir(&session.project_id, &session.id);
        let existing: ChatSession = read_json_opt(&dir.join(METADATA_FILE))?
            .ok_or_else(|| ChatError::SessionNotFound(session.id.clone()))?;
        if existing.project_id != session.project_id {
            return Err(ChatError::InvalidArgument(
                "a session cannot move between projects".to_string(),
            ));
        }

        // The cached count tracks the log, not the caller's copy.
        session.message_count = existing.message_count;
        session.created_at = existing.created_at;
        session.updated_at = Utc::now();
        write_json(&dir.join(METADATA_FILE), &session)?;
        Ok(session)
    }

    /// Delete a session and everything it owns: metadata, messages, and
    /// conversation context.
    ///
    /// # Errors
    /// Fails with `session_not_found` for unknown sessions and
    /// `invalid_argument` when messages remain and `force` is false.
    pub async fn delete_session(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        force: bool,
    ) -> ChatResult<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let dir = self.resolve_dir(project_id, session_id);
        let session: ChatSession = read_json_opt(&dir.join(METADATA_FILE))?
            .ok_or_else(|| ChatError::SessionNotFound(session_id.clone()))?;

        if session.message_count > 0 && !force {
            return Err(ChatError::InvalidArgument(format!(
                "session {session_id} has {} message(s); pass force to delete",
                session.message_count
            )));
        }

        remove_if_present(&dir.join(MESSAGES_FILE))?;
        remove_if_present(&dir.join(METADATA_FILE))?;
        fs::remove_dir(&dir)?;
        drop(_guard);
        self.locks.remove(session_id);

        self.contexts.remove(session_id).await?;
        info!("Deleted session {session_id}");
        Ok(())
    }

    /// Cascade-delete every session under a project.
    ///
    /// # Errors
    /// Returns the first session deletion error encountered.
    pub async fn delete_project_sessions(&self, project_id: &ProjectId) -> ChatResult<()> {
        for session in self.list_sessions(project_id, true)? {
            self.delete_session(&session.id, project_id, true).await?;
        }
        Ok(())
    }

    /// Append a message, incrementing the cached count atomically with it.
    ///
    /// # Errors
    /// Fails with `session_not_found` for unknown sessions, or on storage
    /// failures.
    pub async fn add_message(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        message: Message,
    ) -> ChatResult<Message> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.append_locked(session_id, project_id, message)
    }

    /// Append a user/assistant pair in one critical section, so no reader
    /// observes the first without the second.
    ///
    /// # Errors
    /// Fails with `session_not_found` for unknown sessions, or on storage
    /// failures.
    pub async fn add_exchange(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        user: Message,
        assistant: Message,
    ) -> ChatResult<(Message, Message)> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let user = self.append_locked(session_id, project_id, user)?;
        let assistant = self.append_locked(session_id, project_id, assistant)?;
        Ok((user, assistant))
    }

    /// Read a contiguous slice of the ordered log.
    ///
    /// # Errors
    /// Fails with `session_not_found` for unknown sessions, or on storage
    /// failures.
    pub async fn get_messages(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> ChatResult<Vec<Message>> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let dir = self.resolve_dir(project_id, session_id);
        if read_json_opt::<ChatSession>(&dir.join(METADATA_FILE))?.is_none() {
            return Err(ChatError::SessionNotFound(session_id.clone()));
        }

        let messages: Vec<Message> =
            read_json_opt(&dir.join(MESSAGES_FILE))?.unwrap_or_default();
        let offset = offset.unwrap_or(0).min(messages.len());
        let end = limit.map_or(messages.len(), |limit| {
            offset.saturating_add(limit).min(messages.len())
        });
        Ok(messages[offset..end].to_vec())
    }

    fn append_locked(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        message: Message,
    ) -> ChatResult<Message> {
        let dir = self.resolve_dir(project_id, session_id);
        let mut session: ChatSession = read_json_opt(&dir.join(METADATA_FILE))?
            .ok_or_else(|| ChatError::SessionNotFound(session_id.clone()))?;

        let mut messages: Vec<Message> =
            read_json_opt(&dir.join(MESSAGES_FILE))?.unwrap_or_default();
        messages.push(message.clone());
        write_json(&dir.join(MESSAGES_FILE), &messages)?;

        session.message_count = messages.len() as u64;
        session.updated_at = Utc::now();
        write_json(&dir.join(METADATA_FILE), &session)?;

        debug!(
            "Appended {} message to session {session_id} (count {})",
            message.role, session.message_count
        );
        Ok(message)
    }

    /// Nested path when the project id is present, legacy flat path when it
    /// is empty.
    fn resolve_dir(&self, project_id: &ProjectId, session_id: &SessionId) -> PathBuf {
        if project_id.is_empty() {
            self.legacy_dir(session_id)
        } else {
            self.session_dir(project_id, session_id)
        }
    }

    fn session_dir(&self, project_id: &ProjectId, session_id: &SessionId) -> PathBuf {
        self.data_dir
            .join("projects")
            .join(project_id.as_str())
            .join("chat_sessions")
            .join(session_id.as_str())
    }

    fn legacy_dir(&self, session_id: &SessionId) -> PathBuf {
        self.data_dir.join("chat_sessions").join(session_id.as_str())
    }

    fn project_exists(&self, project_id: &ProjectId) -> bool {
        self.data_dir
            .join("projects")
            .join(project_id.as_str())
            .join("project.json")
            .is_file()
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> ChatResult<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> ChatResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> ChatResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::projects::{Project, ProjectStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        projects: ProjectStore,
        contexts: Arc<ContextStore>,
        store: SessionStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let projects = ProjectStore::new(dir.path()).unwrap();
        let contexts = Arc::new(ContextStore::new(dir.path()).unwrap());
        let store = SessionStore::new(dir.path(), contexts.clone()).unwrap();
        Fixture {
            _dir: dir,
            projects,
            contexts,
            store,
        }
    }

    async fn project(fixture: &Fixture, name: &str) -> ProjectId {
        fixture
            .projects
            .create(Project::new(name))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_requires_an_existing_project() {
        let fixture = fixture().await;

        let orphan = ChatSession::new(ProjectId::from_string(""), "Hello");
        let err = fixture.store.create_session(orphan).await.unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::MissingProjectId);

        let ghost = ChatSession::new(ProjectId::from_string("ghost"), "Hello");
        let err = fixture.store.create_session(ghost).await.unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::ProjectNotFound);
    }

    #[tokio::test]
    async fn test_count_tracks_log_length() {
        let fixture = fixture().await;
        let project_id = project(&fixture, "P").await;
        let session = fixture
            .store
            .create_session(ChatSession::new(project_id.clone(), "Hello"))
            .await
            .unwrap();

        for i in 0..3 {
            fixture
                .store
                .add_message(
                    &session.id,
                    &project_id,
                    Message::new(ChatRole::User, format!("m{i}")),
                )
                .await
                .unwrap();
        }

        let loaded = fixture
            .store
            .get_session(&session.id, &project_id)
            .await
            .unwrap()
            .unwrap();
        let messages = fixture
            .store
            .get_messages(&session.id, &project_id, None, None)
            .await
            .unwrap();
        assert_eq!(loaded.message_count, 3);
        assert_eq!(messages.len() as u64, loaded.message_count);
        assert!(loaded.updated_at >= session.updated_at);
    }

    #[tokio::test]
    async fn test_messages_keep_append_order_with_pagination() {
        let fixture = fixture().await;
        let project_id = project(&fixture, "P").await;
        let session = fixture
            .store
            .create_session(ChatSession::new(project_id.clone(), "Hello"))
            .await
            .unwrap();

        for i in 0..5 {
            fixture
                .store
                .add_message(
                    &session.id,
                    &project_id,
                    Message::new(ChatRole::User, format!("m{i}")),
                )
                .await
                .unwrap();
        }

        let page = fixture
            .store
            .get_messages(&session.id, &project_id, Some(2), Some(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m1");
        assert_eq!(page[1].content, "m2");

        let all = fixture
            .store
            .get_messages(&session.id, &project_id, None, None)
            .await
            .unwrap();
        for pair in all.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_cross_project_reads_return_none() {
        let fixture = fixture().await;
        let project_a = project(&fixture, "A").await;
        let project_b = project(&fixture, "B").await;

        let session_a = fixture
            .store
            .create_session(ChatSession::new(project_a.clone(), "SA"))
            .await
            .unwrap();
        let session_b = fixture
            .store
            .create_session(ChatSession::new(project_b.clone(), "SB"))
            .await
            .unwrap();

        assert!(fixture
            .store
            .get_session(&session_a.id, &project_b)
            .await
            .unwrap()
            .is_none());

        let listed_a = fixture.store.list_sessions(&project_a, true).unwrap();
        assert_eq!(listed_a.len(), 1);
        assert_eq!(listed_a[0].id, session_a.id);
        let listed_b = fixture.store.list_sessions(&project_b, true).unwrap();
        assert_eq!(listed_b.len(), 1);
        assert_eq!(listed_b[0].id, session_b.id);
    }

    #[tokio::test]
    async fn test_list_orders_by_updated_at_desc_and_filters_inactive() {
        let fixture = fixture().await;
        let project_id = project(&fixture, "P").await;

        let older = fixture
            .store
            .create_session(ChatSession::new(project_id.clone(), "older"))
            .await
            .unwrap();
        let mut inactive = ChatSession::new(project_id.clone(), "inactive");
        inactive.active = false;
        fixture.store.create_session(inactive).await.unwrap();
        let newer = fixture
            .store
            .create_session(ChatSession::new(project_id.clone(), "newer"))
            .await
            .unwrap();

        // Appending bumps updated_at, moving `older` to the front.
        fixture
            .store
            .add_message(&older.id, &project_id, Message::new(ChatRole::User, "hi"))
            .await
            .unwrap();

        let active_only = fixture.store.list_sessions(&project_id, false).unwrap();
        assert_eq!(active_only.len(), 2);
        assert_eq!(active_only[0].id, older.id);
        assert_eq!(active_only[1].id, newer.id);

        let all = fixture.store.list_sessions(&project_id, true).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_rejects_non_empty_without_force() {
        let fixture = fixture().await;
        let project_id = project(&fixture, "P").await;
        let session = fixture
            .store
            .create_session(ChatSession::new(project_id.clone(), "Hello"))
            .await
            .unwrap();
        fixture
            .store
            .add_message(&session.id, &project_id, Message::new(ChatRole::User, "hi"))
            .await
            .unwrap();
        fixture.contexts.load_or_create(&session.id).await.unwrap();

        let err = fixture
            .store
            .delete_session(&session.id, &project_id, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::InvalidArgument);

        fixture
            .store
            .delete_session(&session.id, &project_id, true)
            .await
            .unwrap();
        assert!(fixture
            .store
            .get_session(&session.id, &project_id)
            .await
            .unwrap()
            .is_none());
        // The context cascades with the session.
        assert!(fixture.contexts.get(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_cannot_move_projects_and_preserves_count() {
        let fixture = fixture().await;
        let project_a = project(&fixture, "A").await;
        let project_b = project(&fixture, "B").await;

        let session = fixture
            .store
            .create_session(ChatSession::new(project_a.clone(), "Hello"))
            .await
            .unwrap();
        fixture
            .store
            .add_message(&session.id, &project_a, Message::new(ChatRole::User, "hi"))
            .await
            .unwrap();

        let mut renamed = session.clone();
        renamed.title = "Renamed".to_string();
        let updated = fixture.store.update_session(renamed).await.unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.message_count, 1);

        let mut moved = session.clone();
        moved.project_id = project_b.clone();
        let err = fixture.store.update_session(moved).await.unwrap_err();
        // The nested path under project B holds no such session.
        assert_eq!(err.kind(), crate::core::ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_metadata_round_trips_modulo_updated_at() {
        let fixture = fixture().await;
        let project_id = project(&fixture, "P").await;

        let session = ChatSession::new(project_id.clone(), "Hello")
            .with_description("greetings")
            .with_metadata(serde_json::json!({"pinned": true}));
        let created = fixture.store.create_session(session).await.unwrap();

        let loaded = fixture
            .store
            .get_session(&created.id, &project_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.title, created.title);
        assert_eq!(loaded.description, created.description);
        assert_eq!(loaded.metadata, created.metadata);
        assert_eq!(loaded.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_legacy_flat_layout_is_readable() {
        let fixture = fixture().await;

        // A record written before projects existed: flat path, no project.
        let legacy = ChatSession {
            project_id: ProjectId::from_string(""),
            ..ChatSession::new(ProjectId::from_string("x"), "Old chat")
        };
        let dir = fixture
            ._dir
            .path()
            .join("chat_sessions")
            .join(legacy.id.as_str());
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_string_pretty(&legacy).unwrap(),
        )
        .unwrap();
        fs::write(dir.join(MESSAGES_FILE), "[]").unwrap();

        let found = fixture.store.find_session(&legacy.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Old chat");
        assert!(found.project_id.is_empty());

        // Appends resolve to the flat path through the empty project id.
        fixture
            .store
            .add_message(
                &legacy.id,
                &found.project_id,
                Message::new(ChatRole::User, "still works"),
            )
            .await
            .unwrap();
        let messages = fixture
            .store
            .get_messages(&legacy.id, &found.project_id, None, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_find_session_scans_projects() {
        let fixture = fixture().await;
        let project_id = project(&fixture, "P").await;
        let session = fixture
            .store
            .create_session(ChatSession::new(project_id.clone(), "Hello"))
            .await
            .unwrap();

        let found = fixture.store.find_session(&session.id).await.unwrap().unwrap();
        assert_eq!(found.project_id, project_id);
        assert!(fixture
            .store
            .find_session(&SessionId::from_string("ghost"))
            .await
            .unwrap()
            .is_none());
    }
}
