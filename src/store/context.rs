//! Per-session conversation context: running totals and preferences,
//! orthogonal to the message log.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::errors::ChatResult;
use crate::core::ids::{ProviderId, SessionId};

/// Running totals and preferences for one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Owning session.
    pub session_id: SessionId,
    /// Messages exchanged through the orchestrator.
    pub message_count: u64,
    /// Timestamp of the most recent exchange.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Prompt tokens accumulated; monotonically non-decreasing.
    pub total_tokens_in: u64,
    /// Completion tokens accumulated; monotonically non-decreasing.
    pub total_tokens_out: u64,
    /// Cost accumulated in USD; monotonically non-decreasing.
    pub total_cost: f64,
    /// Provider preferred for this session.
    pub preferred_provider_id: Option<ProviderId>,
    /// Model preferred for this session.
    pub preferred_model: Option<String>,
    /// System prompt override for this session.
    pub system_prompt: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Fresh context for a session.
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            message_count: 0,
            last_message_at: None,
            total_tokens_in: 0,
            total_tokens_out: 0,
            total_cost: 0.0,
            preferred_provider_id: None,
            preferred_model: None,
            system_prompt: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// File-backed store of conversation contexts, one JSON record per session
/// under `<data>/conversations/`.
pub struct ContextStore {
    dir: PathBuf,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl ContextStore {
    /// Open the store under the data directory.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(data_dir: &Path) -> ChatResult<Self> {
        let dir = data_dir.join("conversations");
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    /// Load the context for a session, creating a fresh one on first use.
    ///
    /// # Errors
    /// Returns an error if the record exists but cannot be read.
    pub async fn load_or_create(&self, session_id: &SessionId) -> ChatResult<ConversationContext> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        match self.read(session_id)? {
            Some(context) => Ok(context),
            None => {
                let context = ConversationContext::new(session_id.clone());
                self.write(&context)?;
                Ok(context)
            }
        }
    }

    /// Load the context for a session, if one exists.
    ///
    /// # Errors
    /// Returns an error if the record exists but cannot be read.
    pub async fn get(&self, session_id: &SessionId) -> ChatResult<Option<ConversationContext>> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        self.read(session_id)
    }

    /// Fold one completed exchange into the context counters.
    ///
    /// # Errors
    /// Returns an error if the record cannot be read or written.
    pub async fn record_exchange(
        &self,
        session_id: &SessionId,
        tokens_in: u64,
        tokens_out: u64,
        cost: f64,
    ) -> ChatResult<ConversationContext> {
        self.update(session_id, |context| {
            context.message_count += 2;
            context.last_message_at = Some(Utc::now());
            context.total_tokens_in += tokens_in;
            context.total_tokens_out += tokens_out;
            context.total_cost += cost;
        })
        .await
    }

    /// Set or clear the preferred provider.
    ///
    /// # Errors
    /// Returns an error if the record cannot be read or written.
    pub async fn set_preferred_provider(
        &self,
        session_id: &SessionId,
        provider_id: Option<ProviderId>,
    ) -> ChatResult<ConversationContext> {
        self.update(session_id, |context| {
            context.preferred_provider_id = provider_id;
        })
        .await
    }

    /// Set or clear the preferred model.
    ///
    /// # Errors
    /// Returns an error if the record cannot be read or written.
    pub async fn set_preferred_model(
        &self,
        session_id: &SessionId,
        model: Option<String>,
    ) -> ChatResult<ConversationContext> {
        self.update(session_id, |context| {
            context.preferred_model = model;
        })
        .await
    }

    /// Set or clear the per-session system prompt override.
    ///
    /// # Errors
    /// Returns an error if the record cannot be read or written.
    pub async fn set_system_prompt(
        &self,
        session_id: &SessionId,
        system_prompt: Option<String>,
    ) -> ChatResult<ConversationContext> {
        self.update(session_id, |context| {
            context.system_prompt = system_prompt;
        })
        .await
    }

    /// Delete the context record for a session, if present.
    ///
    /// # Errors
    /// Returns an error if the record cannot be removed.
    pub async fn remove(&self, session_id: &SessionId) -> ChatResult<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        match fs::remove_file(self.record_path(session_id)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        drop(_guard);
        self.locks.remove(session_id);
        Ok(())
    }

    async fn update(
        &self,
        session_id: &SessionId,
        apply: impl FnOnce(&mut ConversationContext),
    ) -> ChatResult<ConversationContext> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut context = self
            .read(session_id)?
            .unwrap_or_else(|| ConversationContext::new(session_id.clone()));
        apply(&mut context);
        context.updated_at = Utc::now();
        self.write(&context)?;
        Ok(context)
    }

    fn record_path(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn read(&self, session_id: &SessionId) -> ChatResult<Option<ConversationContext>> {
        let raw = match fs::read_to_string(self.record_path(session_id)) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write(&self, context: &ConversationContext) -> ChatResult<()> {
        let path = self.record_path(&context.session_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(context)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
