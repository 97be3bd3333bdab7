//! Construction and wiring of the chat core.
//!
//! Every component is built exactly once here and handed around by `Arc`.
//! There are no ambient globals; tests construct a [`Services`] over a
//! scratch directory and tear it down by dropping it. Cross-component
//! cascades (provider deletion, project deletion) live here because no
//! single store owns both sides.

use std::sync::Arc;

use tracing::info;

use crate::catalog::ModelCatalog;
use crate::core::config::CoreConfig;
use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::{ProjectId, ProviderId};
use crate::credentials::CredentialStore;
use crate::dispatch::engine::DispatchEngine;
use crate::orchestrator::Orchestrator;
use crate::providers::registry::ProviderRegistry;
use crate::stats::UsageTracker;
use crate::store::context::ContextStore;
use crate::store::projects::ProjectStore;
use crate::store::sessions::SessionStore;

/// The assembled chat core.
pub struct Services {
    config: CoreConfig,
    /// Model catalog.
    pub catalog: Arc<ModelCatalog>,
    /// Credential store.
    pub credentials: Arc<CredentialStore>,
    /// Provider registry.
    pub registry: Arc<ProviderRegistry>,
    /// Project store.
    pub projects: Arc<ProjectStore>,
    /// Conversation context store.
    pub contexts: Arc<ContextStore>,
    /// Session/message store.
    pub sessions: Arc<SessionStore>,
    /// Usage and health tracker.
    pub tracker: Arc<UsageTracker>,
    /// Dispatch engine.
    pub engine: Arc<DispatchEngine>,
    /// Conversation orchestrator.
    pub orchestrator: Arc<Orchestrator>,
}

impl Services {
    /// Build every component from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or any store cannot
    /// open its backing directory.
    pub fn new(config: CoreConfig) -> ChatResult<Self> {
        config.validate()?;
        let data_dir = &config.storage.data_dir;

        let catalog = Arc::new(ModelCatalog::builtin());
        let credentials = Arc::new(CredentialStore::new(&config.storage.credentials_file)?);
        let registry = Arc::new(ProviderRegistry::new(data_dir, credentials.clone())?);
        let projects = Arc::new(ProjectStore::new(data_dir)?);
        let contexts = Arc::new(ContextStore::new(data_dir)?);
        let sessions = Arc::new(SessionStore::new(data_dir, contexts.clone())?);
        let tracker = Arc::new(UsageTracker::new());
        let engine = Arc::new(DispatchEngine::new(
            registry.clone(),
            credentials.clone(),
            catalog.clone(),
            tracker.clone(),
            config.dispatch.clone(),
        )?);
        let orchestrator = Arc::new(Orchestrator::new(
            sessions.clone(),
            contexts.clone(),
            registry.clone(),
            catalog.clone(),
            engine.clone(),
            config.conversation.clone(),
        ));

        info!("Chat core assembled over {}", data_dir.display());
        Ok(Self {
            config,
            catalog,
            credentials,
            registry,
            projects,
            contexts,
            sessions,
            tracker,
            engine,
            orchestrator,
        })
    }

    /// The configuration the core was built from.
    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Delete a provider and everything tied to its id: registry record,
    /// credential entry, usage/health snapshots, limiter state.
    ///
    /// # Errors
    /// Fails with `provider_not_found` for unknown ids.
    pub async fn delete_provider(&self, provider_id: &ProviderId) -> ChatResult<()> {
        self.registry.delete(provider_id).await?;
        self.tracker.remove(provider_id);
        self.engine.forget_provider(provider_id);
        Ok(())
    }

    /// Delete a project. With `force`, every session under it cascades
    /// first (messages and contexts included); without it, a project that
    /// still has sessions is rejected.
    ///
    /// # Errors
    /// Fails with `project_not_found` for unknown ids and
    /// `invalid_argument` when sessions remain and `force` is false.
    pub async fn delete_project(&self, project_id: &ProjectId, force: bool) -> ChatResult<()> {
        if self.projects.get(project_id)?.is_none() {
            return Err(ChatError::ProjectNotFound(project_id.clone()));
        }

        let sessions = self.sessions.list_sessions(project_id, true)?;
        if !sessions.is_empty() {
            if !force {
                return Err(ChatError::InvalidArgument(format!(
                    "project {project_id} has {} session(s); pass force to delete",
                    sessions.len()
                )));
            }
            self.sessions.delete_project_sessions(project_id).await?;
        }

        self.projects.delete(project_id).await
    }
}

/// Install a process-wide tracing subscriber reading `RUST_LOG`, with INFO
/// as the default level. Call once at startup; embedding applications that
/// install their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}
