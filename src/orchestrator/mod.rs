//! Conversation orchestration: turning a session and a user turn into an
//! upstream request, and persisting the completed exchange.
//!
//! The orchestrator owns conversation state; dispatch stays request-scoped
//! on the other side of the engine boundary. A dispatch failure persists
//! nothing — a request that never reached the model must not appear in
//! history.

use std::sync::Arc;

use tracing::{debug, info};

use crate::catalog::ModelCatalog;
use crate::core::config::{ConversationConfig, FALLBACK_MODEL};
use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::{ProviderId, SessionId};
use crate::dispatch::engine::DispatchEngine;
use crate::dispatch::request::{ChatMessage, ChatRequest, ChatResponse, ChatRole};
use crate::providers::records::AIProvider;
use crate::providers::registry::ProviderRegistry;
use crate::store::context::{ContextStore, ConversationContext};
use crate::store::sessions::{ChatSession, Message, MessageMetadata, SessionStore};

/// A send-message request against a session.
#[derive(Clone, Debug)]
pub struct SendMessageRequest {
    /// Target session.
    pub session_id: SessionId,
    /// The user's turn.
    pub message: String,
    /// Model override for this call.
    pub model: Option<String>,
    /// Provider override for this call.
    pub provider_id: Option<ProviderId>,
    /// Completion budget override.
    pub max_tokens: Option<u32>,
    /// Temperature override.
    pub temperature: Option<f64>,
    /// System prompt override.
    pub system_prompt: Option<String>,
    /// Whether to include session history in the upstream request.
    pub include_history: bool,
    /// Per-call cap on history messages; the configured cap still applies.
    pub max_history_messages: Option<usize>,
}

impl SendMessageRequest {
    /// Create a request with history enabled and no overrides.
    #[must_use]
    pub fn new(session_id: SessionId, message: impl Into<String>) -> Self {
        Self {
            session_id,
            message: message.into(),
            model: None,
            provider_id: None,
            max_tokens: None,
            temperature: None,
            system_prompt: None,
            include_history: true,
            max_history_messages: None,
        }
    }

    /// Set the model override.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the provider override.
    #[must_use]
    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    /// Set the completion budget override.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature override.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the system prompt override.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Enable or disable history inclusion.
    #[must_use]
    pub const fn with_history(mut self, include_history: bool) -> Self {
        self.include_history = include_history;
        self
    }

    /// Cap the number of history messages for this call.
    #[must_use]
    pub const fn with_max_history_messages(mut self, cap: usize) -> Self {
        self.max_history_messages = Some(cap);
        self
    }
}

/// A completed exchange.
#[derive(Clone, Debug)]
pub struct SendMessageOutcome {
    /// Session the exchange belongs to.
    pub session_id: SessionId,
    /// Provider that served the exchange.
    pub provider_id: ProviderId,
    /// Model the request named.
    pub model: String,
    /// The persisted user message.
    pub user_message: Message,
    /// The persisted assistant message.
    pub assistant_message: Message,
    /// The raw uniform response.
    pub response: ChatResponse,
    /// Cost of the exchange per the model price table.
    pub cost: f64,
    /// Context counters after the exchange.
    pub context: ConversationContext,
}

/// The conversation orchestrator.
pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    contexts: Arc<ContextStore>,
    registry: Arc<ProviderRegistry>,
    catalog: Arc<ModelCatalog>,
    engine: Arc<DispatchEngine>,
    config: ConversationConfig,
}

impl Orchestrator {
    /// Build an orchestrator over shared components.
    #[must_use]
    pub fn new(
        sessions: Arc<SessionStore>,
        contexts: Arc<ContextStore>,
        registry: Arc<ProviderRegistry>,
        catalog: Arc<ModelCatalog>,
        engine: Arc<DispatchEngine>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            sessions,
            contexts,
            registry,
            catalog,
            engine,
            config,
        }
    }

    /// Send a user message through a session and persist the exchange.
    ///
    /// # Errors
    /// Validation and resolution failures surface before any dispatch;
    /// dispatch failures come back with session and provider attached and
    /// leave the message log untouched.
    pub async fn send_message(&self, request: SendMessageRequest) -> ChatResult<SendMessageOutcome> {
        if request.message.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "message must not be empty".to_string(),
            ));
        }

        let session = self
            .sessions
            .find_session(&request.session_id)
            .await?
            .ok_or_else(|| ChatError::SessionNotFound(request.session_id.clone()))?;

        let context = self.contexts.load_or_create(&session.id).await?;

        let provider = self.select_provider(&request, &context)?;
        let model = request
            .model
            .clone()
            .or_else(|| context.preferred_model.clone())
            .or_else(|| self.config.default_model.clone())
            .unwrap_or_else(|| FALLBACK_MODEL.to_string());

        let messages = self.build_messages(&request, &session, &context).await?;
        let mut chat_request = ChatRequest::new(model.clone()).with_messages(messages);
        if let Some(max_tokens) = request.max_tokens {
            chat_request.max_output_tokens = Some(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            chat_request.temperature = temperature;
        }

        let response = match self.engine.send(&provider.id, &chat_request).await {
            Ok(response) => response,
            Err(err) => {
                return Err(ChatError::Dispatch {
                    session_id: session.id,
                    provider_id: provider.id,
                    source: Box::new(err),
                });
            }
        };

        let cost = self.catalog.cost(&model, &response.usage);
        let user_message = Message::new(ChatRole::User, &request.message);
        let assistant_message =
            Message::new(ChatRole::Assistant, &response.content).with_metadata(MessageMetadata {
                model: Some(response.model.clone()),
                provider_id: Some(provider.id.clone()),
                usage: Some(response.usage),
                finish_reason: Some(response.finish_reason),
                extra: serde_json::Value::Null,
            });

        let (user_message, assistant_message) = self
            .sessions
            .add_exchange(&session.id, &session.project_id, user_message, assistant_message)
            .await?;
        let context = self
            .contexts
            .record_exchange(
                &session.id,
                u64::from(response.usage.prompt_tokens),
                u64::from(response.usage.completion_tokens),
                cost,
            )
            .await?;

        info!(
            "Exchange completed for session {} via {} ({} tokens in, {} out)",
            session.id, provider.id, response.usage.prompt_tokens, response.usage.completion_tokens
        );

        Ok(SendMessageOutcome {
            session_id: session.id,
            provider_id: provider.id,
            model,
            user_message,
            assistant_message,
            response,
            cost,
            context,
        })
    }

    /// Deterministic provider selection: explicit request, then context
    /// preference, then the first active provider in registration order.
    fn select_provider(
        &self,
        request: &SendMessageRequest,
        context: &ConversationContext,
    ) -> ChatResult<AIProvider> {
        if let Some(provider_id) = &request.provider_id {
            return self
                .registry
                .get(provider_id)
                .filter(|p| p.active)
                .ok_or_else(|| ChatError::ProviderNotFound(provider_id.clone()));
        }

        if let Some(preferred) = &context.preferred_provider_id {
            if let Some(provider) = self.registry.get(preferred).filter(|p| p.active) {
                return Ok(provider);
            }
            debug!(
                "Preferred provider {preferred} for session {} is gone or inactive",
                context.session_id
            );
        }

        self.registry
            .default_provider()
            .ok_or_else(|| ChatError::ProviderNotFound(ProviderId::from_string("default")))
    }

    /// Build the upstream message list: optional system prompt, capped
    /// history (stored system messages excluded), then the new user turn.
    async fn build_messages(
        &self,
        request: &SendMessageRequest,
        session: &ChatSession,
        context: &ConversationContext,
    ) -> ChatResult<Vec<ChatMessage>> {
        let mut messages = Vec::new();

        let system_prompt = request
            .system_prompt
            .clone()
            .or_else(|| context.system_prompt.clone())
            .or_else(|| self.config.default_system_prompt.clone());
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            messages.push(ChatMessage::system(prompt));
        }

        if request.include_history {
            let cap = request
                .max_history_messages
                .unwrap_or(self.config.max_history_messages)
                .min(self.config.max_history_messages);
            if cap > 0 && session.message_count > 0 {
                let stored = self
                    .sessions
                    .get_messages(&session.id, &session.project_id, None, None)
                    .await?;
                let history: Vec<&Message> = stored
                    .iter()
                    .filter(|m| m.role != ChatRole::System)
                    .collect();
                let start = history.len().saturating_sub(cap);
                for message in &history[start..] {
                    messages.push(ChatMessage {
                        role: message.role,
                        content: message.content.clone(),
                    });
                }
            }
        }

        messages.push(ChatMessage::user(request.message.clone()));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::sync::Mutex as AsyncMutex;

    use crate::core::config::DispatchConfig;
    use crate::credentials::CredentialStore;
    use crate::dispatch::request::FinishReason;
    use crate::providers::records::ProviderFamily;
    use crate::stats::{HealthStatus, UsageTracker};
    use crate::store::projects::{Project, ProjectStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        projects: ProjectStore,
        sessions: Arc<SessionStore>,
        contexts: Arc<ContextStore>,
        registry: Arc<ProviderRegistry>,
        tracker: Arc<UsageTracker>,
        orchestrator: Orchestrator,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let credentials =
            Arc::new(CredentialStore::new(dir.path().join("credentials.env")).unwrap());
        let projects = ProjectStore::new(dir.path()).unwrap();
        let contexts = Arc::new(ContextStore::new(dir.path()).unwrap());
        let sessions = Arc::new(SessionStore::new(dir.path(), contexts.clone()).unwrap());
        let registry = Arc::new(ProviderRegistry::new(dir.path(), credentials.clone()).unwrap());
        let catalog = Arc::new(ModelCatalog::builtin());
        let tracker = Arc::new(UsageTracker::new());
        let engine = Arc::new(
            DispatchEngine::new(
                registry.clone(),
                credentials,
                catalog.clone(),
                tracker.clone(),
                DispatchConfig::default(),
            )
            .unwrap(),
        );
        let orchestrator = Orchestrator::new(
            sessions.clone(),
            contexts.clone(),
            registry.clone(),
            catalog,
            engine,
            ConversationConfig::default(),
        );
        Fixture {
            _dir: dir,
            projects,
            sessions,
            contexts,
            registry,
            tracker,
            orchestrator,
        }
    }

    async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn pong_body() -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-4",
            "choices": [
                {"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        })
    }

    /// Upstream stub that records each request body it receives.
    fn capturing_router(captured: Arc<AsyncMutex<Vec<serde_json::Value>>>) -> Router {
        Router::new().route(
            "/v1/chat/completions",
            post(move |Json(body): Json<serde_json::Value>| {
                let captured = captured.clone();
                async move {
                    captured.lock().await.push(body);
                    Json(pong_body())
                }
            }),
        )
    }

    async fn register_provider(fixture: &Fixture, base_url: &str) -> ProviderId {
        let provider = AIProvider::new("stub", ProviderFamily::OpenaiCompatible)
            .with_base_url(base_url)
            .with_timeout_seconds(5);
        let id = provider.id.clone();
        fixture
            .registry
            .create(provider, Some("sk-test"))
            .await
            .unwrap();
        id
    }

    async fn create_session(fixture: &Fixture, title: &str) -> ChatSession {
        let project = fixture.projects.create(Project::new("P")).await.unwrap();
        fixture
            .sessions
            .create_session(ChatSession::new(project.id, title))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_persists_both_sides_and_accounts() {
        let fixture = fixture().await;
        let base = spawn_upstream(Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(pong_body()) }),
        ))
        .await;
        let provider_id = register_provider(&fixture, &base).await;
        let session = create_session(&fixture, "Hello").await;

        let outcome = fixture
            .orchestrator
            .send_message(
                SendMessageRequest::new(session.id.clone(), "ping").with_model("gpt-4"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.response.content, "pong");
        assert_eq!(outcome.provider_id, provider_id);

        let messages = fixture
            .sessions
            .get_messages(&session.id, &session.project_id, None, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, ChatRole::User);
        assert_eq!(messages[0].content, "ping");
        assert_eq!(messages[1].role, ChatRole::Assistant);
        assert_eq!(messages[1].content, "pong");
        assert_eq!(
            messages[1].metadata.finish_reason,
            Some(FinishReason::Stop)
        );
        assert_eq!(
            messages[1].metadata.provider_id.as_ref(),
            Some(&provider_id)
        );

        let context = fixture.contexts.get(&session.id).await.unwrap().unwrap();
        assert_eq!(context.total_tokens_in, 3);
        assert_eq!(context.total_tokens_out, 1);
        assert_eq!(context.message_count, 2);

        let usage = fixture.tracker.usage(&provider_id);
        assert_eq!(usage.total_tokens_in, 3);
        assert_eq!(usage.total_tokens_out, 1);
        assert_eq!(fixture.tracker.health(&provider_id).status, HealthStatus::Healthy);

        let stored = fixture
            .sessions
            .get_session(&session.id, &session.project_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.message_count, 2);
    }

    #[tokio::test]
    async fn test_failed_dispatch_persists_nothing() {
        let fixture = fixture().await;
        let base = spawn_upstream(Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [("retry-after", "0")],
                    Json(serde_json::json!({"error": {"message": "slow down"}})),
                )
            }),
        ))
        .await;
        let provider_id = register_provider(&fixture, &base).await;
        let session = create_session(&fixture, "Hello").await;

        let err = fixture
            .orchestrator
            .send_message(SendMessageRequest::new(session.id.clone(), "ping"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::RateLimitExceeded);
        match &err {
            ChatError::Dispatch {
                session_id,
                provider_id: attached,
                ..
            } => {
                assert_eq!(session_id, &session.id);
                assert_eq!(attached, &provider_id);
            }
            other => panic!("expected dispatch wrapper, got {other}"),
        }

        let messages = fixture
            .sessions
            .get_messages(&session.id, &session.project_id, None, None)
            .await
            .unwrap();
        assert!(messages.is_empty());
        assert_eq!(
            fixture.tracker.health(&provider_id).status,
            HealthStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_a_typed_error() {
        let fixture = fixture().await;
        let err = fixture
            .orchestrator
            .send_message(SendMessageRequest::new(
                SessionId::from_string("ghost"),
                "ping",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_history_is_capped_and_excludes_system_messages() {
        let fixture = fixture().await;
        let captured = Arc::new(AsyncMutex::new(Vec::new()));
        let base = spawn_upstream(capturing_router(captured.clone())).await;
        register_provider(&fixture, &base).await;
        let session = create_session(&fixture, "Hello").await;

        for i in 0..4 {
            fixture
                .sessions
                .add_message(
                    &session.id,
                    &session.project_id,
                    Message::new(ChatRole::User, format!("u{i}")),
                )
                .await
                .unwrap();
        }
        fixture
            .sessions
            .add_message(
                &session.id,
                &session.project_id,
                Message::new(ChatRole::System, "stored instructions"),
            )
            .await
            .unwrap();

        fixture
            .orchestrator
            .send_message(
                SendMessageRequest::new(session.id.clone(), "ping")
                    .with_system_prompt("be brief")
                    .with_max_history_messages(2),
            )
            .await
            .unwrap();

        let bodies = captured.lock().await;
        let messages = bodies[0]["messages"].as_array().unwrap();
        // system prompt + 2 most recent non-system history entries + turn
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "be brief");
        assert_eq!(messages[1]["content"], "u2");
        assert_eq!(messages[2]["content"], "u3");
        assert_eq!(messages[3]["role"], "user");
        assert_eq!(messages[3]["content"], "ping");
    }

    #[tokio::test]
    async fn test_zero_history_cap_sends_only_prompt_and_turn() {
        let fixture = fixture().await;
        let captured = Arc::new(AsyncMutex::new(Vec::new()));
        let base = spawn_upstream(capturing_router(captured.clone())).await;
        register_provider(&fixture, &base).await;
        let session = create_session(&fixture, "Hello").await;

        fixture
            .sessions
            .add_message(
                &session.id,
                &session.project_id,
                Message::new(ChatRole::User, "earlier"),
            )
            .await
            .unwrap();

        fixture
            .orchestrator
            .send_message(
                SendMessageRequest::new(session.id.clone(), "ping")
                    .with_system_prompt("be brief")
                    .with_max_history_messages(0),
            )
            .await
            .unwrap();

        let bodies = captured.lock().await;
        let messages = bodies[0]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "ping");
    }

    #[tokio::test]
    async fn test_model_selection_prefers_request_then_context_then_fallback() {
        let fixture = fixture().await;
        let captured = Arc::new(AsyncMutex::new(Vec::new()));
        let base = spawn_upstream(capturing_router(captured.clone())).await;
        register_provider(&fixture, &base).await;
        let session = create_session(&fixture, "Hello").await;

        fixture
            .orchestrator
            .send_message(SendMessageRequest::new(session.id.clone(), "one"))
            .await
            .unwrap();

        fixture
            .contexts
            .set_preferred_model(&session.id, Some("gpt-4o".to_string()))
            .await
            .unwrap();
        fixture
            .orchestrator
            .send_message(SendMessageRequest::new(session.id.clone(), "two"))
            .await
            .unwrap();

        fixture
            .orchestrator
            .send_message(
                SendMessageRequest::new(session.id.clone(), "three").with_model("gpt-4"),
            )
            .await
            .unwrap();

        let bodies = captured.lock().await;
        assert_eq!(bodies[0]["model"], FALLBACK_MODEL);
        assert_eq!(bodies[1]["model"], "gpt-4o");
        assert_eq!(bodies[2]["model"], "gpt-4");
    }

    #[tokio::test]
    async fn test_inactive_explicit_provider_is_rejected() {
        let fixture = fixture().await;
        let provider =
            AIProvider::new("off", ProviderFamily::OpenaiCompatible).with_active(false);
        let provider_id = provider.id.clone();
        fixture
            .registry
            .create(provider, Some("sk-test"))
            .await
            .unwrap();
        let session = create_session(&fixture, "Hello").await;

        let err = fixture
            .orchestrator
            .send_message(
                SendMessageRequest::new(session.id.clone(), "ping").with_provider(provider_id),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::ProviderNotFound);
    }

    #[tokio::test]
    async fn test_no_active_provider_is_a_typed_error() {
        let fixture = fixture().await;
        let session = create_session(&fixture, "Hello").await;

        let err = fixture
            .orchestrator
            .send_message(SendMessageRequest::new(session.id.clone(), "ping"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::ProviderNotFound);
    }

    #[tokio::test]
    async fn test_invalid_temperature_short_circuits_without_persisting() {
        let fixture = fixture().await;
        let base = spawn_upstream(Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(pong_body()) }),
        ))
        .await;
        register_provider(&fixture, &base).await;
        let session = create_session(&fixture, "Hello").await;

        let err = fixture
            .orchestrator
            .send_message(
                SendMessageRequest::new(session.id.clone(), "ping").with_temperature(3.0),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::InvalidArgument);

        let messages = fixture
            .sessions
            .get_messages(&session.id, &session.project_id, None, None)
            .await
            .unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_content_filtered_replies_are_persisted() {
        let fixture = fixture().await;
        let base = spawn_upstream(Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "id": "chatcmpl-2",
                    "model": "gpt-4",
                    "choices": [{
                        "message": {"role": "assistant", "content": "[filtered]"},
                        "finish_reason": "content_filter"
                    }],
                    "usage": {"prompt_tokens": 3, "completion_tokens": 1}
                }))
            }),
        ))
        .await;
        register_provider(&fixture, &base).await;
        let session = create_session(&fixture, "Hello").await;

        let outcome = fixture
            .orchestrator
            .send_message(SendMessageRequest::new(session.id.clone(), "ping"))
            .await
            .unwrap();
        assert_eq!(outcome.response.finish_reason, FinishReason::ContentFilter);

        let messages = fixture
            .sessions
            .get_messages(&session.id, &session.project_id, None, None)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[1].metadata.finish_reason,
            Some(FinishReason::ContentFilter)
        );
    }
}
