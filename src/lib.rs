//! Server-side core of a multi-tenant AI chat assistant.
//!
//! Projects own chat sessions, sessions own append-only message logs. A
//! user turn sent through a session is dispatched to a configured upstream
//! provider (openai-compatible or anthropic-compatible), the reply is
//! persisted as an assistant message, and per-session and per-provider
//! accounting (tokens, cost, latency, health) is kept current.
//!
//! The crate is transport-agnostic: serving HTTP, authentication, and
//! front-end concerns belong to embedding applications. Construct a
//! [`services::Services`] from a [`core::CoreConfig`] and drive it through
//! typed operations.

#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]

/// Model catalog: limits, prices, capabilities.
pub mod catalog;
/// Shared core types: ids, errors, configuration.
pub mod core;
/// Out-of-band provider secret storage.
pub mod credentials;
/// Provider dispatch: uniform contract, adapters, engine.
pub mod dispatch;
/// Per-provider admission control.
pub mod limiter;
/// Conversation orchestration.
pub mod orchestrator;
/// Provider records and registry.
pub mod providers;
/// Component wiring and startup helpers.
pub mod services;
/// Per-provider usage counters and health snapshots.
pub mod stats;
/// File-backed persistence of projects, sessions, and contexts.
pub mod store;

pub use catalog::{AIModel, ModelCatalog};
pub use self::core::{
    ChatError, ChatResult, CoreConfig, ErrorKind, MessageId, ProjectId, ProviderId, SessionId,
};
pub use credentials::CredentialStore;
pub use dispatch::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, DispatchEngine, FinishReason, TokenUsage,
};
pub use limiter::{Admission, RateLimiter};
pub use orchestrator::{Orchestrator, SendMessageOutcome, SendMessageRequest};
pub use providers::{AIProvider, ProviderFamily, ProviderRegistry};
pub use services::{init_tracing, Services};
pub use stats::{HealthStatus, ProviderHealth, UsageStats, UsageTracker};
pub use store::{
    ChatSession, ContextStore, ConversationContext, Message, MessageMetadata, Project,
    ProjectStore, SessionStore,
};
