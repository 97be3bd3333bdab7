//! Core types shared by every component: ids, errors, configuration.

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{ConversationConfig, CoreConfig, DispatchConfig, StorageConfig, FALLBACK_MODEL};
pub use errors::{ChatError, ChatResult, ErrorKind};
pub use ids::{MessageId, ProjectId, ProviderId, SessionId};
