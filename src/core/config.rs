//! Configuration for the chat core.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{ChatError, ChatResult};

/// Model id used when neither the request, the context, nor the
/// configuration names one.
pub const FALLBACK_MODEL: &str = "gpt-3.5-turbo";

/// Top-level configuration for the chat core.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Storage paths.
    pub storage: StorageConfig,
    /// Conversation defaults.
    pub conversation: ConversationConfig,
    /// Dispatch defaults.
    pub dispatch: DispatchConfig,
}

impl CoreConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ChatError::InvalidArgument(
                "storage.data_dir must not be empty".to_string(),
            ));
        }

        if self.storage.credentials_file.as_os_str().is_empty() {
            return Err(ChatError::InvalidArgument(
                "storage.credentials_file must not be empty".to_string(),
            ));
        }

        if self.conversation.max_history_messages == 0 {
            return Err(ChatError::InvalidArgument(
                "conversation.max_history_messages must be > 0".to_string(),
            ));
        }

        if self.dispatch.default_timeout_seconds == 0 {
            return Err(ChatError::InvalidArgument(
                "dispatch.default_timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.dispatch.default_retry_attempts == 0 {
            return Err(ChatError::InvalidArgument(
                "dispatch.default_retry_attempts must be > 0".to_string(),
            ));
        }

        if self.dispatch.default_max_output_tokens == 0 {
            return Err(ChatError::InvalidArgument(
                "dispatch.default_max_output_tokens must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Storage paths for the file-backed stores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for projects, sessions, providers, and contexts.
    pub data_dir: PathBuf,
    /// Path of the `KEY=value` credential file.
    ///
    /// Captured as an absolute path when the credential store is built, so
    /// later working-directory changes cannot repoint it.
    pub credentials_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            credentials_file: PathBuf::from("data/credentials.env"),
        }
    }
}

/// Conversation defaults applied by the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Upper bound on history messages included in an upstream request.
    pub max_history_messages: usize,
    /// Process-wide default model, consulted after per-request and
    /// per-context preferences.
    pub default_model: Option<String>,
    /// Default system prompt when neither the request nor the context
    /// overrides it.
    pub default_system_prompt: Option<String>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history_messages: 50,
            default_model: None,
            default_system_prompt: None,
        }
    }
}

/// Dispatch defaults applied when a provider record leaves them unset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-request timeout when the provider does not configure one.
    pub default_timeout_seconds: u64,
    /// Retry attempts (initial attempt included) when the provider does not
    /// configure them.
    pub default_retry_attempts: u32,
    /// Completion-size estimate for admission when neither the request nor
    /// the model catalog supplies one.
    pub default_max_output_tokens: u32,
    /// Connection timeout for the shared HTTP client.
    pub connect_timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            default_retry_attempts: 3,
            default_max_output_tokens: 1024,
            connect_timeout_seconds: 10,
        }
    }
}
