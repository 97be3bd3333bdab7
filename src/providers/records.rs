//! Provider configuration records.
//!
//! The API key is deliberately absent from [`AIProvider`]: secrets live in
//! the credential file and never share a serialization path with these
//! records.

use core::fmt;
use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::ChatError;
use crate::core::ids::ProviderId;

/// A set of upstream APIs sharing a wire contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    /// Chat-completions style APIs (`POST /v1/chat/completions`).
    OpenaiCompatible,
    /// Messages style APIs (`POST /v1/messages`).
    AnthropicCompatible,
    /// Anything without a shipped adapter.
    Other,
}

impl ProviderFamily {
    /// Default base URL for the family, used when the record carries no
    /// override.
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenaiCompatible => "https://api.openai.com",
            Self::AnthropicCompatible => "https://api.anthropic.com",
            Self::Other => "",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenaiCompatible => write!(f, "openai-compatible"),
            Self::AnthropicCompatible => write!(f, "anthropic-compatible"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl FromStr for ProviderFamily {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai-compatible" => Ok(Self::OpenaiCompatible),
            "anthropic-compatible" => Ok(Self::AnthropicCompatible),
            "other" => Ok(Self::Other),
            other => Err(ChatError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Non-secret configuration of one upstream provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AIProvider {
    /// Stable identifier.
    pub id: ProviderId,
    /// Display name; also the key under which the secret is filed.
    pub name: String,
    /// Wire-contract family.
    pub family: ProviderFamily,
    /// Base URL override. `None` uses the family default.
    pub base_url: Option<String>,
    /// Optional organization id forwarded to the upstream.
    pub organization: Option<String>,
    /// Inactive providers are never selected or dispatched to.
    pub active: bool,
    /// Requests admitted per minute.
    pub rate_limit_requests: u32,
    /// Tokens admitted per minute.
    pub rate_limit_tokens: u32,
    /// Per-request timeout in seconds.
    pub timeout_seconds: u64,
    /// Dispatch attempts, the initial one included.
    pub retry_attempts: u32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl AIProvider {
    /// Create a provider record with default limits.
    #[must_use]
    pub fn new(name: impl Into<String>, family: ProviderFamily) -> Self {
        let now = Utc::now();
        Self {
            id: ProviderId::new(),
            name: name.into(),
            family,
            base_url: None,
            organization: None,
            active: true,
            rate_limit_requests: 60,
            rate_limit_tokens: 90_000,
            timeout_seconds: 30,
            retry_attempts: 3,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set a base URL override.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the organization id.
    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Set the per-minute rate limits.
    #[must_use]
    pub const fn with_rate_limits(mut self, requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        self.rate_limit_requests = requests_per_minute;
        self.rate_limit_tokens = tokens_per_minute;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set the retry attempt count (initial attempt included).
    #[must_use]
    pub const fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Set the active flag.
    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Effective base URL: the override when present, else the family
    /// default, trailing slash trimmed.
    #[must_use]
    pub fn effective_base_url(&self) -> String {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.family.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_serde_uses_kebab_case() {
        let json = serde_json::to_string(&ProviderFamily::OpenaiCompatible).unwrap();
        assert_eq!(json, "\"openai-compatible\"");
        let back: ProviderFamily = serde_json::from_str("\"anthropic-compatible\"").unwrap();
        assert_eq!(back, ProviderFamily::AnthropicCompatible);
    }

    #[test]
    fn test_record_never_serializes_an_api_key() {
        let provider = AIProvider::new("openai-main", ProviderFamily::OpenaiCompatible);
        let json = serde_json::to_string(&provider).unwrap();
        assert!(!json.contains("api_key"));
    }

    #[test]
    fn test_effective_base_url_prefers_override() {
        let provider = AIProvider::new("local", ProviderFamily::OpenaiCompatible)
            .with_base_url("http://127.0.0.1:8080/");
        assert_eq!(provider.effective_base_url(), "http://127.0.0.1:8080");

        let plain = AIProvider::new("openai", ProviderFamily::OpenaiCompatible);
        assert_eq!(plain.effective_base_url(), "https://api.openai.com");
    }

    #[test]
    fn test_builder_defaults() {
        let provider = AIProvider::new("p", ProviderFamily::AnthropicCompatible)
            .with_rate_limits(10, 1000)
            .with_retry_attempts(2);
        assert!(provider.active);
        assert_eq!(provider.rate_limit_requests, 10);
        assert_eq!(provider.rate_limit_tokens, 1000);
        assert_eq!(provider.retry_attempts, 2);
        assert_eq!(provider.timeout_seconds, 30);
    }
}
