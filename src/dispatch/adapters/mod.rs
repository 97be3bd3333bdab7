//! Upstream adapters, one module per provider family.
//!
//! Adapters are pure functions over (provider config, request, HTTP
//! client): they hold no state, never retry, and report every non-2xx as a
//! typed failure with the upstream message preserved. Family differences in
//! the wire contract stay inside this module tree.

pub mod anthropic;
pub mod openai;

use std::time::Duration;

use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::dispatch::request::{ChatRequest, ChatResponse};
use crate::providers::records::{AIProvider, ProviderFamily};

/// Failure of a single upstream attempt.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Connection-level failure, including client-side aborts.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The upstream answered with a non-2xx status.
    ///
    /// Non-2xx answers are unbilled: the engine refunds the admission cost.
    #[error("upstream status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Upstream error message, verbatim where parseable.
        message: String,
        /// Upstream retry hint, when supplied.
        retry_after: Option<Duration>,
    },
    /// A 2xx answer whose body did not match the wire contract.
    #[error("response parse error: {0}")]
    Parse(String),
    /// The provider family has no adapter.
    #[error("no adapter for provider family: {0}")]
    Unsupported(String),
}

/// Dispatch one attempt to the provider's family adapter.
///
/// # Errors
/// Returns an [`AdapterError`] describing the failed attempt.
pub async fn send(
    client: &reqwest::Client,
    provider: &AIProvider,
    api_key: &str,
    request: &ChatRequest,
) -> Result<ChatResponse, AdapterError> {
    match provider.family {
        ProviderFamily::OpenaiCompatible => openai::send(client, provider, api_key, request).await,
        ProviderFamily::AnthropicCompatible => {
            anthropic::send(client, provider, api_key, request).await
        }
        ProviderFamily::Other => Err(AdapterError::Unsupported(provider.family.to_string())),
    }
}

/// Probe URL and headers for a minimal upstream liveness check.
///
/// Both shipped families expose a model listing endpoint that answers
/// cheaply and exercises authentication.
#[must_use]
pub fn probe_request(provider: &AIProvider, api_key: &str) -> Option<(String, Vec<(String, String)>)> {
    let base = provider.effective_base_url();
    match provider.family {
        ProviderFamily::OpenaiCompatible => Some((
            format!("{base}/v1/models"),
            vec![("authorization".to_string(), format!("Bearer {api_key}"))],
        )),
        ProviderFamily::AnthropicCompatible => Some((
            format!("{base}/v1/models"),
            vec![
                ("x-api-key".to_string(), api_key.to_string()),
                (
                    "anthropic-version".to_string(),
                    anthropic::ANTHROPIC_VERSION.to_string(),
                ),
            ],
        )),
        ProviderFamily::Other => None,
    }
}

/// Pull a retry hint out of a `retry-after` header, seconds form only.
pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Extract the upstream error message from a JSON error body, falling back
/// to the raw body.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "upstream returned no error body".to_string()
    } else {
        trimmed.chars().take(512).collect()
    }
}
