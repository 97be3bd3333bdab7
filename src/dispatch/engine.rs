//! The dispatch engine: admission, retry, timeout, and accounting around a
//! single upstream send.
//!
//! Dispatch is strictly request-scoped. The engine never reads or mutates
//! conversation state; the orchestrator owns that side.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::catalog::ModelCatalog;
use crate::core::config::DispatchConfig;
use crate::core::errors::{ChatError, ChatResult};
use crate::core::ids::ProviderId;
use crate::credentials::CredentialStore;
use crate::dispatch::adapters::{self, AdapterError};
use crate::dispatch::request::{ChatRequest, ChatResponse};
use crate::limiter::{Admission, RateLimiter};
use crate::providers::records::{AIProvider, ProviderFamily};
use crate::providers::registry::ProviderRegistry;
use crate::stats::{ProviderHealth, UsageTracker};

/// Cap on exponential back-off between retries.
const BACKOFF_CAP: Duration = Duration::from_secs(8);
/// Base unit of exponential back-off.
const BACKOFF_UNIT_MS: u64 = 250;
/// Rough characters-per-token ratio used for admission estimates.
const CHARS_PER_TOKEN: usize = 4;

/// Outcome of classifying one failed attempt.
struct AttemptFailure {
    error: ChatError,
    retryable: bool,
    /// Upstream-provided sleep hint (429 only).
    hint: Option<Duration>,
    /// Whether the upstream did not bill the attempt and the admission cost
    /// should be returned.
    unbilled: bool,
    /// Response latency, when a response actually arrived.
    latency: Option<Duration>,
}

/// Single entry point for sending uniform requests upstream.
pub struct DispatchEngine {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialStore>,
    catalog: Arc<ModelCatalog>,
    tracker: Arc<UsageTracker>,
    limiter: RateLimiter,
    client: reqwest::Client,
    defaults: DispatchConfig,
}

impl DispatchEngine {
    /// Build an engine over shared components and one pooled HTTP client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        credentials: Arc<CredentialStore>,
        catalog: Arc<ModelCatalog>,
        tracker: Arc<UsageTracker>,
        defaults: DispatchConfig,
    ) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(defaults.connect_timeout_seconds))
            .build()
            .map_err(|err| ChatError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            registry,
            credentials,
            catalog,
            tracker,
            limiter: RateLimiter::new(),
            client,
            defaults,
        })
    }

    /// Drop limiter state for a provider (on provider deletion).
    pub fn forget_provider(&self, provider_id: &ProviderId) {
        self.limiter.remove(provider_id);
    }

    /// Send a uniform request through the named provider.
    ///
    /// # Errors
    /// Returns the typed error of the failing step; retryable upstream
    /// failures surface only after the provider's retry budget is spent.
    pub async fn send(
        &self,
        provider_id: &ProviderId,
        request: &ChatRequest,
    ) -> ChatResult<ChatResponse> {
        request.validate()?;

        let provider = self
            .registry
            .get(provider_id)
            .filter(|p| p.active)
            .ok_or_else(|| ChatError::ProviderNotFound(provider_id.clone()))?;

        if provider.family == ProviderFamily::Other {
            return Err(ChatError::UnsupportedProvider(provider.family.to_string()));
        }

        let api_key = self
            .credentials
            .get(&provider.name)
            .await?
            .ok_or_else(|| ChatError::ProviderUnconfigured(provider_id.clone()))?;

        let estimated_tokens = self.estimate_tokens(request);
        if let Admission::Denied { retry_after } = self.limiter.admit(&provider, estimated_tokens)
        {
            debug!(
                "Rate limiter denied dispatch to {provider_id} (retry after {}s)",
                retry_after.as_secs()
            );
            return Err(ChatError::RateLimitExceeded { retry_after });
        }

        self.run_attempts(&provider, &api_key, request, estimated_tokens)
            .await
    }

    async fn run_attempts(
        &self,
        provider: &AIProvider,
        api_key: &str,
        request: &ChatRequest,
        estimated_tokens: u64,
    ) -> ChatResult<ChatResponse> {
        let attempts = provider.retry_attempts.max(1);
        let timeout = self.effective_timeout(provider);

        let mut attempt: u32 = 0;
        loop {
            let attempt_started = Instant::now();
            let outcome = tokio::time::timeout(
                timeout,
                adapters::send(&self.client, provider, api_key, request),
            )
            .await;

            let failure = match outcome {
                Ok(Ok(response)) => {
                    let latency = attempt_started.elapsed();
                    let cost = self.catalog.cost(&request.model, &response.usage);
                    self.tracker.record_success(
                        &provider.id,
                        u64::from(response.usage.prompt_tokens),
                        u64::from(response.usage.completion_tokens),
                        cost,
                        latency,
                    );
                    info!(
                        "Dispatch to {} succeeded on attempt {} ({} tokens in, {} out)",
                        provider.id,
                        attempt + 1,
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens
                    );
                    return Ok(response);
                }
                Ok(Err(err)) => classify(err, attempt_started.elapsed()),
                Err(_elapsed) => AttemptFailure {
                    error: ChatError::Timeout,
                    retryable: true,
                    hint: None,
                    unbilled: false,
                    latency: None,
                },
            };

            if failure.retryable && attempt + 1 < attempts {
                let pause = failure.hint.unwrap_or_else(|| backoff_with_jitter(attempt));
                debug!(
                    "Attempt {} to {} failed ({}), retrying in {}ms",
                    attempt + 1,
                    provider.id,
                    failure.error,
                    pause.as_millis()
                );
                tokio::time::sleep(pause).await;
                attempt += 1;
                continue;
            }

            if failure.unbilled {
                self.limiter.refund(&provider.id, estimated_tokens);
            }
            self.tracker
                .record_failure(&provider.id, &failure.error.to_string(), failure.latency);
            warn!(
                "Dispatch to {} failed after {} attempt(s): {}",
                provider.id,
                attempt + 1,
                failure.error
            );
            return Err(failure.error);
        }
    }

    /// Probe the provider with a minimal upstream call and fold the result
    /// into its health snapshot.
    ///
    /// # Errors
    /// Fails for unknown, unconfigured, or adapter-less providers; an
    /// unreachable upstream is not an error here, it is an unhealthy probe.
    pub async fn check_provider_health(
        &self,
        provider_id: &ProviderId,
    ) -> ChatResult<ProviderHealth> {
        let provider = self
            .registry
            .get(provider_id)
            .ok_or_else(|| ChatError::ProviderNotFound(provider_id.clone()))?;

        let api_key = self
            .credentials
            .get(&provider.name)
            .await?
            .ok_or_else(|| ChatError::ProviderUnconfigured(provider_id.clone()))?;

        let Some((url, headers)) = adapters::probe_request(&provider, &api_key) else {
            return Err(ChatError::UnsupportedProvider(provider.family.to_string()));
        };

        let mut builder = self.client.get(&url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.effective_timeout(&provider), builder.send()).await;
        match outcome {
            Ok(Ok(response)) if response.status().is_success() => {
                self.tracker
                    .record_probe_success(provider_id, started.elapsed());
            }
            Ok(Ok(response)) => {
                self.tracker.record_probe_failure(
                    provider_id,
                    &format!("health probe returned status {}", response.status().as_u16()),
                );
            }
            Ok(Err(err)) => {
                self.tracker
                    .record_probe_failure(provider_id, &format!("health probe failed: {err}"));
            }
            Err(_elapsed) => {
                self.tracker
                    .record_probe_failure(provider_id, "health probe timed out");
            }
        }

        Ok(self.tracker.health(provider_id))
    }

    fn effective_timeout(&self, provider: &AIProvider) -> Duration {
        let seconds = if provider.timeout_seconds == 0 {
            self.defaults.default_timeout_seconds
        } else {
            provider.timeout_seconds
        };
        Duration::from_secs(seconds)
    }

    /// Admission estimate: prompt size is known, completion is bounded by
    /// the request budget, the model default, or the process default.
    fn estimate_tokens(&self, request: &ChatRequest) -> u64 {
        let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
        let prompt_estimate = (prompt_chars / CHARS_PER_TOKEN + 1) as u64;
        let completion_estimate = u64::from(
            request
                .max_output_tokens
                .or_else(|| self.catalog.default_max_output(&request.model))
                .unwrap_or(self.defaults.default_max_output_tokens),
        );
        prompt_estimate + completion_estimate
    }
}

fn classify(err: AdapterError, elapsed: Duration) -> AttemptFailure {
    match err {
        AdapterError::Http(err) => {
            if err.is_timeout() {
                AttemptFailure {
                    error: ChatError::Timeout,
                    retryable: true,
                    hint: None,
                    unbilled: false,
                    latency: None,
                }
            } else {
                AttemptFailure {
                    error: ChatError::Transport(err.to_string()),
                    retryable: true,
                    hint: None,
                    unbilled: false,
                    latency: None,
                }
            }
        }
        AdapterError::Status {
            status: 429,
            message,
            retry_after,
        } => AttemptFailure {
            error: retry_after.map_or(
                ChatError::Upstream4xx {
                    status: 429,
                    detail: message,
                },
                |retry_after| ChatError::RateLimitExceeded { retry_after },
            ),
            retryable: true,
            hint: retry_after,
            unbilled: true,
            latency: Some(elapsed),
        },
        AdapterError::Status {
            status,
            message: _,
            retry_after: _,
        } if (500..=599).contains(&status) => AttemptFailure {
            error: ChatError::Upstream5xx { status },
            retryable: true,
            hint: None,
            unbilled: true,
            latency: Some(elapsed),
        },
        AdapterError::Status {
            status,
            message,
            retry_after: _,
        } => AttemptFailure {
            error: ChatError::Upstream4xx {
                status,
                detail: message,
            },
            retryable: false,
            hint: None,
            unbilled: true,
            latency: Some(elapsed),
        },
        AdapterError::Parse(message) => AttemptFailure {
            error: ChatError::Internal(format!("adapter parse error: {message}")),
            retryable: false,
            hint: None,
            unbilled: false,
            latency: Some(elapsed),
        },
        AdapterError::Unsupported(family) => AttemptFailure {
            error: ChatError::UnsupportedProvider(family),
            retryable: false,
            hint: None,
            unbilled: false,
            latency: None,
        },
    }
}

/// Full-jitter exponential back-off: `min(2^attempt * 250ms, 8s)` scaled by
/// a uniform random factor.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = (BACKOFF_UNIT_MS << attempt.min(16)).min(BACKOFF_CAP.as_millis() as u64);
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms);
    Duration::from_millis(jitter_ms)
}
