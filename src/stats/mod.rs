//! Per-provider usage counters and health snapshots.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::core::ids::ProviderId;

/// Liveness/quality signal for a provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No dispatch or probe has completed yet.
    #[default]
    Unknown,
    /// Last outcome was a success.
    Healthy,
    /// One or two consecutive failures.
    Degraded,
    /// Three or more consecutive failures.
    Unhealthy,
}

/// Failure count at which a provider is marked unhealthy.
const UNHEALTHY_THRESHOLD: u32 = 3;

/// Running usage counters for one provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsageStats {
    /// Dispatches attempted, successes and failures alike.
    pub total_requests: u64,
    /// Dispatches that ended in a terminal failure.
    pub failed_requests: u64,
    /// Prompt tokens billed.
    pub total_tokens_in: u64,
    /// Completion tokens billed.
    pub total_tokens_out: u64,
    /// Accumulated cost in USD.
    pub total_cost: f64,
    /// Running mean response time in milliseconds.
    pub avg_response_time_ms: f64,
    /// `failed_requests / total_requests`.
    pub error_rate: f64,
    /// Timestamp of the most recent dispatch.
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Most recent health snapshot for one provider.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Current status.
    pub status: HealthStatus,
    /// When the snapshot was last updated.
    pub last_check_at: Option<DateTime<Utc>>,
    /// Response time of the last completed call, milliseconds.
    pub last_response_time_ms: Option<u64>,
    /// Message of the last failure, cleared on success.
    pub last_error_message: Option<String>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

/// Tracker of usage and health, keyed by provider id.
///
/// Updates are atomic per provider but deliberately not linearizable across
/// fields; a reader may observe a counter pair mid-update.
#[derive(Debug, Default)]
pub struct UsageTracker {
    usage: DashMap<ProviderId, UsageStats>,
    health: DashMap<ProviderId, ProviderHealth>,
}

impl UsageTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful dispatch.
    pub fn record_success(
        &self,
        provider_id: &ProviderId,
        tokens_in: u64,
        tokens_out: u64,
        cost: f64,
        latency: Duration,
    ) {
        let now = Utc::now();
        let latency_ms = duration_ms(latency);

        {
            let mut stats = self.usage.entry(provider_id.clone()).or_default();
            stats.total_requests += 1;
            stats.total_tokens_in += tokens_in;
            stats.total_tokens_out += tokens_out;
            stats.total_cost += cost;
            stats.avg_response_time_ms +=
                (latency_ms - stats.avg_response_time_ms) / stats.total_requests as f64;
            stats.error_rate = stats.failed_requests as f64 / stats.total_requests as f64;
            stats.last_used_at = Some(now);
        }

        let mut health = self.health.entry(provider_id.clone()).or_default();
        health.status = HealthStatus::Healthy;
        health.consecutive_failures = 0;
        health.last_error_message = None;
        health.last_check_at = Some(now);
        health.last_response_time_ms = Some(latency.as_millis() as u64);
    }

    /// Record a terminal dispatch failure.
    pub fn record_failure(
        &self,
        provider_id: &ProviderId,
        error: &str,
        latency: Option<Duration>,
    ) {
        let now = Utc::now();

        {
            let mut stats = self.usage.entry(provider_id.clone()).or_default();
            stats.total_requests += 1;
            stats.failed_requests += 1;
            if let Some(latency) = latency {
                stats.avg_response_time_ms +=
                    (duration_ms(latency) - stats.avg_response_time_ms)
                        / stats.total_requests as f64;
            }
            stats.error_rate = stats.failed_requests as f64 / stats.total_requests as f64;
            stats.last_used_at = Some(now);
        }

        let mut health = self.health.entry(provider_id.clone()).or_default();
        health.consecutive_failures += 1;
        health.status = if health.consecutive_failures >= UNHEALTHY_THRESHOLD {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        health.last_error_message = Some(error.to_string());
        health.last_check_at = Some(now);
        health.last_response_time_ms = latency.map(|l| l.as_millis() as u64);
    }

    /// Record a successful health probe. Touches the health snapshot only;
    /// probes are not usage.
    pub fn record_probe_success(&self, provider_id: &ProviderId, latency: Duration) {
        let mut health = self.health.entry(provider_id.clone()).or_default();
        health.status = HealthStatus::Healthy;
        health.consecutive_failures = 0;
        health.last_error_message = None;
        health.last_check_at = Some(Utc::now());
        health.last_response_time_ms = Some(latency.as_millis() as u64);
    }

    /// Record a failed health probe. Touches the health snapshot only.
    pub fn record_probe_failure(&self, provider_id: &ProviderId, error: &str) {
        let mut health = self.health.entry(provider_id.clone()).or_default();
        health.consecutive_failures += 1;
        health.status = if health.consecutive_failures >= UNHEALTHY_THRESHOLD {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        health.last_error_message = Some(error.to_string());
        health.last_check_at = Some(Utc::now());
        health.last_response_time_ms = None;
    }

    /// Snapshot of the usage counters for a provider.
    #[must_use]
    pub fn usage(&self, provider_id: &ProviderId) -> UsageStats {
        self.usage
            .get(provider_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of the health state for a provider.
    #[must_use]
    pub fn health(&self, provider_id: &ProviderId) -> ProviderHealth {
        self.health
            .get(provider_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Drop all state for a provider.
    pub fn remove(&self, provider_id: &ProviderId) {
        self.usage.remove(provider_id);
        self.health.remove(provider_id);
    }
}

fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
