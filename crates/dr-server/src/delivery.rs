//! Result delivery to the caller's callback endpoint.
//!
//! The converted PDF is posted as a multipart upload. Transport errors and
//! 5xx responses are retried under a per-variant [`BackoffPolicy`]; anything
//! else (including every 4xx) is final on the first answer.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::USER_AGENT;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Serialize;

use dr_core::config::{DeliveryConfig, DeliveryPolicyConfig};
use dr_core::events::{EventBus, EventPayload};
use dr_core::{Callback, EndpointVariant, JobId};

// ---------------------------------------------------------------------------
// BackoffPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn from_config(config: &DeliveryPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based) before the
    /// next one. Grows by `multiplier` each time, capped at `max_delay`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.multiplier
            .checked_pow(exponent)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Every delay the policy would sleep, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(|attempt| self.delay_after(attempt))
    }
}

// ---------------------------------------------------------------------------
// DeliveryOutcome
// ---------------------------------------------------------------------------

/// What the callback destination said, after retries.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryOutcome {
    pub url: String,
    pub attempts: u32,
    /// Final HTTP status, if any response arrived.
    pub status: Option<u16>,
    /// Parsed JSON body, or the raw text as a JSON string.
    pub body: serde_json::Value,
    /// Whether the response body carried the success marker key.
    pub marker_found: bool,
    /// Transport error of the last attempt when no response arrived.
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }

    /// 2xx with the success marker: the receiver has the file.
    pub fn is_confirmed(&self) -> bool {
        self.is_success() && self.marker_found
    }

    /// Human-readable failure for the job record.
    pub fn failure_message(&self) -> String {
        match (self.status, &self.error) {
            (Some(status), _) => format!("callback {} returned HTTP {status}", self.url),
            (None, Some(error)) => format!("callback {} unreachable: {error}", self.url),
            (None, None) => format!("callback {} was never attempted", self.url),
        }
    }
}

// ---------------------------------------------------------------------------
// DeliveryClient
// ---------------------------------------------------------------------------

/// Posts converted artifacts to callback destinations.
///
/// Holds one [`reqwest::Client`] per endpoint variant so connection pools and
/// connect timeouts follow the variant's policy.
pub struct DeliveryClient {
    callback_client: Client,
    upload_client: Client,
    config: DeliveryConfig,
    events: Arc<EventBus>,
}

impl DeliveryClient {
    pub fn new(config: DeliveryConfig, events: Arc<EventBus>) -> Self {
        Self {
            callback_client: build_client(&config.callback),
            upload_client: build_client(&config.upload),
            config,
            events,
        }
    }

    pub fn policy(&self, variant: EndpointVariant) -> BackoffPolicy {
        BackoffPolicy::from_config(self.config.policy(variant))
    }

    pub fn url_for(&self, callback: &Callback) -> String {
        callback.url_for(&self.config.policy(callback.variant).path)
    }

    /// Upload `artifact` to the callback, retrying per the variant's policy.
    ///
    /// Never fails: every outcome, including an unreadable artifact, is
    /// described by the returned [`DeliveryOutcome`].
    pub async fn deliver(&self, job_id: JobId, artifact: &Path, callback: &Callback) -> DeliveryOutcome {
        let url = self.url_for(callback);
        let policy_config = self.config.policy(callback.variant);
        let policy = BackoffPolicy::from_config(policy_config);
        let client = match callback.variant {
            EndpointVariant::Callback => &self.callback_client,
            EndpointVariant::Upload => &self.upload_client,
        };

        let mut outcome = DeliveryOutcome {
            url: url.clone(),
            attempts: 0,
            status: None,
            body: serde_json::Value::Null,
            marker_found: false,
            error: None,
        };

        let data = match tokio::fs::read(artifact).await {
            Ok(data) => data,
            Err(e) => {
                outcome.error = Some(format!("cannot read {}: {e}", artifact.display()));
                return outcome;
            }
        };
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output.pdf".to_string());

        for attempt in 1..=policy.max_attempts {
            outcome.attempts = attempt;
            tracing::info!(job_id = %job_id, url = %url, attempt, "Delivering result");

            let form = match build_form(&self.config.field_name, &file_name, data.clone()) {
                Ok(form) => form,
                Err(e) => {
                    outcome.error = Some(e.to_string());
                    return outcome;
                }
            };

            let sent = client
                .post(&url)
                .header(USER_AGENT, &self.config.user_agent)
                .timeout(Duration::from_secs(policy_config.timeout_secs))
                .multipart(form)
                .send()
                .await;

            let retryable = match sent {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let body = serde_json::from_str::<serde_json::Value>(&text)
                        .unwrap_or(serde_json::Value::String(text));

                    outcome.status = Some(status.as_u16());
                    outcome.marker_found = body.get(&self.config.success_marker).is_some();
                    outcome.body = body;
                    outcome.error = None;

                    self.events.broadcast(EventPayload::DeliveryAttempt {
                        job_id,
                        attempt,
                        status: Some(status.as_u16()),
                    });

                    if status.is_server_error() {
                        tracing::warn!(job_id = %job_id, status = %status, attempt, "Callback returned server error");
                        true
                    } else {
                        tracing::info!(job_id = %job_id, status = %status, attempt, "Callback responded");
                        false
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, attempt, "Callback request failed");
                    self.events.broadcast(EventPayload::DeliveryAttempt {
                        job_id,
                        attempt,
                        status: None,
                    });
                    outcome.status = None;
                    outcome.body = serde_json::Value::Null;
                    outcome.marker_found = false;
                    outcome.error = Some(e.to_string());
                    true
                }
            };

            if !retryable || !policy.should_retry(attempt) {
                break;
            }

            let delay = policy.delay_after(attempt);
            tracing::debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "Backing off before retry");
            tokio::time::sleep(delay).await;
        }

        outcome
    }
}

fn build_client(policy: &DeliveryPolicyConfig) -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(policy.connect_timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build delivery HTTP client: {e}");
            Client::new()
        })
}

fn build_form(field: &str, file_name: &str, data: Vec<u8>) -> reqwest::Result<Form> {
    let part = Part::bytes(data)
        .file_name(file_name.to_string())
        .mime_str("application/pdf")?;
    Ok(Form::new().part(field.to_string(), part))
}
