use super::retry_manager::{
    classify_error, classify_status_code, ErrorClassification, RetryDecision, RetryPolicy,
};
use super::timeout_manager::TimeoutManager;
use crate::error::{kind_for_status, ConnectorError, ConnectorResult};
use nova_config::HttpSettings;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-call knobs; anything left unset falls back to the executor defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub operation_name: String,
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_cancel(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Fully-read provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ProviderResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Map a non-success status onto the error taxonomy without exposing the body.
    pub fn error_for_status(&self, operation: &str) -> ConnectorResult<()> {
        if self.is_success() {
            return Ok(());
        }
        debug!(
            target: "nova::http",
            operation,
            status = self.status,
            kind = %kind_for_status(self.status),
            "provider returned an error status"
        );
        Err(ConnectorError::Status {
            operation: operation.to_string(),
            status: self.status,
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> ConnectorResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as JSON; empty bodies read as `null` and non-JSON bodies as a string.
    pub fn json_value(&self) -> JsonValue {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return JsonValue::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| JsonValue::String(self.text()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends provider requests with per-attempt timeouts, bounded retries and cancellation.
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    client: Client,
    default_timeout: Duration,
    retry: RetryPolicy,
}

impl ResilientExecutor {
    pub fn new(settings: &HttpSettings) -> ConnectorResult<Self> {
        let timeouts = TimeoutManager::new(settings.timeout());
        let client = timeouts
            .apply_to_client_builder(Client::builder())
            .build()
            .map_err(|e| ConnectorError::InvalidConfig(format!("http client: {}", e)))?;
        Ok(Self::with_client(
            client,
            settings.timeout(),
            RetryPolicy::new(settings.max_attempts, settings.retry_delay()),
        ))
    }

    pub fn with_client(client: Client, default_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client,
            default_timeout,
            retry,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn execute(
        &self,
        request: RequestBuilder,
        options: RequestOptions,
    ) -> ConnectorResult<ProviderResponse> {
        let operation = options.operation_name.as_str();
        let cancel = options.cancel.as_ref();
        let timeouts = TimeoutManager::new(options.timeout.unwrap_or(self.default_timeout));
        let max_attempts = options
            .max_attempts
            .unwrap_or_else(|| self.retry.max_attempts());
        // Streaming bodies cannot be replayed.
        let policy = if request.try_clone().is_some() {
            RetryPolicy::new(max_attempts, self.retry.base_delay())
        } else {
            RetryPolicy::new(1, self.retry.base_delay())
        };

        let started = Instant::now();
        let mut request = request;
        let mut attempt = 1;
        loop {
            let replay = request.try_clone();
            let result = timeouts
                .execute_with_timeout(operation, Self::send(request), cancel)
                .await;

            let failure = match result {
                Ok(response) if classify_status_code(response.status) == ErrorClassification::Retryable => {
                    ConnectorError::Status {
                        operation: operation.to_string(),
                        status: response.status,
                    }
                }
                Ok(response) => {
                    debug!(
                        target: "nova::http",
                        operation,
                        attempt,
                        status = response.status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "request completed"
                    );
                    return Ok(response);
                }
                Err(e) => e,
            };

            if matches!(failure, ConnectorError::Cancelled(_)) {
                debug!(target: "nova::http", operation, attempt, "request cancelled");
                return Err(failure);
            }

            let classification = classify_error(&failure);
            match (policy.decide(attempt, classification), replay) {
                (RetryDecision::Retry { delay, next_attempt }, Some(next)) => {
                    warn!(
                        target: "nova::http",
                        operation,
                        attempt,
                        failure = %failure.failure_class(),
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying"
                    );
                    timeouts.backoff(operation, delay, cancel).await?;
                    request = next;
                    attempt = next_attempt;
                }
                (decision, _) => {
                    if classification == ErrorClassification::NonRetryable {
                        return Err(failure);
                    }
                    let reason = match decision {
                        RetryDecision::Stop { reason } => reason,
                        RetryDecision::Retry { .. } => "request cannot be replayed",
                    };
                    warn!(
                        target: "nova::http",
                        operation,
                        attempts = attempt,
                        failure = %failure.failure_class(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        reason,
                        "giving up"
                    );
                    return Err(ConnectorError::Exhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_failure: failure.failure_class(),
                    });
                }
            }
        }
    }

    async fn send(request: RequestBuilder) -> Result<ProviderResponse, reqwest::Error> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(ProviderResponse {
            status,
            headers,
            body,
        })
    }
}
