//! Per-attempt timeouts and cooperative cancellation

use crate::error::{ConnectorError, ConnectorResult};
use reqwest::ClientBuilder;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Runs one attempt under its own timer, racing the caller's cancellation token.
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    attempt_timeout: Duration,
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

impl TimeoutManager {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self { attempt_timeout }
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Connection establishment is bounded on the shared client; the total
    /// per-attempt budget is applied in `execute_with_timeout`.
    pub fn apply_to_client_builder(&self, builder: ClientBuilder) -> ClientBuilder {
        builder.connect_timeout(self.attempt_timeout)
    }

    /// Execute one attempt. The future must include reading the body so a slow
    /// body counts against the same timer.
    pub async fn execute_with_timeout<F, T>(
        &self,
        operation: &str,
        attempt: F,
        cancel: Option<&CancellationToken>,
    ) -> ConnectorResult<T>
    where
        F: Future<Output = Result<T, reqwest::Error>>,
    {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(ConnectorError::Cancelled(operation.to_string())),
            result = timeout(self.attempt_timeout, attempt) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) if e.is_timeout() => Err(ConnectorError::Timeout(format!(
                    "{} timed out after {}ms",
                    operation,
                    self.attempt_timeout.as_millis()
                ))),
                Ok(Err(e)) if e.is_connect() => Err(ConnectorError::Connection(format!(
                    "{}: connection failed",
                    operation
                ))),
                Ok(Err(e)) => Err(ConnectorError::Http(e.without_url())),
                Err(_) => Err(ConnectorError::Timeout(format!(
                    "{} timed out after {}ms",
                    operation,
                    self.attempt_timeout.as_millis()
                ))),
            },
        }
    }

    /// Backoff sleep that ends early with `Cancelled` when the token fires.
    pub async fn backoff(
        &self,
        operation: &str,
        delay: Duration,
        cancel: Option<&CancellationToken>,
    ) -> ConnectorResult<()> {
        tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(ConnectorError::Cancelled(operation.to_string())),
            _ = sleep(delay) => Ok(()),
        }
    }
}
