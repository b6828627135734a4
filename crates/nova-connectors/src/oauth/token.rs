//! Token endpoint client: code exchange, refresh and revocation

use super::providers::{ProviderEndpoints, ResolvedProvider};
use crate::error::{ConnectorError, ConnectorResult};
use crate::http::{RequestOptions, ResilientExecutor};
use nova_core::{sanitize_string, CoreError};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Assumed lifetime when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;
/// Tokens are treated as expiring this much earlier than the provider says.
pub const EXPIRY_SAFETY_SECS: i64 = 60;

/// Provider error codes meaning the grant itself is gone.
const REVOKED_GRANT_ERRORS: &[&str] = &["invalid_grant", "invalid_token"];

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Expiry stored with the token: `now + (expires_in - 60) s`, never before `now`.
    pub fn expiry_ms(&self, now_ms: i64) -> i64 {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        now_ms + (lifetime - EXPIRY_SAFETY_SECS).max(0) * 1000
    }

    /// Rotated refresh token, if the provider issued one.
    pub fn rotated_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct TokenEndpointClient {
    executor: Arc<ResilientExecutor>,
}

impl TokenEndpointClient {
    pub fn new(executor: Arc<ResilientExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<ResilientExecutor> {
        &self.executor
    }

    pub async fn exchange_code(
        &self,
        provider: &ResolvedProvider,
        code: &str,
        cancel: Option<&CancellationToken>,
    ) -> ConnectorResult<TokenResponse> {
        let client = &provider.client;
        self.request_token(
            "oauth.exchange_code",
            &provider.endpoints.token_url,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &client.client_id),
                ("client_secret", &client.client_secret),
                ("redirect_uri", &client.redirect_uri),
            ],
            cancel,
        )
        .await
    }

    pub async fn refresh(
        &self,
        provider: &ResolvedProvider,
        refresh_token: &str,
        cancel: Option<&CancellationToken>,
    ) -> ConnectorResult<TokenResponse> {
        let client = &provider.client;
        self.request_token(
            "oauth.refresh",
            &provider.endpoints.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &client.client_id),
                ("client_secret", &client.client_secret),
            ],
            cancel,
        )
        .await
    }

    /// Revoke a token at the provider. Providers without a revocation endpoint are a no-op.
    pub async fn revoke(&self, endpoints: &ProviderEndpoints, token: &str) -> ConnectorResult<()> {
        let Some(url) = endpoints.revoke_url.as_deref() else {
            debug!(target: "nova::oauth", "provider has no revocation endpoint");
            return Ok(());
        };
        let request = self.executor.client().post(url).form(&[("token", token)]);
        let response = self
            .executor
            .execute(request, RequestOptions::new("oauth.revoke").with_max_attempts(1))
            .await?;
        response.error_for_status("oauth.revoke")
    }

    async fn request_token(
        &self,
        operation: &str,
        token_url: &str,
        form: &[(&str, &str)],
        cancel: Option<&CancellationToken>,
    ) -> ConnectorResult<TokenResponse> {
        let request = self
            .executor
            .client()
            .post(token_url)
            .header(ACCEPT, "application/json")
            .form(form);
        let response = self
            .executor
            .execute(
                request,
                RequestOptions::new(operation).with_cancel(cancel.cloned()),
            )
            .await?;

        if response.is_success() {
            let token: TokenResponse = response.json().map_err(|_| {
                ConnectorError::Core(CoreError::Internal(format!(
                    "{}: unreadable token response",
                    operation
                )))
            })?;
            if token.access_token.is_empty() {
                return Err(ConnectorError::Core(CoreError::Internal(format!(
                    "{}: token response without access token",
                    operation
                ))));
            }
            return Ok(token);
        }

        if let Ok(body) = response.json::<TokenErrorBody>() {
            if REVOKED_GRANT_ERRORS.contains(&body.error.as_str()) {
                warn!(
                    target: "nova::oauth",
                    operation,
                    status = response.status,
                    error = %body.error,
                    "grant rejected by provider"
                );
                return Err(ConnectorError::Core(CoreError::ReconnectRequired(format!(
                    "provider rejected the grant ({})",
                    body.error
                ))));
            }
        }
        debug!(
            target: "nova::oauth",
            operation,
            status = response.status,
            body = %sanitize_string(&response.text()),
            "token endpoint error"
        );
        response.error_for_status(operation)?;
        Err(ConnectorError::Core(CoreError::Internal(format!(
            "{}: unexpected status {}",
            operation, response.status
        ))))
    }
}
