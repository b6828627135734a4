//! The only two operations the workflow engine may call on a connector

use crate::http::{ProviderResponse, RequestOptions, ResilientExecutor};
use crate::idempotency::DispatchCache;
use crate::oauth::TokenCoordinator;
use nova_core::{ConfigScope, ConnectorKind, CoreError, CoreResult};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use url::Url;

/// Call against a connector's API base. `path` is relative to the base.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<JsonValue>,
    pub account_id: Option<String>,
    pub operation: Option<String>,
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub cancel: Option<CancellationToken>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            account_id: None,
            operation: None,
            timeout: None,
            max_attempts: None,
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: JsonValue,
    /// Served from the dispatch cache instead of a new provider call.
    pub duplicate: bool,
}

/// Join a relative API path onto the connector base. Absolute URLs are
/// refused so a bearer token never leaves the provider's origin.
fn resolve_url(api_base: &str, path: &str) -> CoreResult<Url> {
    if path.contains("://") || path.starts_with("//") {
        return Err(CoreError::InvalidRequest(
            "connector API paths must be relative".to_string(),
        ));
    }
    let joined = format!(
        "{}/{}",
        api_base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| CoreError::InvalidRequest(format!("invalid connector URL: {}", e)))
}

pub struct ConnectorGateway {
    coordinator: Arc<TokenCoordinator>,
    dispatch: Arc<DispatchCache<ApiResponse>>,
}

impl ConnectorGateway {
    pub fn new(coordinator: Arc<TokenCoordinator>, dispatch_ttl: Duration) -> Self {
        Self {
            coordinator,
            dispatch: Arc::new(DispatchCache::new(dispatch_ttl)),
        }
    }

    pub fn coordinator(&self) -> &Arc<TokenCoordinator> {
        &self.coordinator
    }

    pub async fn get_valid_token(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        account_id: Option<&str>,
    ) -> CoreResult<String> {
        self.coordinator
            .get_valid_token(scope, connector, account_id, false, None)
            .await
    }

    /// Authenticated provider call. A 401 triggers one forced refresh and one
    /// more try. With an idempotency key, repeats within the TTL return the
    /// first result.
    pub async fn call_connector_api(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        request: ApiRequest,
        idempotency_key: Option<&str>,
    ) -> CoreResult<ApiResponse> {
        let user_id = self.coordinator.store().authorize(scope).await?;
        let key = idempotency_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| format!("{}:{}:{}", user_id, connector, k))
            .unwrap_or_default();

        let coordinator = self.coordinator.clone();
        let scope = scope.clone();
        let connector = connector.clone();
        let outcome = self
            .dispatch
            .run(&key, move || perform(coordinator, scope, connector, request))
            .await?;

        Ok(ApiResponse {
            duplicate: outcome.duplicate,
            ..outcome.value
        })
    }
}

async fn perform(
    coordinator: Arc<TokenCoordinator>,
    scope: ConfigScope,
    connector: ConnectorKind,
    request: ApiRequest,
) -> CoreResult<ApiResponse> {
    let endpoints = coordinator.providers().endpoints(&connector)?;
    let url = resolve_url(&endpoints.api_base, &request.path)?;
    let operation = request.operation.clone().unwrap_or_else(|| {
        format!("{}.{}", connector, request.method.as_str().to_lowercase())
    });
    let executor = coordinator.tokens().executor().clone();
    let cancel = request.cancel.as_ref();
    let account_id = request.account_id.as_deref();

    let token = coordinator
        .get_valid_token(&scope, &connector, account_id, false, cancel)
        .await?;
    let mut response = send(&executor, &url, &request, &operation, &token).await?;

    if response.status == 401 {
        info!(
            target: "nova::oauth",
            user_id = scope.user_id(),
            connector = %connector,
            operation = %operation,
            "access token rejected, forcing a refresh"
        );
        let token = coordinator
            .get_valid_token(&scope, &connector, account_id, true, cancel)
            .await?;
        response = send(&executor, &url, &request, &operation, &token).await?;
    }

    response.error_for_status(&operation)?;
    Ok(ApiResponse {
        status: response.status,
        body: response.json_value(),
        duplicate: false,
    })
}

async fn send(
    executor: &ResilientExecutor,
    url: &Url,
    request: &ApiRequest,
    operation: &str,
    token: &str,
) -> CoreResult<ProviderResponse> {
    let mut builder = executor
        .client()
        .request(request.method.clone(), url.clone())
        .bearer_auth(token)
        .header(ACCEPT, "application/json");
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
        builder = builder.json(body);
    }

    let mut options = RequestOptions::new(operation).with_cancel(request.cancel.clone());
    if let Some(timeout) = request.timeout {
        options = options.with_timeout(timeout);
    }
    if let Some(max_attempts) = request.max_attempts {
        options = options.with_max_attempts(max_attempts);
    }
    Ok(executor.execute(builder, options).await?)
}
