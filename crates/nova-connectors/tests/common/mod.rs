#![allow(dead_code)]

use httpmock::MockServer;
use nova_config::ProviderSettings;
use nova_connectors::{
    ProviderRegistry, ResilientExecutor, RetryPolicy, TokenCoordinator, TokenEndpointClient,
};
use nova_core::{now_ms, AccountRecord, ConfigScope, ConnectorKind, ServiceReason};
use nova_store::{EncryptionKey, MemoryConfigBackend, ScopedConfigStore, SecretCodec};
use std::sync::Arc;
use std::time::Duration;

pub const EMAIL: &str = "alice@example.com";

pub fn scope() -> ConfigScope {
    ConfigScope::service("u1", ServiceReason::Scheduler)
}

pub fn store() -> Arc<ScopedConfigStore> {
    Arc::new(ScopedConfigStore::new(
        Arc::new(MemoryConfigBackend::new()),
        Arc::new(SecretCodec::new(EncryptionKey::generate(), vec![])),
    ))
}

pub fn executor() -> Arc<ResilientExecutor> {
    Arc::new(ResilientExecutor::with_client(
        reqwest::Client::new(),
        Duration::from_secs(2),
        RetryPolicy::new(3, Duration::from_millis(10)),
    ))
}

/// Mail provider pointed at the mock server.
pub fn registry(server: &MockServer) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::builtin();
    registry.apply(
        "mail",
        &ProviderSettings {
            client_id: "client-1".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "https://nova.local/oauth/mail/callback".to_string(),
            authorize_url: Some(server.url("/authorize")),
            token_url: Some(server.url("/token")),
            revoke_url: Some(server.url("/revoke")),
            api_base: Some(server.url("/api")),
        },
    );
    Arc::new(registry)
}

pub fn coordinator(server: &MockServer, store: Arc<ScopedConfigStore>) -> Arc<TokenCoordinator> {
    Arc::new(TokenCoordinator::new(
        store,
        TokenEndpointClient::new(executor()),
        registry(server),
    ))
}

/// Link an account directly through the store; returns its id.
pub async fn seed_account(
    store: &ScopedConfigStore,
    email: &str,
    access_token: &str,
    refresh_token: &str,
    token_expiry: i64,
) -> String {
    let mut record = AccountRecord::new(email, vec!["mail.read".to_string()]);
    record.access_token = access_token.to_string();
    record.refresh_token = refresh_token.to_string();
    record.token_expiry = token_expiry;
    let (_, stored) = store
        .update_with(&ConfigScope::service("u1", ServiceReason::OAuthCallback), |doc| {
            doc.connector_mut(&ConnectorKind::mail()).upsert_account(record)
        })
        .await
        .unwrap();
    stored.id
}

pub fn expired() -> i64 {
    now_ms() - 1_000
}

pub fn in_one_hour() -> i64 {
    now_ms() + 3_600_000
}
