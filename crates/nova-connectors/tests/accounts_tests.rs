mod common;

use common::*;
use httpmock::prelude::*;
use nova_connectors::{AccountManager, StateSigner};
use nova_core::{account_id_for, ConfigScope, ConnectorKind, ErrorKind, ServiceReason};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

fn mail() -> ConnectorKind {
    ConnectorKind::mail()
}

fn manager(server: &MockServer, store: std::sync::Arc<nova_store::ScopedConfigStore>) -> AccountManager {
    AccountManager::new(coordinator(server, store))
        .with_state_signer(StateSigner::new("state-secret").unwrap())
        .with_revoke_timeout(Duration::from_secs(1))
}

#[tokio::test]
async fn test_callback_links_account_for_state_user() {
    let server = MockServer::start_async().await;
    let exchange = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/token")
                .body_contains("grant_type=authorization_code")
                .body_contains("code=code-1")
                .body_contains("client_id=client-1");
            then.status(200).header("Content-Type", "application/json").json_body(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600,
                "scope": "email mail.read"
            }));
        })
        .await;

    let store = store();
    let manager = manager(&server, store.clone());

    let url = manager
        .authorization_url(&scope(), &mail(), "/settings/connectors")
        .await
        .unwrap();
    let parsed = url::Url::parse(&url).unwrap();
    let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
    assert_eq!(params["client_id"], "client-1");
    assert_eq!(params["access_type"], "offline");
    assert!(params["scope"].contains("gmail.modify"));

    let (payload, summary) = manager
        .handle_callback(&params["state"], &mail(), "code-1", EMAIL)
        .await
        .unwrap();
    exchange.assert_hits_async(1).await;
    assert_eq!(payload.user_id, "u1");
    assert_eq!(payload.return_to, "/settings/connectors");
    assert_eq!(summary.id, account_id_for(EMAIL));
    assert!(summary.active);
    assert_eq!(summary.scopes, vec!["email".to_string(), "mail.read".to_string()]);

    let doc = store.load(&scope()).await.unwrap();
    let block = doc.connector(&mail()).unwrap();
    assert!(block.connected);
    assert_eq!(block.accounts[0].refresh_token, "rt-1");

    // State for another connector is refused.
    let err = manager
        .handle_callback(&params["state"], &ConnectorKind::calendar(), "code-1", EMAIL)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_reconnect_requests_granted_scopes_and_keeps_refresh_token() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/token");
            then.status(200).header("Content-Type", "application/json").json_body(json!({
                "access_token": "at-2",
                "expires_in": 3600,
                "scope": "mail.send"
            }));
        })
        .await;

    let store = store();
    let account_id = seed_account(&store, EMAIL, "at-1", "rt-1", expired()).await;
    let manager = manager(&server, store.clone());

    let url = manager
        .authorization_url(&scope(), &mail(), "/settings")
        .await
        .unwrap();
    assert!(url.contains("mail.read"));

    let summary = manager
        .complete_authorization(&scope(), &mail(), "code-2", "Alice@Example.com")
        .await
        .unwrap();
    assert_eq!(summary.id, account_id);
    assert_eq!(summary.scopes, vec!["mail.read".to_string(), "mail.send".to_string()]);

    let doc = store.load(&scope()).await.unwrap();
    let block = doc.connector(&mail()).unwrap();
    assert_eq!(block.accounts.len(), 1);
    assert_eq!(block.accounts[0].access_token, "at-2");
    assert_eq!(block.accounts[0].refresh_token, "rt-1");
}

#[tokio::test]
async fn test_enable_select_and_disconnect() {
    let server = MockServer::start_async().await;
    let revoke = server
        .mock_async(|when, then| {
            when.method(POST).path("/revoke").body_contains("token=rt-b");
            then.status(200);
        })
        .await;

    let store = store();
    let a = seed_account(&store, "a@example.com", "at-a", "rt-a", in_one_hour()).await;
    let b = seed_account(&store, "b@example.com", "at-b", "rt-b", in_one_hour()).await;
    let manager = manager(&server, store.clone());

    let selected = manager.set_active_account(&scope(), &mail(), &b).await.unwrap();
    assert!(selected.active);

    let disabled = manager
        .set_account_enabled(&scope(), &mail(), &b, false)
        .await
        .unwrap();
    assert!(!disabled.enabled);
    assert!(!disabled.active);
    let accounts = manager.list_accounts(&scope(), &mail()).await.unwrap();
    assert!(accounts.iter().any(|s| s.id == a && s.active));

    let removed = manager.disconnect_account(&scope(), &mail(), &b).await.unwrap();
    assert_eq!(removed.id, b);
    let accounts = manager.list_accounts(&scope(), &mail()).await.unwrap();
    assert_eq!(accounts.len(), 1);

    // Revocation runs detached.
    for _ in 0..50 {
        if revoke.hits_async().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    revoke.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_unknown_targets() {
    let server = MockServer::start_async().await;
    let store = store();
    let manager = manager(&server, store.clone());

    let err = manager
        .set_account_enabled(&scope(), &mail(), "acct_x", false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    seed_account(&store, EMAIL, "at", "rt", in_one_hour()).await;
    let err = manager
        .disconnect_account(&scope(), &mail(), "acct_x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccountNotFound);

    let err = manager
        .complete_authorization(&scope(), &mail(), "code", " ")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_padded_user_id_still_evicts_cached_token() {
    let server = MockServer::start_async().await;
    let store = store();
    let account_id = seed_account(&store, EMAIL, "at-1", "rt-1", in_one_hour()).await;
    let coordinator = coordinator(&server, store.clone());
    let manager = AccountManager::new(coordinator.clone());

    assert_eq!(
        coordinator.get_valid_token(&scope(), &mail(), None, false, None).await.unwrap(),
        "at-1"
    );
    assert_eq!(coordinator.cache_len(), 1);

    let padded = ConfigScope::service(" u1 ", ServiceReason::Scheduler);
    manager
        .set_account_enabled(&padded, &mail(), &account_id, false)
        .await
        .unwrap();
    assert_eq!(coordinator.cache_len(), 0);

    let err = coordinator
        .get_valid_token(&scope(), &mail(), None, false, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
}
