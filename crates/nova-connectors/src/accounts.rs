//! Linked-account lifecycle: connect, enable/disable, select, disconnect

use crate::oauth::{AuthorizationUrl, StatePayload, StateSigner, TokenCoordinator};
use nova_core::{
    AccountRecord, ConfigScope, ConnectorConfig, ConnectorKind, CoreError, CoreResult,
    ServiceReason, UserConfigDocument,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_REVOKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Account view without credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: String,
    pub email: String,
    pub scopes: Vec<String>,
    pub enabled: bool,
    pub active: bool,
    pub connected_at: i64,
    pub token_expiry: i64,
}

impl AccountSummary {
    pub fn from_record(record: &AccountRecord, active_account_id: &str) -> Self {
        Self {
            id: record.id.clone(),
            email: record.email.clone(),
            scopes: record.scopes.clone(),
            enabled: record.enabled,
            active: record.id == active_account_id,
            connected_at: record.connected_at,
            token_expiry: record.token_expiry,
        }
    }
}

fn existing_block<'a>(
    doc: &'a mut UserConfigDocument,
    connector: &ConnectorKind,
) -> CoreResult<&'a mut ConnectorConfig> {
    doc.connectors
        .get_mut(connector.as_str())
        .ok_or_else(|| CoreError::NotConnected(format!("{} is not connected", connector)))
}

pub struct AccountManager {
    coordinator: Arc<TokenCoordinator>,
    signer: Option<StateSigner>,
    revoke_timeout: Duration,
}

impl AccountManager {
    pub fn new(coordinator: Arc<TokenCoordinator>) -> Self {
        Self {
            coordinator,
            signer: None,
            revoke_timeout: DEFAULT_REVOKE_TIMEOUT,
        }
    }

    pub fn with_state_signer(mut self, signer: StateSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_revoke_timeout(mut self, timeout: Duration) -> Self {
        self.revoke_timeout = timeout;
        self
    }

    fn signer(&self) -> CoreResult<&StateSigner> {
        self.signer
            .as_ref()
            .ok_or_else(|| CoreError::InvalidRequest("OAuth state signing is not configured".to_string()))
    }

    /// Provider URL that starts the code flow. Scopes already granted to any
    /// linked account are requested again so reconnecting never narrows them.
    pub async fn authorization_url(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        return_to: &str,
    ) -> CoreResult<String> {
        let signer = self.signer()?;
        let user_id = self.coordinator.store().authorize(scope).await?;
        let document = self.coordinator.store().load(scope).await?;
        let block = document.connector(connector);
        let provider = self.coordinator.providers().resolve(connector, block)?;
        let granted: Vec<String> = block
            .map(|b| b.accounts.iter().flat_map(|a| a.scopes.clone()).collect())
            .unwrap_or_default();

        let state = signer.sign(&user_id, return_to, connector.as_str())?;
        let url = AuthorizationUrl::new(&provider.endpoints, &provider.client)
            .with_scopes(&provider.endpoints.default_scopes)
            .with_scopes(&granted)
            .build(&state)?;
        Ok(url.to_string())
    }

    /// Verify the callback `state` and link the account for the user it names.
    pub async fn handle_callback(
        &self,
        state: &str,
        connector: &ConnectorKind,
        code: &str,
        email: &str,
    ) -> CoreResult<(StatePayload, AccountSummary)> {
        let payload = self.signer()?.verify(state, connector.as_str())?;
        let scope = ConfigScope::service(payload.user_id.clone(), ServiceReason::OAuthCallback);
        let summary = self
            .complete_authorization(&scope, connector, code, email)
            .await?;
        Ok((payload, summary))
    }

    /// Exchange an authorization code and upsert the account for `email`.
    pub async fn complete_authorization(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        code: &str,
        email: &str,
    ) -> CoreResult<AccountSummary> {
        if email.trim().is_empty() {
            return Err(CoreError::InvalidRequest("grant identity has no email".to_string()));
        }
        if code.trim().is_empty() {
            return Err(CoreError::InvalidRequest("authorization code is empty".to_string()));
        }
        let user_id = self.coordinator.store().authorize(scope).await?;

        let document = self.coordinator.store().load(scope).await?;
        let provider = self
            .coordinator
            .providers()
            .resolve(connector, document.connector(connector))?;
        let token = self
            .coordinator
            .tokens()
            .exchange_code(&provider, code, None)
            .await?;

        let mut record = AccountRecord::new(email, token.scopes());
        record.access_token = token.access_token.clone();
        record.token_expiry = token.expiry_ms(record.connected_at);
        record.refresh_token = token.rotated_refresh_token().unwrap_or_default().to_string();
        if record.refresh_token.is_empty() {
            warn!(
                target: "nova::oauth",
                user_id = %user_id,
                connector = %connector,
                "grant carried no refresh token"
            );
        }

        let (_, summary) = self
            .coordinator
            .store()
            .update_with(scope, |doc| {
                let block = doc.connector_mut(connector);
                let stored = block.upsert_account(record)?;
                Ok(AccountSummary::from_record(&stored, &block.active_account_id))
            })
            .await?;

        self.coordinator
            .invalidate(&user_id, connector, Some(&summary.id));
        info!(
            target: "nova::oauth",
            user_id = %user_id,
            connector = %connector,
            account_id = %summary.id,
            "account linked"
        );
        Ok(summary)
    }

    pub async fn list_accounts(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
    ) -> CoreResult<Vec<AccountSummary>> {
        let document = self.coordinator.store().load(scope).await?;
        Ok(document
            .connector(connector)
            .map(|block| {
                block
                    .accounts
                    .iter()
                    .map(|a| AccountSummary::from_record(a, &block.active_account_id))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn set_account_enabled(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        account_id: &str,
        enabled: bool,
    ) -> CoreResult<AccountSummary> {
        let user_id = self.coordinator.store().authorize(scope).await?;
        let (_, summary) = self
            .coordinator
            .store()
            .update_with(scope, |doc| {
                let block = existing_block(doc, connector)?;
                block.set_account_enabled(account_id, enabled)?;
                Self::summary_of(block, account_id)
            })
            .await?;
        self.coordinator
            .invalidate(&user_id, connector, Some(account_id));
        debug!(target: "nova::oauth", connector = %connector, account_id, enabled, "account toggled");
        Ok(summary)
    }

    pub async fn set_active_account(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        account_id: &str,
    ) -> CoreResult<AccountSummary> {
        let user_id = self.coordinator.store().authorize(scope).await?;
        let (_, summary) = self
            .coordinator
            .store()
            .update_with(scope, |doc| {
                let block = existing_block(doc, connector)?;
                block.set_active_account(account_id)?;
                Self::summary_of(block, account_id)
            })
            .await?;
        self.coordinator
            .invalidate(&user_id, connector, Some(account_id));
        Ok(summary)
    }

    /// Remove the account, then revoke its grant in the background. The
    /// revocation outcome is only logged.
    pub async fn disconnect_account(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        account_id: &str,
    ) -> CoreResult<AccountSummary> {
        let user_id = self.coordinator.store().authorize(scope).await?;
        let (_, removed) = self
            .coordinator
            .store()
            .update_with(scope, |doc| {
                let block = existing_block(doc, connector)?;
                block.remove_account(account_id)
            })
            .await?;
        self.coordinator
            .invalidate(&user_id, connector, Some(account_id));
        info!(
            target: "nova::oauth",
            user_id = %user_id,
            connector = %connector,
            account_id,
            "account disconnected"
        );

        self.spawn_revocation(connector, &removed);
        Ok(AccountSummary::from_record(&removed, ""))
    }

    fn spawn_revocation(&self, connector: &ConnectorKind, removed: &AccountRecord) {
        let secret = if removed.refresh_token.is_empty() {
            removed.access_token.clone()
        } else {
            removed.refresh_token.clone()
        };
        if secret.is_empty() {
            return;
        }
        let endpoints = match self.coordinator.providers().endpoints(connector) {
            Ok(endpoints) if endpoints.revoke_url.is_some() => endpoints.clone(),
            _ => return,
        };

        let tokens = self.coordinator.tokens().clone();
        let limit = self.revoke_timeout;
        let connector = connector.clone();
        let account_id = removed.id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(limit, tokens.revoke(&endpoints, &secret)).await {
                Ok(Ok(())) => {
                    debug!(target: "nova::oauth", connector = %connector, account_id = %account_id, "grant revoked")
                }
                Ok(Err(e)) => warn!(
                    target: "nova::oauth",
                    connector = %connector,
                    account_id = %account_id,
                    failure = %e.failure_class(),
                    "grant revocation failed"
                ),
                Err(_) => warn!(
                    target: "nova::oauth",
                    connector = %connector,
                    account_id = %account_id,
                    "grant revocation timed out"
                ),
            }
        });
    }

    fn summary_of(block: &ConnectorConfig, account_id: &str) -> CoreResult<AccountSummary> {
        block
            .account(account_id)
            .map(|a| AccountSummary::from_record(a, &block.active_account_id))
            .ok_or_else(|| CoreError::AccountNotFound(format!("unknown account '{}'", account_id)))
    }
}
