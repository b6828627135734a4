use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};

/// Connector block key inside a user document (`mail`, `calendar`, `music`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorKind(pub String);

impl ConnectorKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn mail() -> Self {
        Self::new("mail")
    }

    pub fn calendar() -> Self {
        Self::new("calendar")
    }

    pub fn music() -> Self {
        Self::new("music")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current wall clock in epoch milliseconds, the unit every stored expiry uses.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Stable account id for an external identity.
///
/// Reconnecting the same mailbox must land on the same record, so the id only
/// depends on the normalized email.
pub fn account_id_for(email: &str) -> String {
    let normalized = email.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("acct_{}", &hex::encode(digest)[..16])
}

fn default_true() -> bool {
    true
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// One linked external account (e.g. one Gmail mailbox).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Epoch milliseconds.
    #[serde(default)]
    pub token_expiry: i64,
    /// Epoch milliseconds.
    #[serde(default)]
    pub connected_at: i64,
}

impl AccountRecord {
    pub fn new(email: &str, scopes: Vec<String>) -> Self {
        Self {
            id: account_id_for(email),
            email: email.trim().to_string(),
            scopes,
            enabled: true,
            access_token: String::new(),
            refresh_token: String::new(),
            token_expiry: 0,
            connected_at: now_ms(),
        }
    }

    /// True when the stored access token outlives `now + margin`.
    pub fn has_fresh_token(&self, now_ms: i64, margin_ms: i64) -> bool {
        !self.access_token.is_empty() && self.token_expiry > now_ms + margin_ms
    }
}

/// Per-connector configuration block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorConfig {
    pub connected: bool,
    pub accounts: Vec<AccountRecord>,
    pub active_account_id: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub redirect_uri: String,
    pub permissions: Map<String, JsonValue>,

    // Single-account layout written by older clients.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub token_expiry: i64,

    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl ConnectorConfig {
    pub fn account(&self, account_id: &str) -> Option<&AccountRecord> {
        self.accounts.iter().find(|a| a.id == account_id)
    }

    pub fn account_mut(&mut self, account_id: &str) -> Option<&mut AccountRecord> {
        self.accounts.iter_mut().find(|a| a.id == account_id)
    }

    pub fn active_account(&self) -> Option<&AccountRecord> {
        if self.active_account_id.is_empty() {
            return None;
        }
        self.account(&self.active_account_id)
    }

    /// Resolves an explicit account id, or the active account when none is given.
    pub fn resolve_account(&self, account_id: Option<&str>) -> CoreResult<&AccountRecord> {
        match account_id.filter(|id| !id.is_empty()) {
            Some(id) => self
                .account(id)
                .ok_or_else(|| CoreError::AccountNotFound(format!("unknown account '{}'", id))),
            None => self
                .active_account()
                .ok_or_else(|| CoreError::NotConnected("no active account".to_string())),
        }
    }

    /// Re-establishes the block invariants after any mutation.
    ///
    /// `connected` is true iff an account is enabled, and `activeAccountId`
    /// points at an enabled account when one exists. Fallback order when the
    /// current selection is no longer valid: first enabled account, then first
    /// remaining account, then empty.
    pub fn normalize(&mut self) {
        self.promote_legacy_account();

        self.connected = self.accounts.iter().any(|a| a.enabled);

        let current_ok = self
            .active_account()
            .map(|a| a.enabled)
            .unwrap_or(false);
        if !current_ok {
            self.active_account_id = self
                .accounts
                .iter()
                .find(|a| a.enabled)
                .or_else(|| self.accounts.first())
                .map(|a| a.id.clone())
                .unwrap_or_default();
        }
    }

    fn promote_legacy_account(&mut self) {
        if !self.accounts.is_empty() || self.email.trim().is_empty() {
            return;
        }
        if self.refresh_token.is_empty() && self.access_token.is_empty() {
            return;
        }
        let mut account = AccountRecord::new(&self.email, Vec::new());
        account.access_token = std::mem::take(&mut self.access_token);
        account.refresh_token = std::mem::take(&mut self.refresh_token);
        account.token_expiry = std::mem::take(&mut self.token_expiry);
        self.active_account_id = account.id.clone();
        self.accounts.push(account);
        self.email.clear();
    }

    /// Inserts or refreshes the record for an external identity.
    ///
    /// On reconnect the original `connectedAt` is kept, scopes are unioned and
    /// a missing refresh token in the new grant does not wipe the stored one.
    pub fn upsert_account(&mut self, incoming: AccountRecord) -> CoreResult<AccountRecord> {
        let id = incoming.id.clone();
        match self.account_mut(&id) {
            Some(existing) => {
                existing.email = incoming.email;
                for scope in incoming.scopes {
                    if !existing.scopes.contains(&scope) {
                        existing.scopes.push(scope);
                    }
                }
                existing.enabled = true;
                existing.access_token = incoming.access_token;
                existing.token_expiry = incoming.token_expiry;
                if !incoming.refresh_token.is_empty() {
                    existing.refresh_token = incoming.refresh_token;
                }
            }
            None => self.accounts.push(incoming),
        }
        if self.active_account().is_none() {
            self.active_account_id = id.clone();
        }
        self.normalize();
        self.account(&id)
            .cloned()
            .ok_or_else(|| CoreError::Internal(format!("account '{}' vanished during upsert", id)))
    }

    pub fn set_account_enabled(&mut self, account_id: &str, enabled: bool) -> CoreResult<()> {
        let account = self
            .account_mut(account_id)
            .ok_or_else(|| CoreError::AccountNotFound(format!("unknown account '{}'", account_id)))?;
        account.enabled = enabled;
        self.normalize();
        Ok(())
    }

    pub fn set_active_account(&mut self, account_id: &str) -> CoreResult<()> {
        let account = self
            .account(account_id)
            .ok_or_else(|| CoreError::AccountNotFound(format!("unknown account '{}'", account_id)))?;
        if !account.enabled {
            return Err(CoreError::InvalidRequest(format!(
                "account '{}' is disabled",
                account_id
            )));
        }
        self.active_account_id = account_id.to_string();
        self.normalize();
        Ok(())
    }

    pub fn remove_account(&mut self, account_id: &str) -> CoreResult<AccountRecord> {
        let index = self
            .accounts
            .iter()
            .position(|a| a.id == account_id)
            .ok_or_else(|| CoreError::AccountNotFound(format!("unknown account '{}'", account_id)))?;
        let removed = self.accounts.remove(index);
        self.normalize();
        Ok(removed)
    }
}

/// Everything Nova persists for one end user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserConfigDocument {
    pub connectors: BTreeMap<String, ConnectorConfig>,
    pub agents: Map<String, JsonValue>,
    pub llm_provider: String,
    pub provider_keys: BTreeMap<String, String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserConfigDocument {
    pub fn connector(&self, kind: &ConnectorKind) -> Option<&ConnectorConfig> {
        self.connectors.get(kind.as_str())
    }

    /// Mutable access, creating an empty block on first use.
    pub fn connector_mut(&mut self, kind: &ConnectorKind) -> &mut ConnectorConfig {
        self.connectors.entry(kind.as_str().to_string()).or_default()
    }

    pub fn normalize(&mut self) {
        for block in self.connectors.values_mut() {
            block.normalize();
        }
    }

    /// Visits every secret-bearing field with a stable, log-safe path.
    pub fn visit_secrets_mut(&mut self, mut f: impl FnMut(&str, &mut String)) {
        for (kind, block) in self.connectors.iter_mut() {
            f(&format!("connectors.{}.oauthClientSecret", kind), &mut block.oauth_client_secret);
            f(&format!("connectors.{}.accessToken", kind), &mut block.access_token);
            f(&format!("connectors.{}.refreshToken", kind), &mut block.refresh_token);
            for account in block.accounts.iter_mut() {
                f(
                    &format!("connectors.{}.accounts.{}.accessToken", kind, account.id),
                    &mut account.access_token,
                );
                f(
                    &format!("connectors.{}.accounts.{}.refreshToken", kind, account.id),
                    &mut account.refresh_token,
                );
            }
        }
        for (provider, key) in self.provider_keys.iter_mut() {
            f(&format!("providerKeys.{}", provider), key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(email: &str, enabled: bool) -> AccountRecord {
        let mut a = AccountRecord::new(email, vec!["mail.read".to_string()]);
        a.enabled = enabled;
        a
    }

    fn block_with(accounts: Vec<AccountRecord>) -> ConnectorConfig {
        let mut block = ConnectorConfig {
            accounts,
            ..Default::default()
        };
        block.normalize();
        block
    }

    #[test]
    fn account_id_is_case_and_whitespace_insensitive() {
        assert_eq!(account_id_for("Alice@Example.com "), account_id_for("alice@example.com"));
        assert_ne!(account_id_for("alice@example.com"), account_id_for("bob@example.com"));
        assert!(account_id_for("alice@example.com").starts_with("acct_"));
    }

    #[test]
    fn disabling_active_account_selects_first_remaining_enabled() {
        let a = account("a@example.com", true);
        let b = account("b@example.com", true);
        let c = account("c@example.com", true);
        let mut block = block_with(vec![a.clone(), b.clone(), c.clone()]);
        block.set_active_account(&b.id).unwrap();

        block.set_account_enabled(&b.id, false).unwrap();

        assert_eq!(block.active_account_id, a.id);
        assert!(block.connected);
    }

    #[test]
    fn disabling_only_enabled_account_disconnects_block() {
        let a = account("a@example.com", true);
        let b = account("b@example.com", false);
        let mut block = block_with(vec![a.clone(), b.clone()]);
        assert_eq!(block.active_account_id, a.id);

        block.set_account_enabled(&a.id, false).unwrap();

        assert!(!block.connected);
        // No enabled account left: fall back to first remaining account.
        assert_eq!(block.active_account_id, a.id);
    }

    #[test]
    fn removing_last_account_clears_selection() {
        let a = account("a@example.com", true);
        let mut block = block_with(vec![a.clone()]);
        block.remove_account(&a.id).unwrap();
        assert!(!block.connected);
        assert!(block.active_account_id.is_empty());
    }

    #[test]
    fn reconnect_updates_instead_of_duplicating() {
        let mut block = ConnectorConfig::default();
        let mut first = AccountRecord::new("a@example.com", vec!["s1".to_string()]);
        first.refresh_token = "rt-1".to_string();
        first.connected_at = 10;
        block.upsert_account(first).unwrap();

        let mut again = AccountRecord::new("A@example.com", vec!["s2".to_string()]);
        again.access_token = "at-2".to_string();
        block.upsert_account(again).unwrap();

        assert_eq!(block.accounts.len(), 1);
        let stored = &block.accounts[0];
        assert_eq!(stored.scopes, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(stored.refresh_token, "rt-1");
        assert_eq!(stored.access_token, "at-2");
        assert_eq!(stored.connected_at, 10);
        assert!(block.connected);
    }

    #[test]
    fn legacy_single_account_is_promoted() {
        let mut block = ConnectorConfig {
            email: "legacy@example.com".to_string(),
            refresh_token: "rt".to_string(),
            token_expiry: 42,
            ..Default::default()
        };
        block.normalize();

        assert_eq!(block.accounts.len(), 1);
        assert_eq!(block.accounts[0].id, account_id_for("legacy@example.com"));
        assert_eq!(block.accounts[0].refresh_token, "rt");
        assert!(block.refresh_token.is_empty());
        assert!(block.connected);
        assert_eq!(block.active_account_id, block.accounts[0].id);
    }

    #[test]
    fn activating_disabled_account_is_rejected() {
        let a = account("a@example.com", true);
        let b = account("b@example.com", false);
        let mut block = block_with(vec![a, b.clone()]);
        let err = block.set_active_account(&b.id).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidRequest);
    }

    #[test]
    fn document_keeps_unknown_block_fields() {
        let raw = serde_json::json!({
            "connectors": {"mail": {"connected": false, "syncLabel": "INBOX"}},
            "llmProvider": "openai"
        });
        let doc: UserConfigDocument = serde_json::from_value(raw).unwrap();
        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["connectors"]["mail"]["syncLabel"], "INBOX");
        assert_eq!(back["llmProvider"], "openai");
    }
}
