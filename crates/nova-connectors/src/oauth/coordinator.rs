//! Access-token cache and per-account refresh coordination
//!
//! Per account: `VALID -> STALE -> REFRESHING -> VALID | FAILED`. A token is
//! stale once it expires within [`STALE_MARGIN_MS`] or when the caller forces
//! a refresh. Only one refresh per `userId:connector:accountId` runs in this
//! process; concurrent callers wait for the leader's result.
//!
//! The active account of a connector is remembered per user. The stored
//! document stays authoritative: when the remembered account turns out to be
//! disabled or gone, the selection is re-read once from the store.

use super::providers::ProviderRegistry;
use super::token::TokenEndpointClient;
use crate::error::ConnectorResult;
use crate::http::ResilientExecutor;
use crate::lock;
use nova_config::Settings;
use nova_core::{
    now_ms, AccountRecord, ConfigScope, ConnectorConfig, ConnectorKind, CoreError, CoreResult,
    ErrorKind, ServiceReason, UserConfigDocument,
};
use nova_store::ScopedConfigStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const STALE_MARGIN_MS: i64 = 30_000;
pub const DEFAULT_CACHE_SOFT_LIMIT: usize = 512;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at_ms: i64,
}

type Waiters = Vec<oneshot::Sender<CoreResult<String>>>;
type InflightMap = Arc<Mutex<HashMap<String, Waiters>>>;

fn token_key(user_id: &str, connector: &ConnectorKind, account_id: &str) -> String {
    format!("{}:{}:{}", user_id, connector, account_id)
}

fn active_key(user_id: &str, connector: &ConnectorKind) -> String {
    format!("{}:{}", user_id, connector)
}

fn usable_account<'a>(
    document: &'a UserConfigDocument,
    connector: &ConnectorKind,
    account_id: &str,
) -> CoreResult<(&'a ConnectorConfig, &'a AccountRecord)> {
    let block = document
        .connector(connector)
        .ok_or_else(|| CoreError::NotConnected(format!("{} is not connected", connector)))?;
    let account = block.resolve_account(Some(account_id))?;
    if !account.enabled {
        return Err(CoreError::NotConnected(format!(
            "account '{}' is disabled",
            account_id
        )));
    }
    Ok((block, account))
}

enum Role {
    Leader(InflightGuard),
    Follower(oneshot::Receiver<CoreResult<String>>),
}

/// Removes the in-flight marker however the leader exits. Dropping without
/// `finish` drops the waiters' senders, which sends followers back to elect
/// a new leader.
struct InflightGuard {
    key: String,
    inflight: InflightMap,
    finished: bool,
}

impl InflightGuard {
    fn take_waiters(&self) -> Waiters {
        lock(&self.inflight).remove(&self.key).unwrap_or_default()
    }

    fn finish(mut self, result: &CoreResult<String>) {
        self.finished = true;
        for waiter in self.take_waiters() {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if !self.finished {
            drop(self.take_waiters());
        }
    }
}

pub struct TokenCoordinator {
    store: Arc<ScopedConfigStore>,
    tokens: TokenEndpointClient,
    providers: Arc<ProviderRegistry>,
    cache: Mutex<HashMap<String, CachedToken>>,
    active: Mutex<HashMap<String, String>>,
    inflight: InflightMap,
    soft_limit: usize,
}

impl TokenCoordinator {
    pub fn new(
        store: Arc<ScopedConfigStore>,
        tokens: TokenEndpointClient,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            store,
            tokens,
            providers,
            cache: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            soft_limit: DEFAULT_CACHE_SOFT_LIMIT,
        }
    }

    /// Executor, provider registry and cache bound taken from settings.
    pub fn from_settings(settings: &Settings, store: Arc<ScopedConfigStore>) -> ConnectorResult<Self> {
        let executor = Arc::new(ResilientExecutor::new(&settings.http)?);
        Ok(Self::new(
            store,
            TokenEndpointClient::new(executor),
            Arc::new(ProviderRegistry::from_settings(settings)),
        )
        .with_cache_soft_limit(settings.token_cache_soft_limit))
    }

    pub fn with_cache_soft_limit(mut self, soft_limit: usize) -> Self {
        self.soft_limit = soft_limit.max(1);
        self
    }

    pub fn store(&self) -> &Arc<ScopedConfigStore> {
        &self.store
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn tokens(&self) -> &TokenEndpointClient {
        &self.tokens
    }

    pub fn cache_len(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Return a usable access token, refreshing it if it is stale or `force_refresh` is set.
    ///
    /// `account_id = None` means the connector's active account.
    pub async fn get_valid_token(
        &self,
        scope: &ConfigScope,
        connector: &ConnectorKind,
        account_id: Option<&str>,
        force_refresh: bool,
        cancel: Option<&CancellationToken>,
    ) -> CoreResult<String> {
        let user_id = self.store.authorize(scope).await?;
        if let Some(id) = account_id.filter(|id| !id.trim().is_empty()) {
            return self
                .token_for(scope, &user_id, connector, id, force_refresh, cancel)
                .await;
        }

        let account_id = self.resolve_active(scope, &user_id, connector).await?;
        match self
            .token_for(scope, &user_id, connector, &account_id, force_refresh, cancel)
            .await
        {
            // The remembered selection was disabled or removed by another writer;
            // the stored document has already moved `activeAccountId` on.
            Err(e) if matches!(e.kind(), ErrorKind::NotConnected | ErrorKind::AccountNotFound) => {
                self.forget_active(&user_id, connector, &account_id);
                let reselected = self.resolve_active(scope, &user_id, connector).await?;
                if reselected == account_id {
                    return Err(e);
                }
                debug!(
                    target: "nova::oauth",
                    user_id = %user_id,
                    connector = %connector,
                    previous = %account_id,
                    account_id = %reselected,
                    "active account changed in store"
                );
                self.token_for(scope, &user_id, connector, &reselected, force_refresh, cancel)
                    .await
            }
            other => other,
        }
    }

    async fn token_for(
        &self,
        scope: &ConfigScope,
        user_id: &str,
        connector: &ConnectorKind,
        account_id: &str,
        force_refresh: bool,
        cancel: Option<&CancellationToken>,
    ) -> CoreResult<String> {
        let key = token_key(user_id, connector, account_id);

        if !force_refresh {
            if let Some(token) = self.cached(&key) {
                return Ok(token);
            }
        }

        loop {
            match self.register(&key) {
                Role::Follower(rx) => {
                    let received = match cancel {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                return Err(CoreError::Cancelled("waiting for token refresh".to_string()));
                            }
                            received = rx => received,
                        },
                        None => rx.await,
                    };
                    match received {
                        Ok(result) => {
                            debug!(target: "nova::oauth", key = %key, "joined in-flight refresh");
                            return result;
                        }
                        Err(_) => {
                            debug!(target: "nova::oauth", key = %key, "refresh leader went away, re-entering");
                            continue;
                        }
                    }
                }
                Role::Leader(guard) => {
                    let result = self
                        .refresh_account(scope, user_id, connector, account_id, force_refresh, cancel)
                        .await;
                    match &result {
                        // Our own cancellation says nothing about the account; let a follower retry.
                        Err(e) if e.kind() == ErrorKind::Cancelled => drop(guard),
                        _ => guard.finish(&result),
                    }
                    return result;
                }
            }
        }
    }

    /// Evict cached tokens. Without an account id every account of the connector is evicted.
    pub fn invalidate(&self, user_id: &str, connector: &ConnectorKind, account_id: Option<&str>) {
        lock(&self.active).remove(&active_key(user_id, connector));
        let mut cache = lock(&self.cache);
        match account_id {
            Some(id) => {
                cache.remove(&token_key(user_id, connector, id));
            }
            None => {
                let prefix = format!("{}:", active_key(user_id, connector));
                cache.retain(|key, _| !key.starts_with(&prefix));
            }
        }
        debug!(target: "nova::oauth", user_id, connector = %connector, "token cache invalidated");
    }

    /// Drop a remembered selection and its token once the store says the account is unusable.
    fn forget_active(&self, user_id: &str, connector: &ConnectorKind, account_id: &str) {
        let key = active_key(user_id, connector);
        let mut active = lock(&self.active);
        if active.get(&key).map(String::as_str) == Some(account_id) {
            active.remove(&key);
        }
        drop(active);
        lock(&self.cache).remove(&token_key(user_id, connector, account_id));
    }

    fn register(&self, key: &str) -> Role {
        let mut inflight = lock(&self.inflight);
        if let Some(waiters) = inflight.get_mut(key) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Role::Follower(rx);
        }
        inflight.insert(key.to_string(), Vec::new());
        Role::Leader(InflightGuard {
            key: key.to_string(),
            inflight: self.inflight.clone(),
            finished: false,
        })
    }

    fn cached(&self, key: &str) -> Option<String> {
        let cache = lock(&self.cache);
        cache
            .get(key)
            .filter(|entry| entry.expires_at_ms > now_ms() + STALE_MARGIN_MS)
            .map(|entry| entry.token.clone())
    }

    fn remember(&self, key: &str, token: &str, expires_at_ms: i64) {
        let mut cache = lock(&self.cache);
        cache.insert(
            key.to_string(),
            CachedToken {
                token: token.to_string(),
                expires_at_ms,
            },
        );
        if cache.len() > self.soft_limit {
            let now = now_ms();
            let before = cache.len();
            cache.retain(|_, entry| entry.expires_at_ms > now);
            debug!(target: "nova::oauth", purged = before - cache.len(), "purged expired tokens");
        }
    }

    async fn resolve_active(
        &self,
        scope: &ConfigScope,
        user_id: &str,
        connector: &ConnectorKind,
    ) -> CoreResult<String> {
        let key = active_key(user_id, connector);
        if let Some(id) = lock(&self.active).get(&key).cloned() {
            return Ok(id);
        }
        let document = self.store.load(scope).await?;
        let block = document
            .connector(connector)
            .ok_or_else(|| CoreError::NotConnected(format!("{} is not connected", connector)))?;
        let account = block.resolve_account(None)?;
        if !account.enabled {
            return Err(CoreError::NotConnected(format!(
                "{} has no enabled account",
                connector
            )));
        }
        lock(&self.active).insert(key, account.id.clone());
        Ok(account.id.clone())
    }

    async fn refresh_account(
        &self,
        scope: &ConfigScope,
        user_id: &str,
        connector: &ConnectorKind,
        account_id: &str,
        force_refresh: bool,
        cancel: Option<&CancellationToken>,
    ) -> CoreResult<String> {
        let key = token_key(user_id, connector, account_id);
        let (document, report) = self.store.load_with_report(scope).await?;
        let (block, account) = match usable_account(&document, connector, account_id) {
            Ok(found) => found,
            Err(e) => {
                lock(&self.cache).remove(&key);
                return Err(e);
            }
        };

        // Another process may have refreshed since our cache entry went stale.
        if !force_refresh && account.has_fresh_token(now_ms(), STALE_MARGIN_MS) {
            debug!(target: "nova::oauth", user_id, connector = %connector, account_id, "stored token is fresh");
            self.remember(&key, &account.access_token, account.token_expiry);
            return Ok(account.access_token.clone());
        }

        if account.refresh_token.is_empty() {
            let path = format!("connectors.{}.accounts.{}.refreshToken", connector, account_id);
            let detail = if report.corrupted.contains(&path) {
                "stored refresh token could not be decrypted"
            } else {
                "no refresh token stored"
            };
            warn!(target: "nova::oauth", user_id, connector = %connector, account_id, detail, "cannot refresh");
            return Err(CoreError::TokenMissing(detail.to_string()));
        }

        let provider = self.providers.resolve(connector, Some(block))?;
        info!(
            target: "nova::oauth",
            user_id,
            connector = %connector,
            account_id,
            forced = force_refresh,
            "refreshing access token"
        );
        let token = match self.tokens.refresh(&provider, &account.refresh_token, cancel).await {
            Ok(token) => token,
            Err(e) => {
                let err = CoreError::from(e);
                warn!(
                    target: "nova::oauth",
                    user_id,
                    connector = %connector,
                    account_id,
                    kind = %err.kind(),
                    "token refresh failed"
                );
                return Err(err);
            }
        };

        let expires_at = token.expiry_ms(now_ms());
        let access_token = token.access_token.clone();
        let rotated = token.rotated_refresh_token().map(str::to_string);
        let rotated_flag = rotated.is_some();
        self.store
            .update_with(&scope.as_service(ServiceReason::TokenRefresh), |doc| {
                let account = doc
                    .connector_mut(connector)
                    .account_mut(account_id)
                    .ok_or_else(|| {
                        CoreError::AccountNotFound(format!(
                            "account '{}' was removed during refresh",
                            account_id
                        ))
                    })?;
                account.access_token = access_token;
                account.token_expiry = expires_at;
                if let Some(refresh_token) = rotated {
                    account.refresh_token = refresh_token;
                }
                Ok(())
            })
            .await?;

        info!(
            target: "nova::oauth",
            user_id,
            connector = %connector,
            account_id,
            expires_at,
            rotated = rotated_flag,
            "access token refreshed"
        );
        self.remember(&key, &token.access_token, expires_at);
        Ok(token.access_token)
    }
}
