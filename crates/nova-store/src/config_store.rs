//! Scoped, serialized access to per-user configuration documents
//!
//! Every read decrypts secret fields and every write re-seals them under the
//! primary key. Writes for one user run one at a time through [`KeyedLock`]
//! so concurrent partial updates never lose each other's fields.

use chrono::Utc;
use nova_core::{
    ConfigBackend, ConfigScope, CoreError, CoreResult, ScopeVerifier, StoredDocument,
    UserConfigDocument,
};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::encryption::{KeyUsed, SecretCodec, SecretState};
use crate::error::StoreError;
use crate::lock::KeyedLock;
use crate::merge::merge_json;

/// What a read found out about the stored secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Secret paths no configured key could open; they read as empty
    pub corrupted: Vec<String>,
    /// Secret paths stored as plaintext or readable only with a fallback key
    pub stale: Vec<String>,
    /// Whether stale paths were re-sealed under the primary key by this call
    pub ratcheted: bool,
}

impl LoadReport {
    pub fn needs_ratchet(&self) -> bool {
        !self.stale.is_empty()
    }
}

struct Opened {
    document: UserConfigDocument,
    report: LoadReport,
    /// Original envelopes of corrupted paths, restored on write unless replaced
    corrupted_raw: HashMap<String, String>,
}

pub struct ScopedConfigStore {
    backend: Arc<dyn ConfigBackend>,
    codec: Arc<SecretCodec>,
    verifier: Option<Arc<dyn ScopeVerifier>>,
    locks: KeyedLock,
    ratchet_on_read: bool,
}

impl ScopedConfigStore {
    pub fn new(backend: Arc<dyn ConfigBackend>, codec: Arc<SecretCodec>) -> Self {
        Self {
            backend,
            codec,
            verifier: None,
            locks: KeyedLock::new(),
            ratchet_on_read: true,
        }
    }

    /// Verifier for `ConfigScope::User` credentials. Without one, user scopes are rejected.
    pub fn with_verifier(mut self, verifier: Arc<dyn ScopeVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_ratchet_on_read(mut self, enabled: bool) -> Self {
        self.ratchet_on_read = enabled;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ConfigBackend> {
        &self.backend
    }

    pub fn codec(&self) -> &Arc<SecretCodec> {
        &self.codec
    }

    /// Check a scope without touching the backend; returns the trimmed user id.
    pub async fn authorize(&self, scope: &ConfigScope) -> CoreResult<String> {
        let user_id = scope.user_id().trim();
        if user_id.is_empty() {
            return Err(StoreError::Unauthorized("scope has no user id".to_string()).into());
        }
        match scope {
            ConfigScope::User { credential, .. } => {
                if credential.is_empty() {
                    return Err(StoreError::Unauthorized("empty user credential".to_string()).into());
                }
                let verifier = self.verifier.as_ref().ok_or_else(|| {
                    StoreError::Unauthorized("no verifier configured for user scopes".to_string())
                })?;
                if !verifier.verify(user_id, credential).await? {
                    warn!(target: "nova::store", scope = %scope.describe(), "user credential rejected");
                    return Err(StoreError::Unauthorized(format!(
                        "credential rejected for user {}",
                        user_id
                    ))
                    .into());
                }
            }
            ConfigScope::Service { reason, .. } => {
                debug!(target: "nova::store", user_id, reason = reason.as_str(), "service scope access");
            }
        }
        Ok(user_id.to_string())
    }

    fn open(&self, stored: Option<StoredDocument>) -> CoreResult<Opened> {
        let Some(stored) = stored else {
            return Ok(Opened {
                document: UserConfigDocument::default(),
                report: LoadReport::default(),
                corrupted_raw: HashMap::new(),
            });
        };

        let mut document: UserConfigDocument = serde_json::from_value(stored.document)?;
        document.updated_at = Some(stored.updated_at);

        let mut report = LoadReport::default();
        let mut corrupted_raw = HashMap::new();
        let codec = &self.codec;
        document.visit_secrets_mut(|path, value| match codec.decrypt(value) {
            Some(opened) => {
                if matches!(opened.key, KeyUsed::Legacy | KeyUsed::Fallback(_)) {
                    report.stale.push(path.to_string());
                }
                *value = opened.plaintext;
            }
            None => {
                warn!(target: "nova::store", path, "secret could not be decrypted, treating as missing");
                report.corrupted.push(path.to_string());
                corrupted_raw.insert(path.to_string(), std::mem::take(value));
            }
        });
        document.normalize();

        Ok(Opened {
            document,
            report,
            corrupted_raw,
        })
    }

    fn seal(
        &self,
        document: &UserConfigDocument,
        corrupted_raw: &HashMap<String, String>,
    ) -> CoreResult<JsonValue> {
        let mut sealed = document.clone();
        let mut failure = None;
        let codec = &self.codec;
        sealed.visit_secrets_mut(|path, value| {
            if failure.is_some() {
                return;
            }
            if value.is_empty() {
                if let Some(raw) = corrupted_raw.get(path) {
                    *value = raw.clone();
                }
                return;
            }
            match codec.seal(value) {
                Ok(v) => *value = v,
                Err(e) => failure = Some(e),
            }
        });
        if let Some(e) = failure {
            return Err(StoreError::Codec(e).into());
        }
        Ok(serde_json::to_value(&sealed)?)
    }

    /// Read-modify-write under the user's lock.
    async fn modify<R, F>(
        &self,
        user_id: &str,
        mutate: F,
    ) -> CoreResult<(UserConfigDocument, R, LoadReport)>
    where
        F: FnOnce(&mut UserConfigDocument) -> CoreResult<R> + Send,
        R: Send,
    {
        let _guard = self.locks.acquire(user_id).await;

        let Opened {
            mut document,
            report,
            corrupted_raw,
        } = self.open(self.backend.fetch(user_id).await?)?;

        let out = mutate(&mut document)?;

        document.normalize();
        let now = Utc::now();
        document.updated_at = Some(now);
        let sealed = self.seal(&document, &corrupted_raw)?;
        self.backend
            .persist(
                user_id,
                &StoredDocument {
                    document: sealed,
                    updated_at: now,
                },
            )
            .await?;

        debug!(target: "nova::store", user_id, "configuration persisted");
        Ok((document, out, report))
    }

    /// Read the decrypted document; missing users read as an empty document.
    pub async fn load(&self, scope: &ConfigScope) -> CoreResult<UserConfigDocument> {
        self.load_with_report(scope).await.map(|(doc, _)| doc)
    }

    pub async fn load_with_report(
        &self,
        scope: &ConfigScope,
    ) -> CoreResult<(UserConfigDocument, LoadReport)> {
        let user_id = self.authorize(scope).await?;
        let opened = self.open(self.backend.fetch(&user_id).await?)?;

        if !(self.ratchet_on_read && opened.report.needs_ratchet()) {
            return Ok((opened.document, opened.report));
        }

        match self.modify(&user_id, |_| Ok(())).await {
            Ok((document, (), mut report)) => {
                info!(
                    target: "nova::store",
                    user_id = %user_id,
                    fields = report.stale.len(),
                    "re-sealed stale secrets under the primary key"
                );
                report.ratcheted = true;
                Ok((document, report))
            }
            Err(e) => {
                warn!(target: "nova::store", user_id = %user_id, error = %e, "ratchet on read failed");
                Ok((opened.document, opened.report))
            }
        }
    }

    /// Replace the whole document.
    pub async fn save(
        &self,
        document: UserConfigDocument,
        scope: &ConfigScope,
    ) -> CoreResult<UserConfigDocument> {
        let user_id = self.authorize(scope).await?;
        let (saved, (), _) = self
            .modify(&user_id, move |doc| {
                *doc = document;
                Ok(())
            })
            .await?;
        Ok(saved)
    }

    /// Merge a partial JSON document into the stored one.
    pub async fn update(
        &self,
        patch: &JsonValue,
        scope: &ConfigScope,
    ) -> CoreResult<UserConfigDocument> {
        if !patch.is_object() {
            return Err(CoreError::InvalidRequest(
                "configuration patch must be a JSON object".to_string(),
            ));
        }
        let user_id = self.authorize(scope).await?;
        let (updated, (), _) = self
            .modify(&user_id, |doc| {
                let mut current = serde_json::to_value(&*doc)?;
                merge_json(&mut current, patch);
                *doc = serde_json::from_value(current).map_err(|e| {
                    CoreError::InvalidRequest(format!("patch does not fit the document: {}", e))
                })?;
                Ok(())
            })
            .await?;
        Ok(updated)
    }

    /// Typed read-modify-write. Nothing is persisted when `mutate` fails.
    pub async fn update_with<R, F>(
        &self,
        scope: &ConfigScope,
        mutate: F,
    ) -> CoreResult<(UserConfigDocument, R)>
    where
        F: FnOnce(&mut UserConfigDocument) -> CoreResult<R> + Send,
        R: Send,
    {
        let user_id = self.authorize(scope).await?;
        let (document, out, _) = self.modify(&user_id, mutate).await?;
        Ok((document, out))
    }

    pub async fn delete(&self, scope: &ConfigScope) -> CoreResult<bool> {
        let user_id = self.authorize(scope).await?;
        let _guard = self.locks.acquire(&user_id).await;
        self.backend.delete(&user_id).await
    }

    /// Re-seal every secret of one user under the primary key.
    pub async fn rekey(&self, scope: &ConfigScope) -> CoreResult<LoadReport> {
        let user_id = self.authorize(scope).await?;
        let (_, (), mut report) = self.modify(&user_id, |_| Ok(())).await?;
        report.ratcheted = report.needs_ratchet();
        Ok(report)
    }

    /// Per-field state of the stored secrets, without decrypting them for the caller.
    pub async fn secret_states(&self, scope: &ConfigScope) -> CoreResult<Vec<(String, SecretState)>> {
        let user_id = self.authorize(scope).await?;
        let Some(stored) = self.backend.fetch(&user_id).await? else {
            return Ok(Vec::new());
        };
        let mut raw: UserConfigDocument = serde_json::from_value(stored.document)?;
        let mut states = Vec::new();
        let codec = &self.codec;
        raw.visit_secrets_mut(|path, value| {
            let state = codec.inspect(value);
            if state != SecretState::Empty {
                states.push((path.to_string(), state));
            }
        });
        Ok(states)
    }
}
