use crate::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// A user document exactly as persisted: secret fields are envelopes.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub document: JsonValue,
    pub updated_at: DateTime<Utc>,
}

/// Durable per-user document storage. Implementations know nothing about
/// encryption or merging; the scoped store layers both on top.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Fetch the stored document for a user
    async fn fetch(&self, user_id: &str) -> CoreResult<Option<StoredDocument>>;
    /// Insert or replace the document for a user
    async fn persist(&self, user_id: &str, document: &StoredDocument) -> CoreResult<()>;
    /// Delete a user's document, returns true if deleted
    async fn delete(&self, user_id: &str) -> CoreResult<bool>;
    /// List every user id that has a document
    async fn list_user_ids(&self) -> CoreResult<Vec<String>>;
}

/// Checks that a credential presented in a user scope belongs to that user.
#[async_trait]
pub trait ScopeVerifier: Send + Sync {
    async fn verify(&self, user_id: &str, credential: &str) -> CoreResult<bool>;
}
