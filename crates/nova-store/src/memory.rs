use async_trait::async_trait;
use nova_core::{ConfigBackend, CoreResult, StoredDocument};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of ConfigBackend for testing
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigBackend {
    data: Arc<RwLock<HashMap<String, StoredDocument>>>,
}

impl MemoryConfigBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigBackend for MemoryConfigBackend {
    async fn fetch(&self, user_id: &str) -> CoreResult<Option<StoredDocument>> {
        let data = self.data.read().await;
        Ok(data.get(user_id).cloned())
    }

    async fn persist(&self, user_id: &str, document: &StoredDocument) -> CoreResult<()> {
        let mut data = self.data.write().await;
        data.insert(user_id.to_string(), document.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> CoreResult<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(user_id).is_some())
    }

    async fn list_user_ids(&self) -> CoreResult<Vec<String>> {
        let data = self.data.read().await;
        let mut ids: Vec<String> = data.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
