//! In-memory artifact store.

use async_trait::async_trait;
use dashmap::DashMap;
use figura_core::error::FiguraError;
use figura_core::store::{ArtifactStore, StoredObject};
use figura_core::types::StoreInfo;
use std::sync::Arc;

/// Keeps objects in a concurrent map. Clones share the same objects.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    objects: Arc<DashMap<String, StoredObject>>,
    base_url: String,
    info: Arc<StoreInfo>,
}

impl MemoryStore {
    /// Create a store whose URLs start with `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            info: Arc::new(StoreInfo {
                id: "memory".to_string(),
                name: "Memory".to_string(),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory://figura")
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    fn info(&self) -> Arc<StoreInfo> {
        self.info.clone()
    }

    async fn put(&self, object: StoredObject) -> Result<(), FiguraError> {
        self.objects.insert(object.key.clone(), object);
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}
