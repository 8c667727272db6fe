//! Local filesystem artifact store.

use async_trait::async_trait;
use figura_core::error::FiguraError;
use figura_core::store::{ArtifactStore, StoredObject};
use figura_core::types::StoreInfo;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Writes objects under a root directory and serves them from a public base
/// URL. Writes go to a temporary sibling first and are renamed into place,
/// so readers never observe a partial object.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
    base_url: String,
    info: Arc<StoreInfo>,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            info: Arc::new(StoreInfo {
                id: "fs".to_string(),
                name: "Filesystem".to_string(),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a key, refusing anything that would leave the root
    pub fn path_for(&self, key: &str) -> Result<PathBuf, FiguraError> {
        let relative = Path::new(key);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !plain {
            return Err(FiguraError::validation(format!(
                "storage key escapes the store root: {:?}",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    fn info(&self) -> Arc<StoreInfo> {
        self.info.clone()
    }

    async fn put(&self, object: StoredObject) -> Result<(), FiguraError> {
        let path = self.path_for(&object.key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let staging = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        tokio::fs::write(&staging, object.bytes.as_slice()).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        tracing::debug!("stored {} ({} bytes)", path.display(), object.bytes.len());
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figura_core::types::PNG_CONTENT_TYPE;

    fn object(key: &str, bytes: &[u8]) -> StoredObject {
        StoredObject {
            key: key.to_string(),
            bytes: Arc::new(bytes.to_vec()),
            content_type: PNG_CONTENT_TYPE.to_string(),
        }
    }

    #[tokio::test]
    async fn test_put_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), "https://static.example.com");
        let key = "asg-3/diagrams/abc.png";

        store.put(object(key, b"first")).await.unwrap();
        store.put(object(key, b"second")).await.unwrap();

        let stored = std::fs::read(dir.path().join(key)).unwrap();
        assert_eq!(stored, b"second");
        let entries = std::fs::read_dir(dir.path().join("asg-3/diagrams"))
            .unwrap()
            .count();
        assert_eq!(entries, 1);
        assert_eq!(
            store.url_for(key),
            "https://static.example.com/asg-3/diagrams/abc.png"
        );
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), "https://static.example.com");

        for key in ["../evil.png", "/etc/evil.png", ""] {
            let err = store.put(object(key, b"x")).await.unwrap_err();
            assert!(matches!(err, FiguraError::Validation(_)), "{key}");
        }
    }
}
