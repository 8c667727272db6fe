//! Retry layer for stores used outside a pipeline.
//!
//! A [`Pipeline`](figura_core::Pipeline) already retries uploads through its
//! store client. This layer gives the same backoff to code that calls an
//! [`ArtifactStore`] directly, e.g. re-uploading a cached diagram.

use async_trait::async_trait;
use figura_core::error::FiguraError;
use figura_core::layer::{LayeredStore, StoreLayer};
use figura_core::store::{ArtifactStore, StoredObject, UploadRetryPolicy};
use figura_core::types::*;
use std::sync::Arc;
use std::time::Duration;

/// Store layer applying an [`UploadRetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryLayer {
    policy: UploadRetryPolicy,
}

impl RetryLayer {
    /// Three retries, 100ms doubling up to 10s
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing policy, e.g. the one from `PipelineConfig`
    pub fn from_policy(policy: UploadRetryPolicy) -> Self {
        Self { policy }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.policy = self.policy.with_max_retries(max_retries);
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.policy = self.policy.with_initial_delay(initial_delay);
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.policy = self.policy.with_max_delay(max_delay);
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy = self.policy.with_backoff_multiplier(multiplier);
        self
    }

    pub fn policy(&self) -> &UploadRetryPolicy {
        &self.policy
    }
}

impl<S: ArtifactStore> StoreLayer<S> for RetryLayer {
    type LayeredStore = RetryStore<S>;

    fn layer_store(&self, inner: S) -> Self::LayeredStore {
        RetryStore {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Store wrapped with retry logic.
///
/// Non-retryable errors are returned as they are. Once the retries are
/// spent the last transient error is surfaced as [`FiguraError::Upload`].
#[derive(Debug)]
pub struct RetryStore<S> {
    inner: S,
    policy: UploadRetryPolicy,
}

#[async_trait]
impl<S: ArtifactStore> LayeredStore for RetryStore<S> {
    type Inner = S;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_put(&self, object: StoredObject) -> Result<(), FiguraError> {
        let key = object.key.clone();
        self.policy
            .run(&key, || self.inner.put(object.clone()))
            .await
    }
}

#[async_trait]
impl<S: ArtifactStore> ArtifactStore for RetryStore<S> {
    fn info(&self) -> Arc<StoreInfo> {
        LayeredStore::layered_info(self)
    }

    async fn put(&self, object: StoredObject) -> Result<(), FiguraError> {
        LayeredStore::layered_put(self, object).await
    }

    fn url_for(&self, key: &str) -> String {
        LayeredStore::layered_url_for(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
        permanent: bool,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                permanent: false,
            }
        }
    }

    #[async_trait]
    impl ArtifactStore for Flaky {
        fn info(&self) -> Arc<StoreInfo> {
            Arc::new(StoreInfo {
                id: "flaky".to_string(),
                name: "Flaky".to_string(),
            })
        }

        async fn put(&self, _object: StoredObject) -> Result<(), FiguraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(FiguraError::validation("object rejected"));
            }
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(FiguraError::storage("503 Service Unavailable"));
            }
            Ok(())
        }

        fn url_for(&self, key: &str) -> String {
            format!("mem://{}", key)
        }
    }

    fn object() -> StoredObject {
        StoredObject {
            key: "asg/diagrams/x.png".to_string(),
            bytes: Arc::new(vec![1, 2, 3]),
            content_type: PNG_CONTENT_TYPE.to_string(),
        }
    }

    #[test]
    fn test_builders_shape_the_policy() {
        let layer = RetryLayer::new()
            .with_max_retries(5)
            .with_initial_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_millis(300));
        assert_eq!(layer.policy().max_retries, 5);
        assert_eq!(layer.policy().backoff(0), Duration::from_millis(50));
        assert_eq!(layer.policy().backoff(3), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failures() {
        let store = RetryLayer::new().layer_store(Flaky::new(2));

        store.put(object()).await.unwrap();
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_with_upload_error() {
        let store = RetryLayer::new().layer_store(Flaky::new(10));

        let err = store.put(object()).await.unwrap_err();
        assert!(matches!(err, FiguraError::Upload(_)));
        // One initial attempt plus three retries.
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        let mut flaky = Flaky::new(0);
        flaky.permanent = true;
        let store = RetryLayer::new().layer_store(flaky);

        let err = store.put(object()).await.unwrap_err();
        assert!(matches!(err, FiguraError::Validation(_)));
        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 1);
    }
}
