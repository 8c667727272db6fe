//! Artifact store trait and the diagram store client.
//!
//! Backends only know how to write bytes under a key. [`DiagramStore`] owns
//! the addressing scheme: the key is derived from the assignment and question
//! index alone, so rendering the same question twice overwrites the object.

use crate::error::FiguraError;
use crate::types::*;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Namespace for diagram file ids (UUIDv5).
const DIAGRAM_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b4e_9d3a_4c1f_8e57_a0b2_c3d4_e5f6);

/// An object to be written to storage
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Arc<Vec<u8>>,
    pub content_type: String,
}

/// Storage backend trait.
///
/// `put` must overwrite any object already stored under the same key.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug + 'static {
    /// Get store information
    fn info(&self) -> Arc<StoreInfo>;

    /// Write an object, replacing any previous object with the same key
    async fn put(&self, object: StoredObject) -> Result<(), FiguraError>;

    /// Public URL for a key
    fn url_for(&self, key: &str) -> String;
}

/// Type-erased store
pub type BoxedStore = Arc<dyn ArtifactStore>;

/// Backoff schedule for transient upload failures.
///
/// Only errors reporting [`FiguraError::is_retryable`] are retried. Once the
/// retries are spent the last error is surfaced as [`FiguraError::Upload`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct UploadRetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for UploadRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl UploadRetryPolicy {
    /// A single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Wait before the zero-based `retry`, capped at `max_delay_ms`
    pub fn backoff(&self, retry: u32) -> Duration {
        let ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);
        Duration::from_millis(ms.min(self.max_delay_ms as f64) as u64)
    }

    /// Drive `put` until it succeeds, fails permanently or runs out of retries
    pub async fn run<F, Fut>(&self, key: &str, mut put: F) -> Result<(), FiguraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), FiguraError>>,
    {
        let mut retry = 0;
        loop {
            let err = match put().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };
            if retry >= self.max_retries {
                return Err(FiguraError::upload(format!(
                    "gave up on {} after {} attempt(s): {}",
                    key,
                    retry + 1,
                    err
                )));
            }

            let delay = self.backoff(retry);
            tracing::debug!(
                "upload of {} failed: {}; retry {}/{} in {:?}",
                key,
                err,
                retry + 1,
                self.max_retries,
                delay
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

/// Reject assignment ids that would not stay a single key segment
pub fn check_assignment_id(assignment_id: &str) -> Result<(), FiguraError> {
    let invalid = assignment_id.trim().is_empty()
        || assignment_id.contains(&['/', '\\'][..])
        || assignment_id.contains("..")
        || assignment_id.chars().any(char::is_control);
    if invalid {
        return Err(FiguraError::validation(format!(
            "assignment id {:?} is not a valid key segment",
            assignment_id
        )));
    }
    Ok(())
}

/// Deterministic file id for a question's diagram
pub fn file_id(assignment_id: &str, question_index: u32) -> String {
    let name = format!("{}:{}", assignment_id, question_index);
    Uuid::new_v5(&DIAGRAM_NAMESPACE, name.as_bytes()).to_string()
}

/// Storage key `{assignmentId}/diagrams/{fileId}.png`
pub fn storage_key(assignment_id: &str, question_index: u32) -> String {
    format!(
        "{}/diagrams/{}.png",
        assignment_id,
        file_id(assignment_id, question_index)
    )
}

/// Client that persists rendered diagrams and builds their descriptors
#[derive(Debug, Clone)]
pub struct DiagramStore {
    inner: BoxedStore,
    retry: UploadRetryPolicy,
}

impl DiagramStore {
    /// Wrap a (possibly layered) backend with the default retry policy
    pub fn new(inner: BoxedStore) -> Self {
        Self {
            inner,
            retry: UploadRetryPolicy::default(),
        }
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: UploadRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Backend information
    pub fn info(&self) -> Arc<StoreInfo> {
        self.inner.info()
    }

    /// Persist image bytes for a question.
    ///
    /// Transient backend failures are retried under the store's
    /// [`UploadRetryPolicy`]; whatever still fails surfaces as
    /// [`FiguraError::Upload`].
    pub async fn put(
        &self,
        image: RenderedImage,
        assignment_id: &str,
        question_index: u32,
    ) -> Result<DiagramDescriptor, FiguraError> {
        check_assignment_id(assignment_id)?;
        if image.bytes.is_empty() {
            return Err(FiguraError::validation("refusing to store an empty image"));
        }

        let file_id = file_id(assignment_id, question_index);
        let key = storage_key(assignment_id, question_index);
        let size_bytes = image.bytes.len() as u64;

        let object = StoredObject {
            key: key.clone(),
            bytes: Arc::new(image.bytes),
            content_type: image.content_type.clone(),
        };

        self.retry
            .run(&key, || self.inner.put(object.clone()))
            .await
            .map_err(|e| match e {
                FiguraError::Upload(_) => e,
                other => FiguraError::upload(other.to_string()),
            })?;

        Ok(DiagramDescriptor {
            filename: format!("{}.png", file_id),
            url: self.inner.url_for(&key),
            file_id,
            storage_key: key,
            content_type: image.content_type,
            size_bytes,
        })
    }
}
