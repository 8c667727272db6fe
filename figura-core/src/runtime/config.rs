//! Pipeline configuration.

use crate::store::UploadRetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Default number of specs rendered concurrently.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Runtime settings for a [`Pipeline`](crate::runtime::Pipeline).
///
/// Established once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Specs rendered concurrently in a batch
    pub concurrency: usize,
    /// Slots shared by network-bound tiers and uploads
    pub io_slots: usize,
    /// Upper bound for a single tier attempt
    pub tier_timeout_ms: u64,
    /// Upper bound for persisting one diagram, retries included
    pub store_timeout_ms: u64,
    /// Backoff for transient upload failures, applied inside the store client
    pub upload_retry: UploadRetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            io_slots: 8,
            tier_timeout_ms: 180_000,
            store_timeout_ms: 60_000,
            upload_retry: UploadRetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_io_slots(mut self, io_slots: usize) -> Self {
        self.io_slots = io_slots;
        self
    }

    pub fn with_tier_timeout(mut self, timeout: Duration) -> Self {
        self.tier_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_upload_retry(mut self, policy: UploadRetryPolicy) -> Self {
        self.upload_retry = policy;
        self
    }

    pub fn tier_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
