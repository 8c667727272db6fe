//! Logging layer for renderer and store operations.

use async_trait::async_trait;
use figura_core::error::FiguraError;
use figura_core::layer::{Layer, LayeredRenderer, LayeredStore, StoreLayer};
use figura_core::renderer::Renderer;
use figura_core::store::{ArtifactStore, StoredObject};
use figura_core::types::*;
use std::sync::Arc;

/// Logging layer that logs renderer and store operations.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    prefix: String,
}

impl LoggingLayer {
    /// Create a new logging layer
    pub fn new() -> Self {
        Self {
            prefix: "[Figura]".to_string(),
        }
    }

    /// Create a logging layer with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LoggingLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Renderer> Layer<R> for LoggingLayer {
    type LayeredRenderer = LoggingRenderer<R>;

    fn layer(&self, inner: R) -> Self::LayeredRenderer {
        LoggingRenderer {
            inner,
            prefix: self.prefix.clone(),
        }
    }
}

impl<S: ArtifactStore> StoreLayer<S> for LoggingLayer {
    type LayeredStore = LoggingStore<S>;

    fn layer_store(&self, inner: S) -> Self::LayeredStore {
        LoggingStore {
            inner,
            prefix: self.prefix.clone(),
        }
    }
}

/// Renderer wrapped with logging
#[derive(Debug)]
pub struct LoggingRenderer<R> {
    inner: R,
    prefix: String,
}

#[async_trait]
impl<R: Renderer> LayeredRenderer for LoggingRenderer<R> {
    type Inner = R;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        let info = self.inner.info();
        tracing::debug!(
            "{} render request: renderer={}, tier={}, spec={}, regenerated={}",
            self.prefix,
            info.name,
            info.tier,
            req.spec.id,
            req.regenerated
        );

        let start = std::time::Instant::now();
        let result = self.inner.render(req).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(image) => {
                tracing::debug!(
                    "{} render success: renderer={}, bytes={}, elapsed={:?}",
                    self.prefix,
                    info.name,
                    image.bytes.len(),
                    elapsed
                );
            }
            Err(e) => {
                tracing::warn!(
                    "{} render error: renderer={}, error={}, elapsed={:?}",
                    self.prefix,
                    info.name,
                    e,
                    elapsed
                );
            }
        }

        result
    }
}

#[async_trait]
impl<R: Renderer> Renderer for LoggingRenderer<R> {
    fn info(&self) -> Arc<RendererInfo> {
        LayeredRenderer::layered_info(self)
    }

    async fn render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        LayeredRenderer::layered_render(self, req).await
    }
}

/// Store wrapped with logging
#[derive(Debug)]
pub struct LoggingStore<S> {
    inner: S,
    prefix: String,
}

#[async_trait]
impl<S: ArtifactStore> LayeredStore for LoggingStore<S> {
    type Inner = S;

    fn inner(&self) -> &Self::Inner {
        &self.inner
    }

    async fn layered_put(&self, object: StoredObject) -> Result<(), FiguraError> {
        let key = object.key.clone();
        let size = object.bytes.len();
        tracing::debug!("{} put request: key={}, bytes={}", self.prefix, key, size);

        let start = std::time::Instant::now();
        let result = self.inner.put(object).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(()) => {
                tracing::debug!("{} put success: key={}, elapsed={:?}", self.prefix, key, elapsed);
            }
            Err(e) => {
                tracing::error!(
                    "{} put error: key={}, error={:?}, elapsed={:?}",
                    self.prefix,
                    key,
                    e,
                    elapsed
                );
            }
        }

        result
    }
}

#[async_trait]
impl<S: ArtifactStore> ArtifactStore for LoggingStore<S> {
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
