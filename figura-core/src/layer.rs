//! Layer traits and abstractions.
//!
//! Layers wrap a renderer or a store with cross-cutting concerns like
//! logging and retry. Each layer consumes the inner value and returns a new
//! one implementing the same trait, so layers stack with static dispatch.

use crate::error::FiguraError;
use crate::renderer::Renderer;
use crate::store::{ArtifactStore, StoredObject};
use crate::types::*;
use async_trait::async_trait;
use std::sync::Arc;

/// Layer trait for wrapping renderers.
pub trait Layer<R: Renderer> {
    /// The type of the layered renderer
    type LayeredRenderer: Renderer;

    /// Wrap the inner renderer with this layer
    fn layer(&self, inner: R) -> Self::LayeredRenderer;
}

/// Layer trait for wrapping artifact stores.
pub trait StoreLayer<S: ArtifactStore> {
    /// The type of the layered store
    type LayeredStore: ArtifactStore;

    /// Wrap the inner store with this layer
    fn layer_store(&self, inner: S) -> Self::LayeredStore;
}

/// Helper trait for layered renderers.
///
/// Provides default forwarding implementations; implementers only override
/// the methods they want to intercept.
#[async_trait]
pub trait LayeredRenderer: Sized + Renderer {
    /// The inner renderer type
    type Inner: Renderer;

    /// Get a reference to the inner renderer
    fn inner(&self) -> &Self::Inner;

    /// Default implementation for info - forwards to inner
    fn layered_info(&self) -> Arc<RendererInfo> {
        self.inner().info()
    }

    /// Default implementation for render - forwards to inner
    async fn layered_render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        self.inner().render(req).await
    }
}

/// Helper trait for layered stores.
#[async_trait]
pub trait LayeredStore: Sized + ArtifactStore {
    /// The inner store type
    type Inner: ArtifactStore;

    /// Get a reference to the inner store
    fn inner(&self) -> &Self::Inner;

    /// Default implementation for info - forwards to inner
    fn layered_info(&self) -> Arc<StoreInfo> {
        self.inner().info()
    }

    /// Default implementation for put - forwards to inner
    async fn layered_put(&self, object: StoredObject) -> Result<(), FiguraError> {
        self.inner().put(object).await
    }

    /// Default implementation for url_for - forwards to inner
    fn layered_url_for(&self, key: &str) -> String {
        self.inner().url_for(key)
    }
}
