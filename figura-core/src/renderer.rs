//! Renderer trait and the tier registry.

use crate::error::FiguraError;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Core renderer trait for rendering tiers.
///
/// Each implementation serves exactly one [`Tier`]. A renderer turns a
/// [`RenderRequest`] into image bytes or a typed failure; it never retries
/// or falls back on its own, that is the coordinator's job.
#[async_trait]
pub trait Renderer: Send + Sync + Debug + 'static {
    /// Get renderer information
    fn info(&self) -> Arc<RendererInfo>;

    /// Render a single request
    async fn render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError>;
}

/// Type-erased renderer that can be shared across tasks
pub type BoxedRenderer = Arc<dyn Renderer>;

/// Registry of renderers keyed by the tier they serve
#[derive(Debug, Clone, Default)]
pub struct RendererSet {
    renderers: HashMap<Tier, BoxedRenderer>,
}

impl RendererSet {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a renderer under its own tier, replacing any previous one
    pub fn insert(&mut self, renderer: BoxedRenderer) {
        let tier = renderer.info().tier;
        if self.renderers.insert(tier, renderer).is_some() {
            tracing::debug!("replaced renderer for tier {}", tier);
        }
    }

    /// Renderer serving `tier`, if configured
    pub fn get(&self, tier: Tier) -> Option<&BoxedRenderer> {
        self.renderers.get(&tier)
    }

    /// Tiers that have a renderer
    pub fn tiers(&self) -> impl Iterator<Item = Tier> + '_ {
        self.renderers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.renderers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renderers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(Tier, &'static str);

    #[async_trait]
    impl Renderer for Fixed {
        fn info(&self) -> Arc<RendererInfo> {
            Arc::new(RendererInfo {
                name: self.1.to_string(),
                tier: self.0,
                pool: ResourcePool::Process,
            })
        }

        async fn render(&self, _req: RenderRequest) -> Result<RenderedImage, FiguraError> {
            Ok(RenderedImage::png(vec![1]))
        }
    }

    #[test]
    fn test_insert_replaces_same_tier() {
        let mut set = RendererSet::new();
        set.insert(Arc::new(Fixed(Tier::Plot, "first")));
        set.insert(Arc::new(Fixed(Tier::Plot, "second")));
        set.insert(Arc::new(Fixed(Tier::Svg, "svg")));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get(Tier::Plot).unwrap().info().name, "second");
        assert!(set.get(Tier::AiImage).is_none());
    }
}
