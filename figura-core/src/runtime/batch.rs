//! Pipeline and batch orchestration.

use crate::layer::{Layer, StoreLayer};
use crate::observer::{ObserverEngine, RenderObserver, SpecContext};
use crate::regenerate::{CodeRegenerator, NoRegeneration};
use crate::renderer::{BoxedRenderer, Renderer, RendererSet};
use crate::runtime::cancel::CancellationSignal;
use crate::runtime::config::PipelineConfig;
use crate::runtime::coordinator::{Coordinator, SpecOutcome};
use crate::store::{ArtifactStore, DiagramStore};
use crate::types::*;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Per-call options for [`Pipeline::generate_batch`]
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Overrides the configured concurrency
    pub concurrency: Option<usize>,
    /// Give up on unresolved specs after this long
    pub deadline: Option<Duration>,
    /// Caller-issued cancellation
    pub cancel: Option<CancellationSignal>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, signal: CancellationSignal) -> Self {
        self.cancel = Some(signal);
        self
    }
}

/// Builder for composing a pipeline from renderers, a store and hooks.
///
/// Store layers wrap the store with static dispatch; each call to
/// [`store_layer`](Self::store_layer) produces a new builder type.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder(MemoryStore::new("https://cdn.example"))
///     .store_layer(LoggingLayer::new())
///     .renderer(CodeRenderer::plot(executor.clone()))
///     .renderer(SvgRenderer::new())
///     .finish();
/// ```
pub struct PipelineBuilder<S> {
    store: S,
    renderers: RendererSet,
    regenerator: Arc<dyn CodeRegenerator>,
    observers: Vec<Arc<dyn RenderObserver>>,
    config: PipelineConfig,
}

impl<S: ArtifactStore> PipelineBuilder<S> {
    /// Create a new builder with a store
    pub fn new(store: S) -> Self {
        Self {
            store,
            renderers: RendererSet::new(),
            regenerator: Arc::new(NoRegeneration),
            observers: Vec::new(),
            config: PipelineConfig::default(),
        }
    }

    /// Add a layer to wrap the store
    pub fn store_layer<L>(self, layer: L) -> PipelineBuilder<L::LayeredStore>
    where
        L: StoreLayer<S>,
    {
        PipelineBuilder {
            store: layer.layer_store(self.store),
            renderers: self.renderers,
            regenerator: self.regenerator,
            observers: self.observers,
            config: self.config,
        }
    }

    /// Register a renderer for the tier it serves
    pub fn renderer<R: Renderer>(mut self, renderer: R) -> Self {
        self.renderers.insert(Arc::new(renderer));
        self
    }

    /// Register a renderer wrapped in a layer
    pub fn layered_renderer<R, L>(self, renderer: R, layer: &L) -> Self
    where
        R: Renderer,
        L: Layer<R>,
    {
        self.renderer(layer.layer(renderer))
    }

    /// Register an already shared renderer
    pub fn shared_renderer(mut self, renderer: BoxedRenderer) -> Self {
        self.renderers.insert(renderer);
        self
    }

    /// Set the upstream code regenerator
    pub fn regenerator(mut self, regenerator: Arc<dyn CodeRegenerator>) -> Self {
        self.regenerator = regenerator;
        self
    }

    /// Add an observer
    pub fn observer(mut self, observer: Arc<dyn RenderObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replace the runtime configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default batch concurrency
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Finish building and create a Pipeline
    pub fn finish(self) -> Pipeline {
        if self.renderers.is_empty() {
            tracing::warn!("pipeline built without renderers; every spec will be exhausted");
        }

        Pipeline {
            io_slots: Arc::new(Semaphore::new(self.config.io_slots.max(1))),
            store: DiagramStore::new(Arc::new(self.store))
                .with_retry(self.config.upload_retry.clone()),
            renderers: self.renderers,
            regenerator: self.regenerator,
            observers: ObserverEngine::new(self.observers),
            config: self.config,
        }
    }
}

/// Diagram rendering pipeline.
///
/// Entry point for rendering batches. Holds only immutable configuration and
/// the I/O slot semaphore, so one pipeline can serve concurrent batches.
pub struct Pipeline {
    renderers: RendererSet,
    store: DiagramStore,
    regenerator: Arc<dyn CodeRegenerator>,
    observers: ObserverEngine,
    io_slots: Arc<Semaphore>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new builder
    pub fn builder<S: ArtifactStore>(store: S) -> PipelineBuilder<S> {
        PipelineBuilder::new(store)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn renderers(&self) -> &RendererSet {
        &self.renderers
    }

    fn coordinator(&self) -> Coordinator<'_> {
        Coordinator {
            renderers: &self.renderers,
            store: &self.store,
            regenerator: self.regenerator.as_ref(),
            observers: &self.observers,
            io_slots: &self.io_slots,
            config: &self.config,
        }
    }

    /// Render a single spec through its tier chain
    pub async fn render_one(&self, spec: DiagramSpec) -> SpecOutcome {
        let batch_id = uuid::Uuid::new_v4().to_string();
        let ctx = SpecContext::new(batch_id, &spec);
        self.coordinator().run(spec, ctx).await
    }

    /// Render a batch.
    ///
    /// The result always has one entry per input spec, in input order. A
    /// failing spec fills its slot with an absence marker. On deadline or
    /// cancellation every in-flight spec is dropped (which kills its sandbox
    /// process and removes its scratch directory) and its slot is marked
    /// [`AbsenceReason::Cancelled`]; already resolved entries are kept.
    pub async fn generate_batch(&self, specs: Vec<DiagramSpec>, options: BatchOptions) -> BatchResult {
        let total = specs.len();
        let concurrency = options
            .concurrency
            .unwrap_or(self.config.concurrency)
            .max(1);
        let batch_id = uuid::Uuid::new_v4().to_string();
        let question_indices: Vec<u32> = specs.iter().map(|s| s.question_index).collect();
        let mut slots: Vec<Option<BatchEntry>> = vec![None; total];

        tracing::debug!(
            "batch {} started: specs={}, concurrency={}",
            batch_id,
            total,
            concurrency
        );

        let coordinator = self.coordinator();
        let coordinator = &coordinator;
        let mut pending = stream::iter(specs.into_iter().enumerate())
            .map(|(slot, spec)| {
                let ctx = SpecContext::new(batch_id.clone(), &spec);
                async move { (slot, coordinator.run(spec, ctx).await) }
            })
            .buffer_unordered(concurrency);

        let deadline = async {
            match options.deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };
        let cancel = async {
            match options.cancel {
                Some(mut signal) => signal.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline, cancel);

        let mut resolved = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    tracing::warn!("batch {} cancelled with {}/{} specs resolved", batch_id, resolved, total);
                    break;
                }
                _ = &mut deadline => {
                    tracing::warn!("batch {} hit its deadline with {}/{} specs resolved", batch_id, resolved, total);
                    break;
                }
                next = pending.next() => match next {
                    Some((slot, outcome)) => {
                        slots[slot] = Some(outcome.entry);
                        resolved += 1;
                    }
                    None => break,
                }
            }
        }

        // Dropping the stream drops every in-flight coordinator.
        drop(pending);

        let entries: Vec<BatchEntry> = slots
            .into_iter()
            .zip(question_indices)
            .map(|(slot, question_index)| {
                slot.unwrap_or_else(|| BatchEntry::absent(question_index, AbsenceReason::Cancelled))
            })
            .collect();
        let result = BatchResult { entries };

        tracing::debug!(
            "batch {} finished: {}/{} diagrams",
            batch_id,
            result.rendered_count(),
            total
        );

        result
    }
}
