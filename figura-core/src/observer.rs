//! Observer hooks for attempt trails and spec resolution.

use crate::error::FiguraError;
use crate::types::*;
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt::Debug;
use std::sync::Arc;

/// Per-spec context handed to observers
#[derive(Debug, Clone)]
pub struct SpecContext {
    pub batch_id: String,
    pub spec_id: u32,
    pub assignment_id: String,
    pub question_index: u32,
    pub diagram_type: DiagramType,
}

impl SpecContext {
    /// Create a context for a spec within a batch
    pub fn new(batch_id: impl Into<String>, spec: &DiagramSpec) -> Self {
        Self {
            batch_id: batch_id.into(),
            spec_id: spec.id,
            assignment_id: spec.assignment_id.clone(),
            question_index: spec.question_index,
            diagram_type: spec.diagram_type,
        }
    }
}

/// Observer trait for telemetry hooks.
///
/// Hooks are side effects only. They run concurrently, and an error from
/// one is logged and otherwise ignored; it never changes how a spec
/// resolves.
#[async_trait]
pub trait RenderObserver: Send + Sync + Debug + 'static {
    /// Observer name
    fn name(&self) -> &str;

    /// Called once the router has chosen the tier chain
    async fn on_spec_start(&self, _ctx: &SpecContext, _chain: &[Tier]) -> Result<(), FiguraError> {
        Ok(())
    }

    /// Called after every tier attempt
    async fn on_attempt(
        &self,
        _ctx: &SpecContext,
        _attempt: &RenderAttempt,
    ) -> Result<(), FiguraError> {
        Ok(())
    }

    /// Called when the spec resolves to a descriptor or an absence marker
    async fn on_resolved(
        &self,
        _ctx: &SpecContext,
        _entry: &BatchEntry,
        _trail: &[RenderAttempt],
    ) -> Result<(), FiguraError> {
        Ok(())
    }
}

/// Observer execution engine.
#[derive(Debug, Clone, Default)]
pub struct ObserverEngine {
    observers: Vec<Arc<dyn RenderObserver>>,
}

impl ObserverEngine {
    /// Create a new observer engine
    pub fn new(observers: Vec<Arc<dyn RenderObserver>>) -> Self {
        Self { observers }
    }

    /// Get all observers
    pub fn observers(&self) -> &[Arc<dyn RenderObserver>] {
        &self.observers
    }

    pub async fn on_spec_start(&self, ctx: &SpecContext, chain: &[Tier]) {
        let results = join_all(self.observers.iter().map(|o| o.on_spec_start(ctx, chain))).await;
        self.report("on_spec_start", results);
    }

    pub async fn on_attempt(&self, ctx: &SpecContext, attempt: &RenderAttempt) {
        let results = join_all(self.observers.iter().map(|o| o.on_attempt(ctx, attempt))).await;
        self.report("on_attempt", results);
    }

    pub async fn on_resolved(&self, ctx: &SpecContext, entry: &BatchEntry, trail: &[RenderAttempt]) {
        let results =
            join_all(self.observers.iter().map(|o| o.on_resolved(ctx, entry, trail))).await;
        self.report("on_resolved", results);
    }

    fn report(&self, hook: &str, results: Vec<Result<(), FiguraError>>) {
        for (observer, result) in self.observers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!("observer {} failed in {}: {}", observer.name(), hook, e);
            }
        }
    }
}
