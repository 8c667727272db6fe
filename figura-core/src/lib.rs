//! # Figura Core
//!
//! Core abstractions and runtime for rendering diagrams from machine-authored
//! specifications.
//!
//! This crate provides the foundational traits and types: renderers for each
//! tier, artifact stores, composable layers, observer hooks, the tier router
//! and the runtime that drives specs through retry and fallback.

pub mod error;
pub mod layer;
pub mod observer;
pub mod regenerate;
pub mod renderer;
pub mod router;
pub mod runtime;
pub mod store;
pub mod types;

// Re-exports
pub use error::{FiguraError, ViolationKind};
pub use layer::{Layer, LayeredRenderer, LayeredStore, StoreLayer};
pub use observer::{ObserverEngine, RenderObserver, SpecContext};
pub use regenerate::{CodeRegenerator, FnRegenerator, NoRegeneration, RegenerationRequest};
pub use renderer::{BoxedRenderer, Renderer, RendererSet};
pub use router::route;
pub use runtime::{
    cancellation, BatchOptions, CancelHandle, CancellationSignal, Pipeline, PipelineBuilder,
    PipelineConfig, SpecOutcome,
};
pub use store::{ArtifactStore, BoxedStore, DiagramStore, StoredObject, UploadRetryPolicy};
pub use types::*;

/// Result type alias for rendering operations
pub type Result<T> = std::result::Result<T, FiguraError>;
