//! Runtime layer for Figura.
//!
//! The runtime sits between callers and the renderers. It is responsible for:
//! - Routing each spec to its ordered tier chain
//! - Driving the chain through retry and fallback to success or exhaustion
//! - Persisting rendered diagrams through the store client
//! - Running batches with bounded concurrency, ordering and cancellation

pub mod batch;
pub mod cancel;
pub mod config;
pub mod coordinator;

pub use batch::{BatchOptions, Pipeline, PipelineBuilder};
pub use cancel::{cancellation, CancelHandle, CancellationSignal};
pub use config::PipelineConfig;
pub use coordinator::SpecOutcome;

#[cfg(test)]
mod tests;
