//! # Figura
//!
//! Sandboxed, fault-tolerant diagram rendering for machine-generated content.
//!
//! Figura takes a batch of diagram specifications, renders each one through
//! an ordered chain of tiers (sandboxed plotting code, an AI image service,
//! SVG rasterizing) and persists the resulting PNGs under deterministic keys.
//! A failing spec never fails the batch: its slot holds an absence marker.
//!
//! ## Features
//!
//! - **Process isolation**: generated code is scanned, then run in a child process with hard ceilings
//! - **Tiered fallback**: one regenerate-and-retry on the primary tier, then the next tier
//! - **Bounded batches**: ordered results, deadlines and cancellation
//! - **Composable layers**: logging and retry around renderers and stores
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! figura = { version = "0.1", features = ["sandbox", "providers", "layers"] }
//! ```
//!
//! ```ignore
//! use figura::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(SandboxExecutor::new(SandboxConfig::default())?);
//!
//! let pipeline = Pipeline::builder(MemoryStore::new("https://cdn.example.com"))
//!     .store_layer(LoggingLayer::new())
//!     .renderer(CodeRenderer::plot(executor.clone()))
//!     .renderer(SvgRenderer::new())
//!     .finish();
//!
//! let spec = DiagramSpec::new("asg-1", 0, DiagramType::Plot, "y = x^2")
//!     .with_code("x = np.linspace(-2, 2, 50)\nplt.plot(x, x**2)");
//!
//! let result = pipeline.generate_batch(vec![spec], BatchOptions::new()).await;
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `default`: `sandbox`, `providers` and `layers`
//! - `sandbox`: sandboxed executor, code renderers, SVG renderer
//! - `providers`: AI image renderer and store backends (`openai` is an alias)
//! - `layers`: logging and retry layers
//! - `schema`: JSON Schema for `DiagramSpec`
//! - `full`: All features enabled

// Re-export core types and traits
pub use figura_core::*;

// Re-export the sandbox under `sandbox` module
#[cfg(feature = "figura-sandbox")]
pub mod sandbox {
    //! Sandboxed execution and code-based renderers.
    pub use figura_sandbox::*;
}

// Re-export providers under `provider` module
#[cfg(feature = "figura-provider")]
pub mod provider {
    //! AI image renderer and artifact stores.
    pub use figura_provider::*;
}

// Re-export layers under `layer` module
#[cfg(feature = "figura-layer")]
pub mod layer {
    //! Built-in layers.
    pub use figura_layer::*;
}

// Re-export schemars when schema feature is enabled
#[cfg(feature = "schema")]
pub mod schemars {
    pub use ::schemars::*;
}

/// Prelude module for convenient imports
pub mod prelude {
    //! Prelude module containing the most commonly used types and traits.
    //!
    //! ```
    //! use figura::prelude::*;
    //! ```

    pub use crate::{
        ArtifactStore, BatchEntry, BatchOptions, BatchResult, DiagramDescriptor, DiagramSpec,
        DiagramType, FiguraError, Layer, Pipeline, PipelineConfig, RenderObserver, Renderer,
        Result, StoreLayer, Tier, UploadRetryPolicy,
    };

    #[cfg(feature = "figura-sandbox")]
    pub use crate::sandbox::*;

    #[cfg(feature = "figura-provider")]
    pub use crate::provider::*;

    #[cfg(feature = "figura-layer")]
    pub use crate::layer::*;
}
