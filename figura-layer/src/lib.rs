//! # Figura Layers
//!
//! Built-in layers for Figura.
//!
//! Currently implemented layers:
//! - `LoggingLayer`: Logs renderer and store operations with timing information
//! - `RetryLayer`: Retries transient store failures with exponential backoff
//!
//! ## Usage
//!
//! ```ignore
//! use figura_core::Pipeline;
//! use figura_layer::{LoggingLayer, RetryLayer};
//!
//! let pipeline = Pipeline::builder(store)
//!     .store_layer(RetryLayer::new().with_max_retries(3))
//!     .store_layer(LoggingLayer::new())
//!     .layered_renderer(plot_renderer, &LoggingLayer::new())
//!     .finish();
//! ```

pub mod logging;
pub mod retry;

// Re-exports
pub use logging::LoggingLayer;
pub use retry::RetryLayer;
